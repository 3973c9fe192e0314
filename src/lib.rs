pub mod analysis;
pub mod cli;
pub mod commands;
pub mod error;
pub mod models;

pub use cli::{run, Cli};
pub use error::{FetchError, RadarError, Result};
