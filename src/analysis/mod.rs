pub mod secrets;
pub mod spam;
pub mod velocity;
