pub mod audit;
pub mod collector;
pub mod db;
pub mod feed;
pub mod github;
pub mod pinning;
pub mod radar;
pub mod relay;
pub mod settings;
pub mod shutdown;
pub mod spam_report;
pub mod watchlist;
