pub mod config;
pub mod logger;
