//! mdbridge-collector: configuration for the collector binary

pub mod config;
pub mod error;

pub use config::{parse_duration, Config};
pub use error::ConfigError;
