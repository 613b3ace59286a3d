// Core modules
pub mod api;
pub mod config;
pub mod error;
pub mod execution;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use api::*;
pub use config::{Settings, StrategyConfig};
pub use error::{ConfigError, CycleError, FeedError};
pub use models::*;
