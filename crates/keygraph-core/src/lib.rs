pub mod config;
pub mod error;
pub mod text;
pub mod types;

pub use config::{
    ClusteringConfig, ConfigError, ConfigManager, EmbeddingConfig, KeyGraphConfig, LoggingConfig,
};
pub use error::*;
pub use types::*;
