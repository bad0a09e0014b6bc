use crate::types::ClusteringMethod;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for crate::ClusteringError {
    fn from(err: ConfigError) -> Self {
        crate::ClusteringError::Config(err.to_string())
    }
}

/// Main configuration for KeyGraph
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KeyGraphConfig {
    /// Clustering pipeline parameters
    #[serde(default)]
    pub clustering: ClusteringConfig,

    /// Embedding backend selection
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Parameters of a single clustering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Smallest group the density method reports as a cluster
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,

    /// Neighbours (including the point itself) needed for a core point
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Minimum cosine similarity between a spoke and its hub
    #[serde(default = "default_hub_threshold")]
    pub hub_threshold: f32,

    /// Minimum cosine similarity for a keyword relationship
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Upper bound of the automatic k sweep
    #[serde(default = "default_max_clusters")]
    pub max_clusters: usize,

    /// Bootstrap resamples per cluster during validation
    #[serde(default = "default_bootstrap_iterations")]
    pub bootstrap_iterations: usize,

    /// Seed for k-means initialisation and bootstrap sampling
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,

    /// Minimum bigram frequency for a cluster label
    #[serde(default = "default_label_min_frequency")]
    pub label_min_frequency: usize,

    /// Independent k-means initialisations per k
    #[serde(default = "default_kmeans_restarts")]
    pub kmeans_restarts: usize,

    /// Method used when the caller does not pick one
    #[serde(default)]
    pub default_method: ClusteringMethod,

    /// Optional newline-separated stop-word list; the built-in list is used when absent
    #[serde(default)]
    pub stop_words_file: Option<PathBuf>,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
            min_samples: default_min_samples(),
            hub_threshold: default_hub_threshold(),
            similarity_threshold: default_similarity_threshold(),
            max_clusters: default_max_clusters(),
            bootstrap_iterations: default_bootstrap_iterations(),
            random_seed: default_random_seed(),
            label_min_frequency: default_label_min_frequency(),
            kmeans_restarts: default_kmeans_restarts(),
            default_method: ClusteringMethod::default(),
            stop_words_file: None,
        }
    }
}

impl ClusteringConfig {
    pub fn with_min_cluster_size(mut self, size: usize) -> Self {
        self.min_cluster_size = size;
        self
    }

    pub fn with_random_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_cluster_size < 2 {
            return Err(ConfigError::ValidationError(format!(
                "min_cluster_size must be >= 2, got {}",
                self.min_cluster_size
            )));
        }
        if self.min_samples < 1 {
            return Err(ConfigError::ValidationError(format!(
                "min_samples must be >= 1, got {}",
                self.min_samples
            )));
        }
        for (name, value) in [
            ("hub_threshold", self.hub_threshold),
            ("similarity_threshold", self.similarity_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{} must be within [0, 1], got {}",
                    name, value
                )));
            }
        }
        if self.max_clusters < 2 {
            return Err(ConfigError::ValidationError(format!(
                "max_clusters must be >= 2, got {}",
                self.max_clusters
            )));
        }
        if self.kmeans_restarts == 0 {
            return Err(ConfigError::ValidationError(
                "kmeans_restarts must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Embedding backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Provider: "auto", "onnx" or "tfidf"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Sentence model: HuggingFace repo id or local directory with
    /// `tokenizer.json` and `model.onnx`
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Target embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Token budget per keyword for the sentence model
    #[serde(default = "default_max_sequence_length")]
    pub max_sequence_length: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            max_sequence_length: default_max_sequence_length(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "json", "compact"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_min_cluster_size() -> usize {
    3
}
fn default_min_samples() -> usize {
    2
}
fn default_hub_threshold() -> f32 {
    0.7
}
fn default_similarity_threshold() -> f32 {
    0.6
}
fn default_max_clusters() -> usize {
    50
}
fn default_bootstrap_iterations() -> usize {
    5
}
fn default_random_seed() -> u64 {
    42
}
fn default_label_min_frequency() -> usize {
    2
}
fn default_kmeans_restarts() -> usize {
    4
}
fn default_embedding_provider() -> String {
    "auto".to_string()
}
fn default_embedding_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}
fn default_embedding_dimension() -> usize {
    384
} // all-MiniLM-L6-v2
fn default_max_sequence_length() -> usize {
    128
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Configuration manager with layered sources
pub struct ConfigManager {
    config: KeyGraphConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (.env file)
    /// 2. Config file (.keygraph.toml)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        info!("Loading KeyGraph configuration");

        Self::load_dotenv();

        let (config, config_path) = Self::load_config_file()?;
        let config = Self::apply_env_overrides(config);
        Self::validate_config(&config)?;

        match config_path {
            Some(ref path) => info!("Config file: {}", path.display()),
            None => info!("Config file: NONE (using defaults)"),
        }
        info!(
            provider = %config.embedding.provider,
            method = %config.clustering.default_method,
            min_cluster_size = config.clustering.min_cluster_size,
            "Configuration loaded"
        );

        Ok(Self {
            config,
            config_path,
        })
    }

    /// Load an explicit config file, still honouring environment overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        Self::load_dotenv();
        let config = Self::apply_env_overrides(Self::read_toml_file(path)?);
        Self::validate_config(&config)?;
        Ok(Self {
            config,
            config_path: Some(path.to_path_buf()),
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".keygraph.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .keygraph.env: {}", e);
                }
            }
        }
    }

    /// Search order:
    /// 1. ./.keygraph.toml
    /// 2. ~/.keygraph/config.toml
    /// 3. Defaults
    fn load_config_file() -> Result<(KeyGraphConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".keygraph.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".keygraph").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((KeyGraphConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<KeyGraphConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_env_overrides(mut config: KeyGraphConfig) -> KeyGraphConfig {
        fn parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
            std::env::var(key).ok().and_then(|v| v.parse().ok())
        }

        if let Some(size) = parsed("KEYGRAPH_MIN_CLUSTER_SIZE") {
            config.clustering.min_cluster_size = size;
        }
        if let Some(samples) = parsed("KEYGRAPH_MIN_SAMPLES") {
            config.clustering.min_samples = samples;
        }
        if let Some(threshold) = parsed("KEYGRAPH_HUB_THRESHOLD") {
            config.clustering.hub_threshold = threshold;
        }
        if let Some(threshold) = parsed("KEYGRAPH_SIMILARITY_THRESHOLD") {
            config.clustering.similarity_threshold = threshold;
        }
        if let Some(max) = parsed("KEYGRAPH_MAX_CLUSTERS") {
            config.clustering.max_clusters = max;
        }
        if let Some(seed) = parsed("KEYGRAPH_RANDOM_SEED") {
            config.clustering.random_seed = seed;
        }
        if let Ok(method) = std::env::var("KEYGRAPH_METHOD") {
            match method.parse() {
                Ok(m) => config.clustering.default_method = m,
                Err(e) => warn!("Ignoring KEYGRAPH_METHOD: {}", e),
            }
        }

        if let Ok(provider) = std::env::var("KEYGRAPH_EMBEDDING_PROVIDER") {
            config.embedding.provider = provider;
        }
        if let Ok(model) = std::env::var("KEYGRAPH_EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dim) = parsed("KEYGRAPH_EMBEDDING_DIMENSION") {
            config.embedding.dimension = dim;
        }

        if let Ok(level) = std::env::var("KEYGRAPH_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Ok(format) = std::env::var("KEYGRAPH_LOG_FORMAT") {
            config.logging.format = format;
        }

        config
    }

    fn validate_config(config: &KeyGraphConfig) -> Result<(), ConfigError> {
        config.clustering.validate()?;

        match config.embedding.provider.as_str() {
            "auto" | "onnx" | "tfidf" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid embedding provider: {}. Must be one of: auto, onnx, tfidf",
                    other
                )))
            }
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }

        match config.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, json, compact",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &KeyGraphConfig {
        &self.config
    }

    pub fn into_config(self) -> KeyGraphConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Write a default config file, creating parent directories.
    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let config = KeyGraphConfig::default();
        let toml_str =
            toml::to_string_pretty(&config).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = KeyGraphConfig::default();
        assert_eq!(config.clustering.min_cluster_size, 3);
        assert_eq!(config.clustering.min_samples, 2);
        assert_eq!(config.clustering.max_clusters, 50);
        assert_eq!(config.embedding.provider, "auto");
        assert_eq!(config.embedding.dimension, 384);
        assert_eq!(config.clustering.default_method, ClusteringMethod::Hdbscan);
    }

    #[test]
    fn test_config_validation() {
        let config = KeyGraphConfig::default();
        assert!(ConfigManager::validate_config(&config).is_ok());

        let mut bad_provider = config.clone();
        bad_provider.embedding.provider = "word2vec".to_string();
        assert!(ConfigManager::validate_config(&bad_provider).is_err());

        let mut bad_threshold = config.clone();
        bad_threshold.clustering.hub_threshold = 1.5;
        assert!(ConfigManager::validate_config(&bad_threshold).is_err());

        let mut bad_size = config;
        bad_size.clustering.min_cluster_size = 1;
        assert!(ConfigManager::validate_config(&bad_size).is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: KeyGraphConfig = toml::from_str(
            r#"
            [clustering]
            min_cluster_size = 5
            default_method = "kmeans"
            "#,
        )
        .unwrap();
        assert_eq!(config.clustering.min_cluster_size, 5);
        assert_eq!(config.clustering.default_method, ClusteringMethod::KMeans);
        assert_eq!(config.clustering.hub_threshold, 0.7);
        assert_eq!(config.logging.level, "warn");
    }
}
