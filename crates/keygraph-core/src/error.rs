use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClusteringError {
    #[error("No usable embedding backend: {0}")]
    EmbeddingUnavailable(String),

    #[error("No usable clustering backend")]
    ClusteringUnavailable {
        #[source]
        source: Option<Box<ClusteringError>>,
    },

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Clustering algorithm error: {0}")]
    Algorithm(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Pipeline stage '{stage}' failed")]
    Pipeline {
        stage: &'static str,
        #[source]
        source: Box<ClusteringError>,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClusteringError {
    /// Wrap an error raised inside a pipeline stage, keeping it as the source.
    pub fn in_stage(stage: &'static str, source: ClusteringError) -> Self {
        ClusteringError::Pipeline {
            stage,
            source: Box::new(source),
        }
    }

    /// Innermost error, looking through `Pipeline` wrappers.
    pub fn root_cause(&self) -> &ClusteringError {
        let mut current = self;
        while let ClusteringError::Pipeline { source, .. } = current {
            current = source;
        }
        current
    }
}

pub type Result<T> = std::result::Result<T, ClusteringError>;
