use thiserror::Error;

#[derive(Error, Debug)]
pub enum VectorError {
    #[error("Dimension mismatch: expected {0}, got {1}")]
    DimensionMismatch(usize, usize),

    #[error("Row count mismatch: expected {0} embeddings, got {1}")]
    RowCountMismatch(usize, usize),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Model load failed: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Decomposition failed: {0}")]
    Decomposition(String),
}

impl From<VectorError> for keygraph_core::ClusteringError {
    fn from(err: VectorError) -> Self {
        match err {
            VectorError::BackendUnavailable(msg) => {
                keygraph_core::ClusteringError::EmbeddingUnavailable(msg)
            }
            VectorError::DimensionMismatch(expected, actual) => {
                keygraph_core::ClusteringError::DimensionMismatch { expected, actual }
            }
            other => keygraph_core::ClusteringError::Embedding(other.to_string()),
        }
    }
}
