pub mod error;
pub mod providers;
pub mod service;
pub mod svd;
pub mod tfidf;
pub mod vector_ops;

#[cfg(feature = "onnx")]
pub mod onnx_provider;

pub use error::VectorError;
pub use providers::*;
pub use service::EmbeddingService;
pub use tfidf::TfidfEmbeddingProvider;
pub use vector_ops::{
    cosine_distance_matrix, cosine_similarity, cosine_similarity_matrix, normalize_rows,
};

#[cfg(feature = "onnx")]
pub use onnx_provider::{SentenceEmbeddingProvider, SentenceModelConfig};
