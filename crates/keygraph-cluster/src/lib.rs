//! Keyword clustering pipeline.
//!
//! [`ClusterManager`] is the entry point: it embeds keywords, clusters them
//! through [`ClusterEngine`], then labels, analyzes and validates the result.

pub mod algorithms;
pub mod engine;
pub mod hub_spoke;
pub mod labeler;
pub mod manager;
pub mod metrics;
pub mod persistence;
pub mod validation;

pub use algorithms::{Agglomerative, ClusteringAlgorithm, Hdbscan, KMeans};
pub use engine::{ClusterEngine, ClusterOutput};
pub use hub_spoke::HubSpokeAnalyzer;
pub use labeler::ClusterLabeler;
pub use manager::ClusterManager;
pub use persistence::{
    ClusterPersister, ClusterRecord, ClusterStore, ClusterType, InMemoryClusterStore,
    PersistReport, StoreError,
};
pub use validation::StatisticalValidator;
