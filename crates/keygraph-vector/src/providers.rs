use keygraph_core::Result;
use ndarray::Array2;

/// Resource profile of an embedding backend.
#[derive(Debug, Clone)]
pub struct ProviderCharacteristics {
    pub requires_network: bool,
    pub pretrained: bool,
    pub memory_usage: MemoryUsage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryUsage {
    Low,    // < 100MB
    Medium, // 100MB - 1GB
    High,   // > 1GB
}

/// Unified trait for every keyword embedding backend.
///
/// Implementations must return exactly one row per input keyword, and every
/// row of a single call must share the same dimension.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of (already normalized) keywords into an `[n, d]` matrix.
    fn generate(&self, keywords: &[String]) -> Result<Array2<f32>>;

    /// Nominal output dimension; per-batch backends may return fewer columns.
    fn dimension(&self) -> usize;

    fn provider_name(&self) -> &str;

    /// Capability check; may perform the one-time backend load.
    fn is_available(&self) -> bool;

    fn characteristics(&self) -> ProviderCharacteristics;
}
