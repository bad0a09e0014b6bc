use std::sync::Arc;

use keygraph_core::{ClusteringError, EmbeddingConfig, Result};
use ndarray::Array2;
use once_cell::sync::{Lazy, OnceCell};
use tracing::{debug, info, warn};

use crate::providers::EmbeddingProvider;
use crate::tfidf::TfidfEmbeddingProvider;

static SHARED: Lazy<Arc<EmbeddingService>> =
    Lazy::new(|| Arc::new(EmbeddingService::from_config(&EmbeddingConfig::default())));

/// Ordered fallback chain of embedding backends with a resolve-once cache.
///
/// The first available strategy is resolved lazily and reused for the life
/// of the service. If the resolved backend fails on a batch, the remaining
/// strategies are tried in order for that batch.
pub struct EmbeddingService {
    strategies: Vec<Arc<dyn EmbeddingProvider>>,
    active: OnceCell<Arc<dyn EmbeddingProvider>>,
}

impl EmbeddingService {
    pub fn new(strategies: Vec<Arc<dyn EmbeddingProvider>>) -> Self {
        Self {
            strategies,
            active: OnceCell::new(),
        }
    }

    /// Build the strategy list for a configured provider name.
    ///
    /// `auto` prefers the sentence model (when compiled with `onnx`) and
    /// falls back to TF-IDF; `onnx` and `tfidf` pin a single backend.
    pub fn from_config(config: &EmbeddingConfig) -> Self {
        let mut strategies: Vec<Arc<dyn EmbeddingProvider>> = Vec::new();
        let provider = config.provider.to_lowercase();

        if provider == "auto" || provider == "onnx" {
            #[cfg(feature = "onnx")]
            {
                use crate::onnx_provider::{SentenceEmbeddingProvider, SentenceModelConfig};
                strategies.push(Arc::new(SentenceEmbeddingProvider::new(
                    SentenceModelConfig::from(config),
                )));
            }
            #[cfg(not(feature = "onnx"))]
            {
                if provider == "onnx" {
                    warn!("ONNX provider requested but the 'onnx' feature is not enabled; using TF-IDF");
                }
            }
        }
        if provider != "onnx" || strategies.is_empty() {
            strategies.push(Arc::new(TfidfEmbeddingProvider::new(config.dimension)));
        }

        Self::new(strategies)
    }

    /// Process-wide service built from the default embedding configuration.
    pub fn shared() -> Arc<EmbeddingService> {
        Arc::clone(&SHARED)
    }

    pub fn strategies(&self) -> &[Arc<dyn EmbeddingProvider>] {
        &self.strategies
    }

    /// Resolve (once) and return the active backend.
    pub fn active_provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.active
            .get_or_try_init(|| {
                for provider in &self.strategies {
                    if provider.is_available() {
                        info!(provider = provider.provider_name(), "Resolved embedding provider");
                        return Ok(Arc::clone(provider));
                    }
                    debug!(provider = provider.provider_name(), "Embedding provider unavailable");
                }
                Err(ClusteringError::EmbeddingUnavailable(format!(
                    "none of {} configured embedding backends is available",
                    self.strategies.len()
                )))
            })
            .map(Arc::clone)
    }

    /// Name of the resolved backend, if resolution has happened.
    pub fn provider_name(&self) -> Option<&str> {
        self.active.get().map(|p| p.provider_name())
    }

    /// Embed keywords, one row per keyword.
    pub fn generate(&self, keywords: &[String]) -> Result<Array2<f32>> {
        let active = self.active_provider()?;
        let first_error = match Self::checked_generate(active.as_ref(), keywords) {
            Ok(embeddings) => return Ok(embeddings),
            Err(e) => e,
        };
        warn!(
            provider = active.provider_name(),
            error = %first_error,
            "Embedding generation failed; trying fallback providers"
        );

        let mut last_error = first_error;
        let fallbacks = self
            .strategies
            .iter()
            .filter(|p| !Arc::ptr_eq(*p, &active) && p.is_available());
        for provider in fallbacks {
            match Self::checked_generate(provider.as_ref(), keywords) {
                Ok(embeddings) => {
                    info!(provider = provider.provider_name(), "Fallback embedding provider succeeded");
                    return Ok(embeddings);
                }
                Err(e) => {
                    warn!(provider = provider.provider_name(), error = %e, "Fallback embedding provider failed");
                    last_error = e;
                }
            }
        }

        Err(ClusteringError::EmbeddingUnavailable(format!(
            "all embedding backends failed: {last_error}"
        )))
    }

    fn checked_generate(provider: &dyn EmbeddingProvider, keywords: &[String]) -> Result<Array2<f32>> {
        let embeddings = provider.generate(keywords)?;
        if embeddings.nrows() != keywords.len() {
            return Err(crate::error::VectorError::RowCountMismatch(
                keywords.len(),
                embeddings.nrows(),
            )
            .into());
        }
        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{MemoryUsage, ProviderCharacteristics};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        name: &'static str,
        available: bool,
        fail: bool,
        availability_checks: AtomicUsize,
    }

    impl StubProvider {
        fn new(name: &'static str, available: bool, fail: bool) -> Self {
            Self {
                name,
                available,
                fail,
                availability_checks: AtomicUsize::new(0),
            }
        }
    }

    impl EmbeddingProvider for StubProvider {
        fn generate(&self, keywords: &[String]) -> Result<Array2<f32>> {
            if self.fail {
                return Err(ClusteringError::Embedding(format!("{} exploded", self.name)));
            }
            Ok(Array2::from_elem((keywords.len(), 2), 1.0))
        }
        fn dimension(&self) -> usize {
            2
        }
        fn provider_name(&self) -> &str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.availability_checks.fetch_add(1, Ordering::SeqCst);
            self.available
        }
        fn characteristics(&self) -> ProviderCharacteristics {
            ProviderCharacteristics {
                requires_network: false,
                pretrained: false,
                memory_usage: MemoryUsage::Low,
            }
        }
    }

    fn shared_stub(stub: &Arc<StubProvider>) -> Arc<dyn EmbeddingProvider> {
        stub.clone()
    }

    fn kw(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("keyword {i}")).collect()
    }

    #[test]
    fn test_skips_unavailable_and_caches_resolution() {
        let missing = Arc::new(StubProvider::new("missing", false, false));
        let working = Arc::new(StubProvider::new("working", true, false));
        let service = EmbeddingService::new(vec![shared_stub(&missing), shared_stub(&working)]);

        assert!(service.provider_name().is_none());
        assert_eq!(service.generate(&kw(3)).unwrap().dim(), (3, 2));
        assert_eq!(service.generate(&kw(2)).unwrap().dim(), (2, 2));
        assert_eq!(service.provider_name(), Some("working"));
        assert_eq!(missing.availability_checks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_falls_back_when_generation_fails() {
        let flaky = Arc::new(StubProvider::new("flaky", true, true));
        let working = Arc::new(StubProvider::new("working", true, false));
        let service = EmbeddingService::new(vec![shared_stub(&flaky), shared_stub(&working)]);

        assert_eq!(service.generate(&kw(4)).unwrap().nrows(), 4);
        assert_eq!(service.provider_name(), Some("flaky"));
    }

    #[test]
    fn test_all_unavailable_is_an_error() {
        let gone = Arc::new(StubProvider::new("gone", false, false));
        let service = EmbeddingService::new(vec![shared_stub(&gone)]);
        assert!(matches!(
            service.generate(&kw(2)),
            Err(ClusteringError::EmbeddingUnavailable(_))
        ));

        let bad = Arc::new(StubProvider::new("bad", true, true));
        let failing = EmbeddingService::new(vec![shared_stub(&bad)]);
        assert!(matches!(
            failing.generate(&kw(2)),
            Err(ClusteringError::EmbeddingUnavailable(_))
        ));
    }

    #[test]
    fn test_concurrent_first_use_resolves_once() {
        struct SlowProvider {
            loads: AtomicUsize,
        }

        impl EmbeddingProvider for SlowProvider {
            fn generate(&self, keywords: &[String]) -> Result<Array2<f32>> {
                Ok(Array2::zeros((keywords.len(), 2)))
            }
            fn dimension(&self) -> usize {
                2
            }
            fn provider_name(&self) -> &str {
                "slow"
            }
            fn is_available(&self) -> bool {
                self.loads.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(50));
                true
            }
            fn characteristics(&self) -> ProviderCharacteristics {
                ProviderCharacteristics {
                    requires_network: false,
                    pretrained: true,
                    memory_usage: MemoryUsage::High,
                }
            }
        }

        let slow = Arc::new(SlowProvider {
            loads: AtomicUsize::new(0),
        });
        let provider: Arc<dyn EmbeddingProvider> = slow.clone();
        let service = EmbeddingService::new(vec![provider]);

        let rows: Vec<usize> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| service.generate(&kw(2)).unwrap().nrows()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(rows, vec![2; 8]);
        assert_eq!(slow.loads.load(Ordering::SeqCst), 1);
        assert_eq!(service.provider_name(), Some("slow"));
    }

    #[test]
    fn test_tfidf_only_config() {
        let config = EmbeddingConfig {
            provider: "tfidf".to_string(),
            ..EmbeddingConfig::default()
        };
        let service = EmbeddingService::from_config(&config);
        assert_eq!(service.strategies().len(), 1);
        assert_eq!(service.strategies()[0].provider_name(), "tfidf-svd");
    }
}
