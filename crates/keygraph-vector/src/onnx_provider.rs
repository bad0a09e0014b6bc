use std::path::{Path, PathBuf};

use hf_hub::api::sync::Api;
use keygraph_core::{EmbeddingConfig, Result};
use ndarray::Array2;
use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use parking_lot::Mutex;
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use crate::error::VectorError;
use crate::providers::{EmbeddingProvider, MemoryUsage, ProviderCharacteristics};
use crate::vector_ops::l2_normalize;

const BATCH_SIZE: usize = 32;

#[derive(Debug, Clone)]
pub struct SentenceModelConfig {
    /// Hugging Face repo id, or a local directory holding `tokenizer.json` and `model.onnx`.
    pub model: String,
    pub dimension: usize,
    pub max_sequence_length: usize,
}

impl From<&EmbeddingConfig> for SentenceModelConfig {
    fn from(config: &EmbeddingConfig) -> Self {
        Self {
            model: config.model.clone(),
            dimension: config.dimension,
            max_sequence_length: config.max_sequence_length,
        }
    }
}

struct LoadedModel {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    wants_token_type_ids: bool,
}

/// Pretrained sentence-transformer run through ONNX Runtime with mean pooling.
///
/// The model is fetched and loaded at most once, on first use. A failed load
/// is remembered so availability checks stay cheap.
pub struct SentenceEmbeddingProvider {
    config: SentenceModelConfig,
    model: OnceCell<std::result::Result<LoadedModel, String>>,
}

impl SentenceEmbeddingProvider {
    pub fn new(config: SentenceModelConfig) -> Self {
        Self {
            config,
            model: OnceCell::new(),
        }
    }

    fn loaded(&self) -> std::result::Result<&LoadedModel, VectorError> {
        self.model
            .get_or_init(|| {
                Self::load(&self.config).map_err(|e| {
                    warn!(model = %self.config.model, error = %e, "Sentence model unavailable");
                    e.to_string()
                })
            })
            .as_ref()
            .map_err(|msg| VectorError::BackendUnavailable(msg.clone()))
    }

    fn resolve_files(model: &str) -> std::result::Result<(PathBuf, PathBuf), VectorError> {
        let local = Path::new(model);
        if local.is_dir() {
            let tokenizer = local.join("tokenizer.json");
            let nested = local.join("onnx").join("model.onnx");
            let onnx = if nested.exists() {
                nested
            } else {
                local.join("model.onnx")
            };
            return Ok((tokenizer, onnx));
        }

        let api = Api::new().map_err(|e| VectorError::ModelLoad(e.to_string()))?;
        let repo = api.model(model.to_string());
        let tokenizer = repo
            .get("tokenizer.json")
            .map_err(|e| VectorError::ModelLoad(e.to_string()))?;
        let onnx = repo
            .get("onnx/model.onnx")
            .or_else(|_| repo.get("model.onnx"))
            .map_err(|e| VectorError::ModelLoad(e.to_string()))?;
        Ok((tokenizer, onnx))
    }

    fn load(config: &SentenceModelConfig) -> std::result::Result<LoadedModel, VectorError> {
        let (tokenizer_path, model_path) = Self::resolve_files(&config.model)?;
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| VectorError::ModelLoad(e.to_string()))?;

        let session = Session::builder()
            .map_err(|e| VectorError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| VectorError::ModelLoad(e.to_string()))?
            .commit_from_file(&model_path)
            .map_err(|e| VectorError::ModelLoad(e.to_string()))?;

        let wants_token_type_ids = session
            .inputs
            .iter()
            .any(|input| input.name == "token_type_ids");

        info!(model = %config.model, path = %model_path.display(), "Loaded sentence model");
        Ok(LoadedModel {
            session: Mutex::new(session),
            tokenizer,
            wants_token_type_ids,
        })
    }

    fn encode_batch(
        &self,
        model: &LoadedModel,
        texts: &[String],
    ) -> std::result::Result<(Vec<i64>, Vec<i64>, usize), VectorError> {
        let mut ids: Vec<Vec<i64>> = Vec::with_capacity(texts.len());
        let mut masks: Vec<Vec<i64>> = Vec::with_capacity(texts.len());
        let mut max_len = 1usize;

        for text in texts {
            let encoding = model
                .tokenizer
                .encode(text.as_str(), true)
                .map_err(|e| VectorError::Inference(e.to_string()))?;
            let mut tid: Vec<i64> = encoding.get_ids().iter().map(|&x| x as i64).collect();
            let mut mask: Vec<i64> = encoding
                .get_attention_mask()
                .iter()
                .map(|&x| i64::from(x > 0))
                .collect();
            tid.truncate(self.config.max_sequence_length);
            mask.truncate(self.config.max_sequence_length);
            max_len = max_len.max(tid.len());
            ids.push(tid);
            masks.push(mask);
        }

        let mut flat_ids = Vec::with_capacity(texts.len() * max_len);
        let mut flat_mask = Vec::with_capacity(texts.len() * max_len);
        for (tid, mask) in ids.iter().zip(masks.iter()) {
            flat_ids.extend_from_slice(tid);
            flat_ids.resize(flat_ids.len() + max_len - tid.len(), 0);
            flat_mask.extend_from_slice(mask);
            flat_mask.resize(flat_mask.len() + max_len - mask.len(), 0);
        }
        Ok((flat_ids, flat_mask, max_len))
    }

    fn embed_batch(
        &self,
        model: &LoadedModel,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, VectorError> {
        let batch = texts.len();
        let (ids, mask, seq_len) = self.encode_batch(model, texts)?;
        let inference = |e: ort::Error| VectorError::Inference(e.to_string());

        let ids_tensor = Tensor::from_array(([batch, seq_len], ids)).map_err(inference)?;
        let mask_tensor = Tensor::from_array(([batch, seq_len], mask.clone())).map_err(inference)?;

        let mut session = model.session.lock();
        let run = if model.wants_token_type_ids {
            let type_ids = Tensor::from_array(([batch, seq_len], vec![0i64; batch * seq_len]))
                .map_err(inference)?;
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => type_ids
            ])
        } else {
            session.run(ort::inputs![
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            ])
        };
        let outputs = run.map_err(inference)?;

        let (shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(inference)?;
        let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();

        let mut pooled = Vec::with_capacity(batch);
        match dims.as_slice() {
            // [B, L, H] token states: masked mean pooling
            [b, l, h] if *b == batch && *l == seq_len => {
                for i in 0..batch {
                    let mut v = vec![0.0f32; *h];
                    let mut count = 0.0f32;
                    for t in 0..seq_len {
                        if mask[i * seq_len + t] == 0 {
                            continue;
                        }
                        count += 1.0;
                        let offset = (i * seq_len + t) * h;
                        for (acc, x) in v.iter_mut().zip(&data[offset..offset + h]) {
                            *acc += x;
                        }
                    }
                    if count > 0.0 {
                        v.iter_mut().for_each(|x| *x /= count);
                    }
                    l2_normalize(&mut v);
                    pooled.push(v);
                }
            }
            // [B, H] already pooled
            [b, h] if *b == batch => {
                for i in 0..batch {
                    let mut v = data[i * h..(i + 1) * h].to_vec();
                    l2_normalize(&mut v);
                    pooled.push(v);
                }
            }
            other => {
                return Err(VectorError::Inference(format!(
                    "unexpected model output shape {:?}",
                    other
                )))
            }
        }
        Ok(pooled)
    }
}

impl EmbeddingProvider for SentenceEmbeddingProvider {
    fn generate(&self, keywords: &[String]) -> Result<Array2<f32>> {
        let model = self.loaded()?;
        if keywords.is_empty() {
            return Ok(Array2::zeros((0, self.config.dimension)));
        }

        let mut rows: Vec<Vec<f32>> = Vec::with_capacity(keywords.len());
        for chunk in keywords.chunks(BATCH_SIZE) {
            rows.extend(self.embed_batch(model, chunk)?);
        }

        let dim = rows.first().map(|r| r.len()).unwrap_or(self.config.dimension);
        if let Some(bad) = rows.iter().find(|r| r.len() != dim) {
            return Err(VectorError::DimensionMismatch(dim, bad.len()).into());
        }
        if dim != self.config.dimension {
            debug!(
                configured = self.config.dimension,
                actual = dim,
                "Sentence model dimension differs from configuration"
            );
        }

        let flat: Vec<f32> = rows.into_iter().flatten().collect();
        Array2::from_shape_vec((keywords.len(), dim), flat)
            .map_err(|e| VectorError::Inference(e.to_string()).into())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "onnx-sentence"
    }

    fn is_available(&self) -> bool {
        self.loaded().is_ok()
    }

    fn characteristics(&self) -> ProviderCharacteristics {
        ProviderCharacteristics {
            requires_network: !Path::new(&self.config.model).is_dir(),
            pretrained: true,
            memory_usage: MemoryUsage::Medium,
        }
    }
}
