//! Local ONNX Runtime embedding provider (all-MiniLM-L6-v2).
//!
//! Tokenize, run the model, mean-pool token embeddings under the attention
//! mask, L2-normalize.

use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Encoding, Tokenizer};

use super::{EmbeddingProvider, EMBEDDING_DIM};
use crate::config::EmbeddingConfig;

/// all-MiniLM-L6-v2 was trained at 256 tokens; longer exchanges are truncated.
const MAX_SEQ_LEN: usize = 256;

pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    model_id: String,
}

// Safety: Tokenizer is Send+Sync and the Session is only reached through the Mutex.
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join("model.onnx");
        let tokenizer_path = cache_dir.join("tokenizer.json");

        for (what, path) in [("ONNX model", &model_path), ("tokenizer", &tokenizer_path)] {
            anyhow::ensure!(
                path.exists(),
                "{what} not found at {}. Run `echoes model download` first.",
                path.display()
            );
        }

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(model = %model_path.display(), "ONNX model and tokenizer loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
            model_id: config.model.clone(),
        })
    }
}

/// Flattened `[batch, seq]` model inputs.
struct BatchInputs {
    shape: Vec<i64>,
    input_ids: Vec<i64>,
    attention_mask: Vec<i64>,
}

fn batch_inputs(encodings: &[Encoding]) -> BatchInputs {
    let seq_len = encodings.first().map_or(0, |e| e.get_ids().len());
    let mut input_ids = Vec::with_capacity(encodings.len() * seq_len);
    let mut attention_mask = Vec::with_capacity(encodings.len() * seq_len);
    for encoding in encodings {
        input_ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
        attention_mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
    }
    BatchInputs {
        shape: vec![encodings.len() as i64, seq_len as i64],
        input_ids,
        attention_mask,
    }
}

/// Average token vectors of one sequence, counting only unmasked positions.
///
/// `tokens` is `[seq, hidden]` row-major; `mask` has one entry per position.
fn mean_pool(tokens: &[f32], mask: &[i64], hidden: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; hidden];
    let mut count = 0.0f32;
    for (position, &m) in mask.iter().enumerate() {
        if m == 0 {
            continue;
        }
        let row = &tokens[position * hidden..(position + 1) * hidden];
        for (acc, value) in sum.iter_mut().zip(row) {
            *acc += value;
        }
        count += 1.0;
    }
    if count > 0.0 {
        sum.iter_mut().for_each(|v| *v /= count);
    }
    sum
}

/// Returns the input unchanged when its norm is zero.
fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .context("embedding batch returned no vectors")
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;
        let inputs = batch_inputs(&encodings);
        let seq_len = inputs.shape[1] as usize;

        let ids = Tensor::from_array((inputs.shape.clone(), inputs.input_ids.into_boxed_slice()))?;
        let mask = Tensor::from_array((
            inputs.shape.clone(),
            inputs.attention_mask.clone().into_boxed_slice(),
        ))?;
        let token_types = Tensor::from_array((
            inputs.shape.clone(),
            vec![0i64; texts.len() * seq_len].into_boxed_slice(),
        ))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => ids,
            "attention_mask" => mask,
            "token_type_ids" => token_types,
        })?;

        // Output name varies by export
        let hidden_states = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (shape, data) = hidden_states
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;

        let dims: &[i64] = &shape;
        anyhow::ensure!(
            dims.len() == 3 && dims[1] as usize == seq_len && dims[2] == EMBEDDING_DIM as i64,
            "unexpected token embeddings shape {dims:?}, expected [batch, {seq_len}, {EMBEDDING_DIM}]"
        );

        let stride = seq_len * EMBEDDING_DIM;
        Ok((0..texts.len())
            .map(|b| {
                let tokens = &data[b * stride..(b + 1) * stride];
                let mask = &inputs.attention_mask[b * seq_len..(b + 1) * seq_len];
                l2_normalize(&mean_pool(tokens, mask, EMBEDDING_DIM))
            })
            .collect())
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_pool_ignores_padding() {
        let tokens = vec![1.0, 3.0, 3.0, 5.0, 100.0, 100.0];
        let pooled = mean_pool(&tokens, &[1, 1, 0], 2);
        assert_eq!(pooled, vec![2.0, 4.0]);
    }

    #[test]
    fn mean_pool_all_masked_is_zero() {
        let pooled = mean_pool(&[1.0, 2.0], &[0], 2);
        assert_eq!(pooled, vec![0.0, 0.0]);
    }

    #[test]
    fn l2_normalize_unit_length() {
        let normalized = l2_normalize(&[3.0, 4.0]);
        assert!((normalized[0] - 0.6).abs() < 1e-6);
        assert!((normalized[1] - 0.8).abs() < 1e-6);
        assert_eq!(l2_normalize(&[0.0, 0.0]), vec![0.0, 0.0]);
    }

    #[test]
    fn missing_model_files_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            cache_dir: dir.path().to_string_lossy().into_owned(),
            ..EmbeddingConfig::default()
        };
        let err = LocalEmbeddingProvider::new(&config).err().unwrap();
        assert!(err.to_string().contains("echoes model download"));
    }

    fn downloaded() -> LocalEmbeddingProvider {
        LocalEmbeddingProvider::new(&EmbeddingConfig::default()).unwrap()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    #[ignore] // Requires model files: cargo test -- --ignored
    fn embeds_unit_vectors_of_model_width() {
        let provider = downloaded();
        let vectors = provider
            .embed_batch(&["fix the flaky websocket test", "short"])
            .unwrap();
        for v in &vectors {
            assert_eq!(v.len(), EMBEDDING_DIM);
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    #[ignore]
    fn related_exchanges_are_closer() {
        let provider = downloaded();
        let login = provider.embed("the login token expired and auth failed").unwrap();
        let auth = provider.embed("authentication error with expired session token").unwrap();
        let css = provider.embed("center a div with flexbox").unwrap();
        assert!(cosine(&login, &auth) > cosine(&login, &css));
    }
}
