//! Text encoders for the shared embedding space.
//!
//! The [`TextEncoder`] trait abstracts over embedding backends. The
//! deterministic hash/TF encoder is always available and needs no model
//! downloads; a fastembed-based sentence encoder sits behind the
//! `semantic` cargo feature.

use std::collections::HashMap;

use crate::error::EmbeddingError;

/// Trait for text embedding backends. All vectors share one dimension.
pub trait TextEncoder: Send + Sync {
    /// Encode a single text into a vector of [`TextEncoder::dimension`] length.
    fn encode(&self, text: &str) -> Vec<f32>;

    /// Encode a batch of texts. The default implementation maps `encode`;
    /// backends with native batching override this.
    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|t| self.encode(t)).collect())
    }

    /// Dimensionality of produced vectors.
    fn dimension(&self) -> usize;

    /// Backend name for logging.
    fn name(&self) -> &str;
}

/// Deterministic bag-of-words encoder: each term is hashed to a dimension,
/// term frequencies accumulate, and the vector is L2-normalised. Identical
/// text always encodes to the identical vector.
#[derive(Debug, Clone)]
pub struct HashEncoder {
    dimension: usize,
}

impl HashEncoder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

fn term_hash(s: &str) -> usize {
    let mut hash: usize = 5381;
    for b in s.bytes() {
        hash = hash.wrapping_mul(33).wrapping_add(b as usize);
    }
    hash
}

impl TextEncoder for HashEncoder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];

        let lowered = text.to_lowercase();
        let words: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();

        if words.is_empty() {
            return vector;
        }

        let mut tf: HashMap<&str, usize> = HashMap::new();
        for word in &words {
            *tf.entry(word).or_insert(0) += 1;
        }

        for (term, count) in &tf {
            let idx = term_hash(term) % self.dimension;
            vector[idx] += *count as f32;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }

        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Sentence encoder backed by fastembed ONNX models.
#[cfg(feature = "semantic")]
pub struct FastEmbedEncoder {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

#[cfg(feature = "semantic")]
impl FastEmbedEncoder {
    pub fn new(model_name: Option<&str>) -> Result<Self, EmbeddingError> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model_enum = match model_name {
            Some("all-MiniLM-L6-v2") | None => EmbeddingModel::AllMiniLML6V2,
            Some("bge-small-en-v1.5") => EmbeddingModel::BGESmallENV15,
            Some(other) => {
                tracing::warn!(model = other, "Unknown fastembed model, using AllMiniLML6V2");
                EmbeddingModel::AllMiniLML6V2
            }
        };

        let model = TextEmbedding::try_new(
            InitOptions::new(model_enum).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::BatchFailed {
            encoder: "fastembed".into(),
            batch_size: 0,
            message: e.to_string(),
        })?;

        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimension: 384,
        })
    }
}

#[cfg(feature = "semantic")]
impl TextEncoder for FastEmbedEncoder {
    fn encode(&self, text: &str) -> Vec<f32> {
        let mut model = self.model.lock().unwrap();
        match model.embed(vec![text], None) {
            Ok(mut vecs) if !vecs.is_empty() => vecs.remove(0),
            _ => vec![0.0; self.dimension],
        }
    }

    fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let mut model = self.model.lock().unwrap();
        model
            .embed(owned, None)
            .map_err(|e| EmbeddingError::BatchFailed {
                encoder: "fastembed".into(),
                batch_size: texts.len(),
                message: e.to_string(),
            })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "fastembed"
    }
}

/// Instantiate the encoder named in the configuration.
pub fn create_encoder(
    config: &crate::config::EmbeddingConfig,
) -> Result<std::sync::Arc<dyn TextEncoder>, EmbeddingError> {
    match config.encoder.as_str() {
        "hash" => Ok(std::sync::Arc::new(HashEncoder::new(config.vector_dim))),
        #[cfg(feature = "semantic")]
        "fastembed" => Ok(std::sync::Arc::new(FastEmbedEncoder::new(
            config.model.as_deref(),
        )?)),
        #[cfg(not(feature = "semantic"))]
        "fastembed" => {
            tracing::warn!(
                "fastembed encoder requested without the 'semantic' feature, using hash encoder"
            );
            Ok(std::sync::Arc::new(HashEncoder::new(config.vector_dim)))
        }
        other => Err(EmbeddingError::BatchFailed {
            encoder: other.to_string(),
            batch_size: 0,
            message: "unknown encoder backend".into(),
        }),
    }
}

/// Cosine similarity between two equal-length vectors, 0.0 on mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
