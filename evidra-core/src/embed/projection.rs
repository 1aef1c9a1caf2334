//! Deterministic projection from raw visual features into the shared
//! embedding space.
//!
//! A visual encoder's native feature vector does not match the text
//! encoder's dimension, so image features are pushed through a fixed
//! linear projection to the shared dimension D. The matrix is generated
//! once from a SHA-256-seeded expansion, persisted next to the index, and
//! loaded on every subsequent startup — embedding an image is then a pure
//! lookup, with no runtime alignment.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::EmbeddingError;

/// Length of the raw visual feature vector produced by the image
/// processors: 16 luminance-weighted bins per RGB channel plus 8 layout
/// statistics.
pub const VISUAL_FEATURE_DIM: usize = 56;

const PROJECTION_FILE: &str = "projection.json";
const SEED_TAG: &[u8] = b"evidra-visual-projection-v1";

/// A fixed `output_dim x VISUAL_FEATURE_DIM` projection matrix.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisualProjection {
    output_dim: usize,
    feature_dim: usize,
    matrix: Vec<Vec<f32>>,
}

impl VisualProjection {
    /// Generate the deterministic matrix for the given output dimension.
    ///
    /// Each cell is derived from SHA-256 of (tag, row, column), mapped to
    /// [-1, 1]. The same dimensions always produce the same matrix.
    pub fn generate(output_dim: usize) -> Self {
        let mut matrix = Vec::with_capacity(output_dim);
        for row in 0..output_dim {
            let mut cells = Vec::with_capacity(VISUAL_FEATURE_DIM);
            for col in 0..VISUAL_FEATURE_DIM {
                let mut hasher = Sha256::new();
                hasher.update(SEED_TAG);
                hasher.update((row as u64).to_le_bytes());
                hasher.update((col as u64).to_le_bytes());
                let digest = hasher.finalize();
                let raw = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
                cells.push((raw as f32 / u32::MAX as f32) * 2.0 - 1.0);
            }
            matrix.push(cells);
        }
        Self {
            output_dim,
            feature_dim: VISUAL_FEATURE_DIM,
            matrix,
        }
    }

    /// Load the persisted matrix from `index_dir`, or generate and persist
    /// it if missing or incompatible with the requested dimension.
    pub fn load_or_create(index_dir: &Path, output_dim: usize) -> Result<Self, EmbeddingError> {
        let path = index_dir.join(PROJECTION_FILE);
        if path.exists() {
            let data = std::fs::read_to_string(&path).map_err(|e| EmbeddingError::Projection {
                message: format!("failed to read {}: {e}", path.display()),
            })?;
            match serde_json::from_str::<VisualProjection>(&data) {
                Ok(loaded)
                    if loaded.output_dim == output_dim
                        && loaded.feature_dim == VISUAL_FEATURE_DIM =>
                {
                    return Ok(loaded);
                }
                Ok(_) => {
                    tracing::warn!(
                        path = %path.display(),
                        "Persisted projection has wrong dimensions, regenerating"
                    );
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Unreadable projection, regenerating");
                }
            }
        }

        let generated = Self::generate(output_dim);
        std::fs::create_dir_all(index_dir).map_err(|e| EmbeddingError::Projection {
            message: format!("failed to create {}: {e}", index_dir.display()),
        })?;
        let json = serde_json::to_string(&generated).map_err(|e| EmbeddingError::Projection {
            message: e.to_string(),
        })?;
        std::fs::write(&path, json).map_err(|e| EmbeddingError::Projection {
            message: format!("failed to write {}: {e}", path.display()),
        })?;
        Ok(generated)
    }

    /// Project a raw feature vector into the shared space. The output is
    /// L2-normalised so cosine comparisons against text vectors behave.
    pub fn project(&self, features: &[f32]) -> Result<Vec<f32>, EmbeddingError> {
        if features.len() != self.feature_dim {
            return Err(EmbeddingError::DimensionMismatch {
                got: features.len(),
                expected: self.feature_dim,
            });
        }
        let mut out: Vec<f32> = self
            .matrix
            .iter()
            .map(|row| row.iter().zip(features).map(|(w, f)| w * f).sum())
            .collect();

        let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut out {
                *v /= norm;
            }
        }
        Ok(out)
    }

    pub fn output_dim(&self) -> usize {
        self.output_dim
    }
}
