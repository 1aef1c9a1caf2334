//! Cross-modal embedding: one shared vector space for every chunk and
//! every query.
//!
//! Policy:
//! - TEXT and AUDIO chunks are embedded from their content by the text
//!   encoder (audio content is its transcript).
//! - IMAGE chunks with at least [`OCR_EMBED_THRESHOLD`] characters of OCR
//!   text embed their content with the text encoder; otherwise their raw
//!   visual features are pushed through the fixed projection.
//! - Queries always use the text encoder, whatever modality they target.
//!
//! Batches are all-or-nothing: a failure anywhere leaves every chunk
//! untouched.

pub mod encoder;
pub mod projection;

pub use encoder::{cosine_similarity, create_encoder, HashEncoder, TextEncoder};
pub use projection::{VisualProjection, VISUAL_FEATURE_DIM};

use std::sync::Arc;
use tracing::debug;

use crate::error::EmbeddingError;
use crate::types::{Chunk, Modality};

/// Minimum OCR characters for an image chunk to be embedded as text.
pub const OCR_EMBED_THRESHOLD: u32 = 20;

/// Produces a vector in the shared space for any chunk or query.
pub struct EmbeddingManager {
    encoder: Arc<dyn TextEncoder>,
    projection: VisualProjection,
    batch_size: usize,
}

impl EmbeddingManager {
    pub fn new(
        encoder: Arc<dyn TextEncoder>,
        projection: VisualProjection,
        batch_size: usize,
    ) -> Result<Self, EmbeddingError> {
        if encoder.dimension() != projection.output_dim() {
            return Err(EmbeddingError::DimensionMismatch {
                got: projection.output_dim(),
                expected: encoder.dimension(),
            });
        }
        Ok(Self {
            encoder,
            projection,
            batch_size: batch_size.max(1),
        })
    }

    /// The shared space dimension D.
    pub fn dimension(&self) -> usize {
        self.encoder.dimension()
    }

    /// Set `embedding` on every chunk with non-empty textual content.
    ///
    /// Chunks with empty content are skipped (the caller decides whether
    /// they are inserted at all). Nothing is mutated if any batch fails.
    pub fn embed_chunks(&self, chunks: &mut [Chunk]) -> Result<(), EmbeddingError> {
        // Partition: indices embedded as text vs. via projection.
        let mut text_indices: Vec<usize> = Vec::new();
        let mut computed: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];

        for (i, chunk) in chunks.iter().enumerate() {
            if chunk.content.trim().is_empty() {
                continue;
            }
            if self.embeds_as_text(chunk) {
                text_indices.push(i);
            } else if let Some(features) = &chunk.metadata.visual_features {
                computed[i] = Some(self.projection.project(features)?);
            } else {
                // Image without features falls back to its descriptor text.
                text_indices.push(i);
            }
        }

        for batch in text_indices.chunks(self.batch_size) {
            let texts: Vec<&str> = batch.iter().map(|&i| chunks[i].content.as_str()).collect();
            let vectors = self.encoder.encode_batch(&texts)?;
            if vectors.len() != texts.len() {
                return Err(EmbeddingError::BatchFailed {
                    encoder: self.encoder.name().to_string(),
                    batch_size: texts.len(),
                    message: format!("encoder returned {} vectors", vectors.len()),
                });
            }
            for (&i, vector) in batch.iter().zip(vectors) {
                if vector.len() != self.dimension() {
                    return Err(EmbeddingError::DimensionMismatch {
                        got: vector.len(),
                        expected: self.dimension(),
                    });
                }
                computed[i] = Some(vector);
            }
        }

        // All vectors computed; only now mutate the chunks.
        let mut embedded = 0usize;
        for (chunk, vector) in chunks.iter_mut().zip(computed) {
            if let Some(vector) = vector {
                chunk.embedding = Some(vector);
                embedded += 1;
            }
        }
        debug!(embedded, total = chunks.len(), "Embedded chunk batch");
        Ok(())
    }

    /// Embed a query. Queries are text, so the text encoder is always
    /// used regardless of which modalities will be searched.
    pub fn embed_query(&self, text: &str) -> Vec<f32> {
        self.encoder.encode(text)
    }

    fn embeds_as_text(&self, chunk: &Chunk) -> bool {
        match chunk.modality {
            Modality::Text | Modality::Audio => true,
            Modality::Image => chunk.metadata.ocr_chars.unwrap_or(0) >= OCR_EMBED_THRESHOLD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, SourceType};

    fn manager(dim: usize) -> EmbeddingManager {
        EmbeddingManager::new(
            Arc::new(HashEncoder::new(dim)),
            VisualProjection::generate(dim),
            8,
        )
        .unwrap()
    }

    fn text_chunk(content: &str) -> Chunk {
        Chunk::new(Modality::Text, content, "doc.txt", SourceType::UploadedText)
    }

    #[test]
    fn test_dimension_mismatch_rejected_at_construction() {
        let result = EmbeddingManager::new(
            Arc::new(HashEncoder::new(384)),
            VisualProjection::generate(128),
            8,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_text_chunks_embedded_at_declared_dimension() {
        let mgr = manager(384);
        let mut chunks = vec![text_chunk("voltage is 220V"), text_chunk("reset procedure")];
        mgr.embed_chunks(&mut chunks).unwrap();
        for chunk in &chunks {
            assert_eq!(chunk.embedding.as_ref().unwrap().len(), 384);
        }
    }

    #[test]
    fn test_empty_content_not_embedded() {
        let mgr = manager(64);
        let mut chunks = vec![text_chunk("   ")];
        mgr.embed_chunks(&mut chunks).unwrap();
        assert!(chunks[0].embedding.is_none());
    }

    #[test]
    fn test_audio_embedded_as_transcript_text() {
        let mgr = manager(64);
        let mut chunks = vec![Chunk::new(
            Modality::Audio,
            "the meeting starts at nine",
            "talk.wav",
            SourceType::UploadedAudio,
        )];
        mgr.embed_chunks(&mut chunks).unwrap();
        let audio_vec = chunks[0].embedding.clone().unwrap();
        // Identical text through the text encoder gives the same vector.
        assert_eq!(audio_vec, mgr.embed_query("the meeting starts at nine"));
    }

    #[test]
    fn test_image_with_ocr_embeds_as_text() {
        let mgr = manager(64);
        let mut chunk = Chunk::new(
            Modality::Image,
            "Image label.png. Extracted text: MACHINE LABEL Voltage: 110V",
            "label.png",
            SourceType::UploadedImage,
        );
        chunk.metadata = ChunkMetadata {
            ocr_chars: Some(30),
            visual_features: Some(vec![0.5; VISUAL_FEATURE_DIM]),
            ..Default::default()
        };
        let mut chunks = vec![chunk];
        mgr.embed_chunks(&mut chunks).unwrap();
        let embedded = chunks[0].embedding.clone().unwrap();
        assert_eq!(embedded, mgr.embed_query(&chunks[0].content));
    }

    #[test]
    fn test_image_without_ocr_uses_projection() {
        let mgr = manager(64);
        let mut chunk = Chunk::new(
            Modality::Image,
            "Image photo.png. 800x600 pixels, landscape orientation.",
            "photo.png",
            SourceType::UploadedImage,
        );
        chunk.metadata = ChunkMetadata {
            ocr_chars: Some(0),
            visual_features: Some(vec![0.25; VISUAL_FEATURE_DIM]),
            ..Default::default()
        };
        let mut chunks = vec![chunk];
        mgr.embed_chunks(&mut chunks).unwrap();
        let embedded = chunks[0].embedding.clone().unwrap();
        assert_eq!(embedded.len(), 64);
        // Projection output differs from text-encoding the descriptor.
        assert_ne!(embedded, mgr.embed_query(&chunks[0].content));
    }

    #[test]
    fn test_batch_failure_leaves_chunks_untouched() {
        struct BadEncoder;
        impl TextEncoder for BadEncoder {
            fn encode(&self, _text: &str) -> Vec<f32> {
                vec![0.0; 8]
            }
            fn encode_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
                Err(EmbeddingError::BatchFailed {
                    encoder: "bad".into(),
                    batch_size: texts.len(),
                    message: "backend down".into(),
                })
            }
            fn dimension(&self) -> usize {
                8
            }
            fn name(&self) -> &str {
                "bad"
            }
        }

        let mgr =
            EmbeddingManager::new(Arc::new(BadEncoder), VisualProjection::generate(8), 4).unwrap();
        let mut chunks = vec![text_chunk("a"), text_chunk("b")];
        assert!(mgr.embed_chunks(&mut chunks).is_err());
        assert!(chunks.iter().all(|c| c.embedding.is_none()));
    }

    #[test]
    fn test_query_embedding_matches_dimension() {
        let mgr = manager(384);
        assert_eq!(mgr.embed_query("show me the diagram").len(), 384);
    }
}
