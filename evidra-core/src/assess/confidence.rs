//! Calibrated confidence scoring over retrieved evidence.
//!
//! Fixed-weight composition: mean relevance (0.5), mean intrinsic source
//! quality (0.3), source diversity (0.1), plus an additive cross-modal
//! bonus capped at 0.1. The factor breakdown, strongest/weakest labels,
//! and actionable tips are part of the response contract, not logging.

use tracing::debug;

use crate::query::RetrievedChunk;
use crate::types::{ConfidenceBreakdown, ConfidenceFactor, ConfidenceLevel};

/// Medium/Low boundary. The High boundary comes from configuration.
const MEDIUM_THRESHOLD: f32 = 0.4;

const RELEVANCE_WEIGHT: f32 = 0.5;
const SOURCE_QUALITY_WEIGHT: f32 = 0.3;
const DIVERSITY_WEIGHT: f32 = 0.1;
const CROSS_MODAL_BONUS_PER_MODALITY: f32 = 0.1;
const CROSS_MODAL_BONUS_CAP: f32 = 0.1;

pub struct ConfidenceScorer {
    high_threshold: f32,
}

impl ConfidenceScorer {
    pub fn new(high_threshold: f32) -> Self {
        Self { high_threshold }
    }

    pub fn score(&self, retrieved: &[RetrievedChunk]) -> ConfidenceBreakdown {
        if retrieved.is_empty() {
            return ConfidenceBreakdown {
                score: 0.0,
                level: ConfidenceLevel::Low,
                factors: vec![ConfidenceFactor {
                    name: "Evidence".to_string(),
                    score: 0.0,
                    weight: 1.0,
                    description: "No evidence retrieved from the corpus".to_string(),
                }],
                strongest_factor: None,
                weakest_factor: None,
                actionable_tips: vec![
                    "Upload documents covering this topic to the corpus".to_string()
                ],
            };
        }

        let n = retrieved.len() as f32;
        let relevance = retrieved.iter().map(|r| r.relevance).sum::<f32>() / n;
        let source_quality = retrieved.iter().map(|r| r.chunk.confidence).sum::<f32>() / n;

        let unique_sources = retrieved
            .iter()
            .map(|r| r.chunk.source_file.as_str())
            .collect::<std::collections::HashSet<_>>()
            .len();
        let diversity = (unique_sources as f32 / n).min(1.0);

        let distinct_modalities = retrieved
            .iter()
            .map(|r| r.chunk.modality)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let cross_modal_bonus = (CROSS_MODAL_BONUS_PER_MODALITY
            * (distinct_modalities.saturating_sub(1)) as f32)
            .min(CROSS_MODAL_BONUS_CAP);

        let score = (RELEVANCE_WEIGHT * relevance
            + SOURCE_QUALITY_WEIGHT * source_quality
            + DIVERSITY_WEIGHT * diversity
            + cross_modal_bonus)
            .clamp(0.0, 1.0);

        let level = if score >= self.high_threshold {
            ConfidenceLevel::High
        } else if score >= MEDIUM_THRESHOLD {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        };

        let factors = vec![
            ConfidenceFactor {
                name: "Relevance".to_string(),
                score: relevance,
                weight: RELEVANCE_WEIGHT,
                description: format!(
                    "Mean retrieval relevance across {} chunk(s): {relevance:.2}",
                    retrieved.len()
                ),
            },
            ConfidenceFactor {
                name: "Source Quality".to_string(),
                score: source_quality,
                weight: SOURCE_QUALITY_WEIGHT,
                description: format!("Mean intrinsic chunk confidence: {source_quality:.2}"),
            },
            ConfidenceFactor {
                name: "Diversity".to_string(),
                score: diversity,
                weight: DIVERSITY_WEIGHT,
                description: format!("{unique_sources} distinct source file(s)"),
            },
            ConfidenceFactor {
                name: "Cross-Modal Agreement".to_string(),
                score: cross_modal_bonus / CROSS_MODAL_BONUS_CAP,
                weight: CROSS_MODAL_BONUS_CAP,
                description: format!("Evidence spans {distinct_modalities} modality(ies)"),
            },
        ];

        let strongest_factor = factors
            .iter()
            .max_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|f| f.name.clone());
        let weakest_factor = factors
            .iter()
            .min_by(|a, b| a.score.partial_cmp(&b.score).unwrap_or(std::cmp::Ordering::Equal))
            .map(|f| f.name.clone());

        let mut actionable_tips = Vec::new();
        if relevance < 0.5 {
            actionable_tips
                .push("Upload documents more directly related to this topic".to_string());
        }
        if diversity < 0.5 {
            actionable_tips.push(
                "Add sources from additional files to corroborate the answer".to_string(),
            );
        }
        if distinct_modalities <= 1 {
            actionable_tips.push(
                "Add images or audio covering this topic for cross-modal support".to_string(),
            );
        }

        debug!(
            score,
            level = %level,
            relevance,
            source_quality,
            diversity,
            cross_modal_bonus,
            "Confidence assessed"
        );

        ConfidenceBreakdown {
            score,
            level,
            factors,
            strongest_factor,
            weakest_factor,
            actionable_tips,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chunk, Modality, SourceType};
    use std::collections::BTreeSet;

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(0.7)
    }

    fn retrieved(
        id: &str,
        source: &str,
        modality: Modality,
        relevance: f32,
        confidence: f32,
    ) -> RetrievedChunk {
        let mut chunk = Chunk::new(
            modality,
            "content",
            source,
            SourceType::UploadedText,
        );
        chunk.id = id.to_string();
        chunk.confidence = confidence;
        RetrievedChunk {
            chunk,
            relevance,
            reasons: BTreeSet::new(),
        }
    }

    #[test]
    fn test_empty_evidence_is_low() {
        let breakdown = scorer().score(&[]);
        assert_eq!(breakdown.score, 0.0);
        assert_eq!(breakdown.level, ConfidenceLevel::Low);
        assert!(!breakdown.actionable_tips.is_empty());
    }

    #[test]
    fn test_strong_evidence_is_high() {
        let chunks = vec![
            retrieved("a", "manual.txt", Modality::Text, 0.95, 1.0),
            retrieved("b", "label.png", Modality::Image, 0.9, 0.9),
        ];
        let breakdown = scorer().score(&chunks);
        // 0.5*0.925 + 0.3*0.95 + 0.1*1.0 + 0.1 = 0.9475
        assert!(breakdown.score > 0.9);
        assert_eq!(breakdown.level, ConfidenceLevel::High);
    }

    #[test]
    fn test_weights_compose_as_specified() {
        let chunks = vec![retrieved("a", "f.txt", Modality::Text, 0.6, 0.8)];
        let breakdown = scorer().score(&chunks);
        // 0.5*0.6 + 0.3*0.8 + 0.1*1.0 + 0.0 = 0.64
        assert!((breakdown.score - 0.64).abs() < 1e-5);
        assert_eq!(breakdown.level, ConfidenceLevel::Medium);
    }

    #[test]
    fn test_cross_modal_bonus_capped() {
        let chunks = vec![
            retrieved("a", "f.txt", Modality::Text, 0.5, 0.5),
            retrieved("b", "g.png", Modality::Image, 0.5, 0.5),
            retrieved("c", "h.wav", Modality::Audio, 0.5, 0.5),
        ];
        let breakdown = scorer().score(&chunks);
        let bonus_factor = breakdown
            .factors
            .iter()
            .find(|f| f.name == "Cross-Modal Agreement")
            .unwrap();
        // three modalities would give 0.2 uncapped
        assert!((bonus_factor.weight - 0.1).abs() < 1e-6);
        assert!((bonus_factor.score - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_low_level_below_medium_threshold() {
        let chunks = vec![retrieved("a", "f.txt", Modality::Text, 0.2, 0.3)];
        let breakdown = scorer().score(&chunks);
        assert_eq!(breakdown.level, ConfidenceLevel::Low);
    }

    #[test]
    fn test_monotonic_under_stronger_evidence() {
        let base = vec![retrieved("a", "f.txt", Modality::Text, 0.6, 0.7)];
        let before = scorer().score(&base).score;

        let mut more = base.clone();
        more.push(retrieved("b", "new.txt", Modality::Text, 0.9, 0.95));
        let after = scorer().score(&more).score;
        assert!(after >= before, "adding stronger evidence lowered confidence");
    }

    #[test]
    fn test_strongest_and_weakest_factors_identified() {
        let chunks = vec![
            retrieved("a", "f.txt", Modality::Text, 0.9, 0.2),
            retrieved("b", "f.txt", Modality::Text, 0.9, 0.2),
        ];
        let breakdown = scorer().score(&chunks);
        assert!(breakdown.strongest_factor.is_some());
        // same file twice, single modality: weakest is diversity or cross-modal
        let weakest = breakdown.weakest_factor.unwrap();
        assert!(weakest == "Cross-Modal Agreement" || weakest == "Diversity");
    }

    #[test]
    fn test_tips_for_single_modality_single_source() {
        let chunks = vec![retrieved("a", "f.txt", Modality::Text, 0.4, 0.9)];
        let breakdown = scorer().score(&chunks);
        assert!(breakdown
            .actionable_tips
            .iter()
            .any(|t| t.contains("images or audio")));
    }
}
