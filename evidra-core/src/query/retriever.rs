//! Cross-modal retrieval: per-modality candidate search, hybrid keyword
//! boosting, cross-modal reinforcement, and re-ranking.
//!
//! Retrieval is single-pass by default. A second, wider pass runs only
//! when the first pass's mean relevance falls below a floor, and there is
//! never a third.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::RetrievalConfig;
use crate::embed::EmbeddingManager;
use crate::query::analyzer::AnalyzedQuery;
use crate::respond::Persona;
use crate::store::{ChunkFilter, VectorStore};
use crate::types::{Chunk, Modality, SourceType};

/// Why a candidate scored the way it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum BoostReason {
    Semantic,
    KeywordBoost,
    CrossModalBoost,
    PersonaHint,
    LanguageMatch,
}

/// A retrieval result: the chunk, its final relevance, and the reasons.
#[derive(Debug, Clone)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub relevance: f32,
    pub reasons: BTreeSet<BoostReason>,
}

/// Mean top-k relevance below this triggers the single second pass.
const SECOND_PASS_FLOOR: f32 = 0.3;
/// An image candidate above this floor is guaranteed a top-k slot when the
/// query asked for images.
const IMAGE_INCLUSION_FLOOR: f32 = 0.35;
/// Per-keyword-match boost increment, capped.
const KEYWORD_BOOST_PER_MATCH: f32 = 0.1;
const KEYWORD_BOOST_CAP: f32 = 0.5;
/// Reinforcement when a source file shows up in two or more modalities.
const CROSS_MODAL_BOOST: f32 = 1.1;
/// Mild preference for chunks in the query's own language.
const LANGUAGE_MATCH_BOOST: f32 = 1.05;
/// Mild preference for document-grade sources under formal personas.
const PERSONA_HINT_BOOST: f32 = 1.05;

pub struct CrossModalRetriever {
    store: Arc<VectorStore>,
    embeddings: Arc<EmbeddingManager>,
    config: RetrievalConfig,
}

impl CrossModalRetriever {
    pub fn new(
        store: Arc<VectorStore>,
        embeddings: Arc<EmbeddingManager>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            store,
            embeddings,
            config,
        }
    }

    /// Retrieve the top `top_k` chunks for an analyzed query.
    ///
    /// `query_language` is the detected language of the original query,
    /// used for the language-match boost.
    pub fn retrieve(
        &self,
        analyzed: &AnalyzedQuery,
        query_language: &str,
        top_k: usize,
    ) -> Vec<RetrievedChunk> {
        let query_vector = self.embeddings.embed_query(&analyzed.query);

        let mut results = self.run_pass(analyzed, query_language, &query_vector, top_k, top_k * 2);

        let mean: f32 = if results.is_empty() {
            0.0
        } else {
            results.iter().map(|r| r.relevance).sum::<f32>() / results.len() as f32
        };
        if mean < SECOND_PASS_FLOOR && self.config.max_retrieval_iterations > 1 {
            debug!(mean, "Mean relevance below floor, widening candidate pool");
            results = self.run_pass(analyzed, query_language, &query_vector, top_k, top_k * 3);
        }

        info!(
            results = results.len(),
            modalities = results
                .iter()
                .map(|r| r.chunk.modality)
                .collect::<BTreeSet<_>>()
                .len(),
            "Retrieval complete"
        );
        results
    }

    fn run_pass(
        &self,
        analyzed: &AnalyzedQuery,
        query_language: &str,
        query_vector: &[f32],
        top_k: usize,
        candidates_per_modality: usize,
    ) -> Vec<RetrievedChunk> {
        // Per-modality candidate fetch, deduplicated by chunk id.
        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<RetrievedChunk> = Vec::new();
        for &modality in &analyzed.required_modalities {
            let hits = self.store.search(
                query_vector,
                candidates_per_modality,
                &ChunkFilter::by_modality(modality),
            );
            for (chunk, similarity) in hits {
                if !seen.insert(chunk.id.clone()) {
                    continue;
                }
                // cosine in [-1,1] mapped to [0,1]
                let relevance = (similarity + 1.0) / 2.0;
                let mut reasons = BTreeSet::new();
                reasons.insert(BoostReason::Semantic);
                candidates.push(RetrievedChunk {
                    chunk,
                    relevance,
                    reasons,
                });
            }
        }

        self.apply_keyword_boost(analyzed, &mut candidates);
        self.apply_cross_modal_boost(&mut candidates);
        self.apply_language_boost(query_language, &mut candidates);
        self.apply_persona_hint(analyzed.persona, &mut candidates);

        for candidate in &mut candidates {
            candidate.relevance = candidate.relevance.min(1.0);
        }

        rerank(&mut candidates);
        let mut top: Vec<RetrievedChunk> = candidates
            .iter()
            .take(top_k)
            .cloned()
            .collect();

        self.ensure_image_presence(analyzed, &candidates, &mut top, top_k);
        top
    }

    /// Multiply relevance by `1 + min(cap, 0.1 * matches)` when analyzer
    /// keywords appear as whole words in the content.
    fn apply_keyword_boost(&self, analyzed: &AnalyzedQuery, candidates: &mut [RetrievedChunk]) {
        if analyzed.keywords.is_empty() {
            return;
        }
        for candidate in candidates.iter_mut() {
            let words: HashSet<String> = candidate
                .chunk
                .content
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| !w.is_empty())
                .map(|w| w.to_string())
                .collect();
            let matches = analyzed
                .keywords
                .iter()
                .filter(|k| words.contains(k.as_str()))
                .count();
            if matches > 0 {
                let boost =
                    1.0 + (KEYWORD_BOOST_PER_MATCH * matches as f32).min(KEYWORD_BOOST_CAP);
                candidate.relevance *= boost;
                candidate.reasons.insert(BoostReason::KeywordBoost);
            }
        }
    }

    /// Reinforce chunks whose source file is present in two or more
    /// modalities within the candidate pool.
    fn apply_cross_modal_boost(&self, candidates: &mut [RetrievedChunk]) {
        let mut modalities_by_file: HashMap<String, BTreeSet<Modality>> = HashMap::new();
        for candidate in candidates.iter() {
            modalities_by_file
                .entry(candidate.chunk.source_file.clone())
                .or_default()
                .insert(candidate.chunk.modality);
        }
        for candidate in candidates.iter_mut() {
            if modalities_by_file[&candidate.chunk.source_file].len() >= 2 {
                candidate.relevance *= CROSS_MODAL_BOOST;
                candidate.reasons.insert(BoostReason::CrossModalBoost);
            }
        }
    }

    fn apply_language_boost(&self, query_language: &str, candidates: &mut [RetrievedChunk]) {
        if query_language.is_empty() {
            return;
        }
        for candidate in candidates.iter_mut() {
            if candidate.chunk.metadata.language.as_deref() == Some(query_language) {
                candidate.relevance *= LANGUAGE_MATCH_BOOST;
                candidate.reasons.insert(BoostReason::LanguageMatch);
            }
        }
    }

    /// Formal personas lean toward document-grade sources.
    fn apply_persona_hint(&self, persona: Persona, candidates: &mut [RetrievedChunk]) {
        if !matches!(persona, Persona::Academic | Persona::Technical | Persona::Legal) {
            return;
        }
        for candidate in candidates.iter_mut() {
            if matches!(
                candidate.chunk.source_type,
                SourceType::PdfText | SourceType::DocxText
            ) {
                candidate.relevance *= PERSONA_HINT_BOOST;
                candidate.reasons.insert(BoostReason::PersonaHint);
            }
        }
    }

    /// When the query asked for images (or the leader is one), guarantee
    /// one image slot in the top-k if any image candidate clears the
    /// relevance floor, by placing the best image candidate last.
    fn ensure_image_presence(
        &self,
        analyzed: &AnalyzedQuery,
        candidates: &[RetrievedChunk],
        top: &mut Vec<RetrievedChunk>,
        top_k: usize,
    ) {
        let wants_images = analyzed.required_modalities.contains(&Modality::Image)
            || top
                .first()
                .map(|r| r.chunk.modality == Modality::Image)
                .unwrap_or(false);
        if !wants_images || top.iter().any(|r| r.chunk.modality == Modality::Image) {
            return;
        }
        let best_image = candidates
            .iter()
            .filter(|r| r.chunk.modality == Modality::Image)
            .max_by(|a, b| {
                a.relevance
                    .partial_cmp(&b.relevance)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        if let Some(best) = best_image {
            if best.relevance > IMAGE_INCLUSION_FLOOR {
                if top.len() >= top_k && !top.is_empty() {
                    top.pop();
                }
                top.push(best.clone());
            }
        }
    }
}

/// Descending relevance; ties go to higher intrinsic confidence, then
/// lexicographic id.
fn rerank(candidates: &mut [RetrievedChunk]) {
    candidates.sort_by(|a, b| {
        b.relevance
            .partial_cmp(&a.relevance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.chunk
                    .confidence
                    .partial_cmp(&a.chunk.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}
