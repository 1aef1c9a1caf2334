//! Fundamental data types: the chunk evidence model, query request and
//! response models, confidence and conflict structures.
//!
//! A [`Chunk`] is the atomic unit of evidence. Every ingested file is
//! decomposed into chunks; every answer cites chunks. Chunks are created by
//! a processor, embedded by the embedding manager, inserted into the vector
//! store, and read-only thereafter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Modality & source types
// ---------------------------------------------------------------------------

/// The kind of content a chunk represents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Image,
    Audio,
}

impl Modality {
    /// All modalities, in search order.
    pub const ALL: [Modality; 3] = [Modality::Text, Modality::Image, Modality::Audio];

    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Image => "image",
            Modality::Audio => "audio",
        }
    }
}

impl std::fmt::Display for Modality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Modality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Modality::Text),
            "image" => Ok(Modality::Image),
            "audio" => Ok(Modality::Audio),
            other => Err(format!("unknown modality '{other}'")),
        }
    }
}

/// Where a chunk's content came from within its source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    UploadedText,
    UploadedImage,
    UploadedAudio,
    PdfText,
    PdfEmbeddedImage,
    PdfImageOcr,
    DocxText,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::UploadedText => "uploaded_text",
            SourceType::UploadedImage => "uploaded_image",
            SourceType::UploadedAudio => "uploaded_audio",
            SourceType::PdfText => "pdf_text",
            SourceType::PdfEmbeddedImage => "pdf_embedded_image",
            SourceType::PdfImageOcr => "pdf_image_ocr",
            SourceType::DocxText => "docx_text",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploaded_text" => Ok(SourceType::UploadedText),
            "uploaded_image" => Ok(SourceType::UploadedImage),
            "uploaded_audio" => Ok(SourceType::UploadedAudio),
            "pdf_text" => Ok(SourceType::PdfText),
            "pdf_embedded_image" => Ok(SourceType::PdfEmbeddedImage),
            "pdf_image_ocr" => Ok(SourceType::PdfImageOcr),
            "docx_text" => Ok(SourceType::DocxText),
            other => Err(format!("unknown source type '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// Typed chunk metadata. Hot fields are first-class so the store can filter
/// on them; anything loose (processor warnings, format hints) goes in
/// `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// 1-based page number for PDF-derived chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    /// 1-based index of an embedded image within its page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_index: Option<u32>,
    /// Ordinal position of the chunk within its document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<u32>,
    /// Detected ISO 639-1 language code of the content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// OCR engine confidence in [0,1], when content came through OCR.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_confidence: Option<f32>,
    /// Number of characters the OCR pass recovered for an image chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ocr_chars: Option<u32>,
    /// Speech-to-text confidence in [0,1], for audio segments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription_confidence: Option<f32>,
    /// Links an OCR-text chunk to the image chunk it was read from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_chunk_id: Option<String>,
    /// Raster format of an image chunk (png, jpeg, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    /// Total duration of the source audio in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f32>,
    /// Segment boundaries in seconds for audio chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_start: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_end: Option<f32>,
    /// Raw visual feature vector for image chunks; projected into the
    /// shared space when the chunk has no usable OCR text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visual_features: Option<Vec<f32>>,
    /// Loose attributes: processor warnings, fallback reasons, notes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

/// The atomic unit of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Stable, corpus-unique identifier.
    pub id: String,
    pub modality: Modality,
    /// Textual representation: natural text for TEXT/AUDIO, a generated
    /// visual description plus any OCR text for IMAGE.
    pub content: String,
    /// Origin file name. Immutable after creation.
    pub source_file: String,
    pub source_type: SourceType,
    #[serde(default)]
    pub metadata: ChunkMetadata,
    /// Vector in the shared embedding space; set by the embedding manager.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    /// Intrinsic quality score in [0,1] assigned at ingest.
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
}

impl Chunk {
    /// Create a chunk with a fresh UUID and no embedding.
    pub fn new(
        modality: Modality,
        content: impl Into<String>,
        source_file: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            modality,
            content: content.into(),
            source_file: source_file.into(),
            source_type,
            metadata: ChunkMetadata::default(),
            embedding: None,
            confidence: 1.0,
            created_at: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_metadata(mut self, metadata: ChunkMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// First `max_chars` characters of the content, on a char boundary.
    pub fn snippet(&self, max_chars: usize) -> String {
        truncate_chars(&self.content, max_chars)
    }
}

/// Truncate a string to at most `max_chars` characters without splitting a
/// UTF-8 code point.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.chars().take(max_chars).collect()
}

// ---------------------------------------------------------------------------
// Source references & confidence
// ---------------------------------------------------------------------------

/// A compact snapshot of a chunk returned with a response for citation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReference {
    pub chunk_id: String,
    pub source_file: String,
    pub content_snippet: String,
    pub relevance_score: f32,
    pub confidence: f32,
    pub modality: Modality,
}

impl SourceReference {
    /// Snapshot a chunk with its retrieval relevance.
    pub fn from_chunk(chunk: &Chunk, relevance_score: f32) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            source_file: chunk.source_file.clone(),
            content_snippet: chunk.snippet(200),
            relevance_score,
            confidence: chunk.confidence,
            modality: chunk.modality,
        }
    }
}

/// Calibrated confidence level for an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceLevel::High => write!(f, "High"),
            ConfidenceLevel::Medium => write!(f, "Medium"),
            ConfidenceLevel::Low => write!(f, "Low"),
        }
    }
}

/// One factor contributing to the confidence score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceFactor {
    pub name: String,
    /// Factor score in [0,1].
    pub score: f32,
    /// Weight applied in the composition.
    pub weight: f32,
    pub description: String,
}

/// Detailed breakdown of how the confidence score was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub score: f32,
    pub level: ConfidenceLevel,
    pub factors: Vec<ConfidenceFactor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strongest_factor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weakest_factor: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actionable_tips: Vec<String>,
}

// ---------------------------------------------------------------------------
// Conflicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    Low,
    Medium,
    High,
}

/// One side of a detected contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Perspective {
    /// Source file the claim came from.
    pub source: String,
    pub claim: String,
}

/// A contradiction between claims from different source files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub description: String,
    pub perspectives: Vec<Perspective>,
    pub severity: ConflictSeverity,
}

// ---------------------------------------------------------------------------
// Query request / response
// ---------------------------------------------------------------------------

/// Upper bound on `top_k` accepted from callers.
pub const MAX_TOP_K: usize = 20;

/// A query against the corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub persona: crate::respond::Persona,
    #[serde(default = "default_true")]
    pub enable_auto_translate: bool,
    /// When set, the response is forced to this language regardless of
    /// what was detected on the query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    /// Forces conflict presentation even without detected conflicts.
    #[serde(default)]
    pub debate: bool,
    #[serde(default = "default_true")]
    pub include_reasoning_chain: bool,
    /// Per-query deadline; the engine checks it on each stage entry.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            persona: crate::respond::Persona::default(),
            enable_auto_translate: true,
            target_language: None,
            top_k: None,
            debate: false,
            include_reasoning_chain: true,
            deadline_ms: None,
        }
    }

    pub fn with_persona(mut self, persona: crate::respond::Persona) -> Self {
        self.persona = persona;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// Translation metadata attached to a response when auto-translate ran.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslationInfo {
    /// ISO code detected on the input query.
    pub detected_language: String,
    pub detected_language_name: String,
    pub detection_confidence: f32,
    /// English form of the query used for retrieval, when it differed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translated_query: Option<String>,
    pub response_translated: bool,
}

/// The complete answer to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query: String,
    /// Answer text with inline `[n]` citations.
    pub answer: String,
    pub confidence: ConfidenceLevel,
    pub confidence_score: f32,
    pub confidence_breakdown: ConfidenceBreakdown,
    pub sources: Vec<SourceReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<Conflict>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refusal_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation_info: Option<TranslationInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_chain: Option<crate::chain::ReasoningChain>,
    pub processing_time_ms: u64,
}

// ---------------------------------------------------------------------------
// Ingest report & corpus stats
// ---------------------------------------------------------------------------

/// Result of ingesting one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub source_file: String,
    pub chunks_created: usize,
    /// Modalities present among the created chunks.
    pub modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// Corpus-level counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorpusStats {
    pub total_chunks: usize,
    pub per_modality_counts: BTreeMap<Modality, usize>,
}

/// A supported language with display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageInfo {
    pub code: String,
    pub name: String,
    pub flag: String,
}
