//! Error types for the Evidra core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering ingestion, embedding, storage, translation, generation, and
//! engine-level domains. Leaf errors propagate up to the orchestrator,
//! which converts them into structured refusal responses; nothing escapes
//! to callers as an unstructured failure.

use std::path::PathBuf;

/// Top-level error type for the Evidra core library.
#[derive(Debug, thiserror::Error)]
pub enum EvidraError {
    #[error("Processing error: {0}")]
    Processing(#[from] ProcessingError),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Translation error: {0}")]
    Translation(#[from] TranslationError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Engine is at capacity, try again later")]
    Busy,

    #[error("Query cancelled: {reason}")]
    Cancelled { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while turning a file into chunks.
///
/// Processors never partially commit: either the full chunk sequence is
/// returned or one of these is raised and the corpus is unchanged.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error("Unsupported format '{extension}' for {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("File {path} is corrupt or unreadable: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("Required dependency '{binary}' is missing: {detail}")]
    DependencyMissing { binary: String, detail: String },
}

/// Errors from embedding computation.
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Encoder '{encoder}' failed on batch of {batch_size}: {message}")]
    BatchFailed {
        encoder: String,
        batch_size: usize,
        message: String,
    },

    #[error("Vector dimension mismatch: got {got}, expected {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("Projection error: {message}")]
    Projection { message: String },
}

/// Errors from the vector store.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Chunk '{id}' has no embedding")]
    MissingEmbedding { id: String },

    #[error("Duplicate chunk id '{id}'")]
    DuplicateId { id: String },

    #[error("Store IO error: {message}")]
    Io { message: String },
}

/// Errors from language detection and translation.
///
/// Translation failures are non-fatal at the pipeline level: the caller
/// proceeds with the original text and records a warning step.
#[derive(Debug, thiserror::Error)]
pub enum TranslationError {
    #[error("Translation provider unavailable: {message}")]
    Unavailable { message: String },

    #[error("Translation request failed ({source_lang} -> {target_lang}): {message}")]
    RequestFailed {
        source_lang: String,
        target_lang: String,
        message: String,
    },

    #[error("Unsupported language code '{code}'")]
    UnsupportedLanguage { code: String },
}

/// Errors from LLM generation.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("Provider '{provider}' request failed: {message}")]
    ProviderFailed { provider: String, message: String },

    #[error("Provider '{provider}' returned empty output")]
    EmptyOutput { provider: String },

    #[error("Provider '{provider}' timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Authentication failed for provider '{provider}'")]
    AuthFailed { provider: String },

    #[error("All providers failed: {summary}")]
    AllProvidersFailed { summary: String },

    #[error("Generation deadline of {deadline_ms}ms exceeded")]
    DeadlineExceeded { deadline_ms: u64 },
}

/// Convenience result alias used across the crate.
pub type Result<T> = std::result::Result<T, EvidraError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_includes_context() {
        let err = ProcessingError::DependencyMissing {
            binary: "tesseract".into(),
            detail: "not found in PATH".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tesseract"));
        assert!(msg.contains("not found in PATH"));
    }

    #[test]
    fn test_error_conversion_to_top_level() {
        let err: EvidraError = EmbeddingError::DimensionMismatch {
            got: 128,
            expected: 384,
        }
        .into();
        assert!(matches!(err, EvidraError::Embedding(_)));
        assert!(err.to_string().contains("384"));
    }

    #[test]
    fn test_storage_error_from_rusqlite() {
        let inner = rusqlite::Error::InvalidQuery;
        let err: EvidraError = StorageError::from(inner).into();
        assert!(matches!(err, EvidraError::Storage(_)));
    }

    #[test]
    fn test_generation_all_failed_summary() {
        let err = GenerationError::AllProvidersFailed {
            summary: "gemini: timeout | ollama: connection refused".into(),
        };
        assert!(err.to_string().contains("ollama"));
    }
}
