//! Configuration system for the Evidra engine.
//!
//! Uses `figment` for layered configuration: defaults -> `evidra.toml` in
//! the data directory -> `EVIDRA_*` environment variables. Every knob the
//! engine recognizes lives here; components receive their section by value
//! at startup and never re-read the environment.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub pdf: PdfConfig,
    pub retrieval: RetrievalConfig,
    pub llm: LlmConfig,
    pub translation: TranslationConfig,
    pub storage: StorageConfig,
    pub ingest: IngestConfig,
}

/// Shared embedding space configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Dimension of the shared vector space. Every chunk and query vector
    /// has exactly this length.
    pub vector_dim: usize,
    /// Encoder backend: "hash" (deterministic, always available) or
    /// "fastembed" (requires the `semantic` feature).
    pub encoder: String,
    /// Optional model name for the fastembed backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Maximum texts per encode batch.
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            vector_dim: 384,
            encoder: "hash".to_string(),
            model: None,
            batch_size: 32,
        }
    }
}

/// Text chunking parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size in characters.
    pub text_chunk_size: usize,
    /// Overlap carried between consecutive chunks, in characters.
    pub text_chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            text_chunk_size: 500,
            text_chunk_overlap: 50,
        }
    }
}

/// PDF container extraction parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PdfConfig {
    /// Whether to extract embedded raster images.
    pub extract_images: bool,
    /// Minimum width and height for an embedded image to be kept.
    pub min_image_size: u32,
    /// Cap on extracted images per page.
    pub max_images_per_page: usize,
}

impl Default for PdfConfig {
    fn default() -> Self {
        Self {
            extract_images: true,
            min_image_size: 100,
            max_images_per_page: 10,
        }
    }
}

/// Retrieval and scoring parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Results returned when the caller does not ask for a specific k.
    pub default_top_k: usize,
    /// High/Medium boundary for the confidence level.
    pub confidence_threshold: f32,
    /// Maximum retrieval passes (the second pass widens the candidate
    /// pool when mean relevance is poor).
    pub max_retrieval_iterations: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_top_k: 5,
            confidence_threshold: 0.7,
            max_retrieval_iterations: 2,
        }
    }
}

/// One LLM provider endpoint in the failover chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmProviderConfig {
    /// Provider kind: "openai-compat" or "gemini".
    pub kind: String,
    /// Model identifier, e.g. "llama3.2:3b" or "gemini-2.0-flash".
    pub model: String,
    /// Base URL override (Ollama, OpenRouter, vLLM, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    pub api_key_env: String,
}

/// LLM client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ordered provider chain; the first healthy provider wins.
    pub providers: Vec<LlmProviderConfig>,
    /// Total wall-clock budget for one generation across the whole chain.
    pub deadline_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                LlmProviderConfig {
                    kind: "gemini".to_string(),
                    model: "gemini-2.0-flash".to_string(),
                    base_url: None,
                    api_key_env: "GEMINI_API_KEY".to_string(),
                },
                LlmProviderConfig {
                    kind: "openai-compat".to_string(),
                    model: "llama3.2:3b".to_string(),
                    base_url: Some("http://localhost:11434/v1".to_string()),
                    api_key_env: "OLLAMA_API_KEY".to_string(),
                },
            ],
            deadline_ms: 120_000,
        }
    }
}

/// Translation layer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslationConfig {
    pub enabled: bool,
    /// LibreTranslate-compatible endpoint.
    pub endpoint: String,
    /// Environment variable holding the endpoint API key, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "http://localhost:5000/translate".to_string(),
            api_key_env: None,
        }
    }
}

/// On-disk layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the vector index and projection matrix.
    pub index_dir: PathBuf,
    /// Directory holding uploaded source files, keyed by file name.
    pub uploads_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./data/index"),
            uploads_dir: PathBuf::from("./data/uploads"),
        }
    }
}

/// Ingestion throttling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Maximum ingests running at once; further requests fail fast with
    /// a Busy error rather than queueing silently.
    pub max_concurrent: usize,
    /// Chunks per vector-store insert batch.
    pub insert_batch_size: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            insert_batch_size: 64,
        }
    }
}

/// Load configuration: defaults -> `evidra.toml` in `data_dir` (if given)
/// -> `EVIDRA_*` environment variables.
///
/// Environment keys use `__` as the section separator, e.g.
/// `EVIDRA_EMBEDDING__VECTOR_DIM=512`, `EVIDRA_PDF__EXTRACT_IMAGES=false`,
/// `EVIDRA_LLM__DEADLINE_MS=60000`.
pub fn load_config(data_dir: Option<&Path>) -> Result<EngineConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(EngineConfig::default()));

    if let Some(dir) = data_dir {
        let file = dir.join("evidra.toml");
        if file.exists() {
            figment = figment.merge(Toml::file(&file));
        }
    }

    figment = figment.merge(Env::prefixed("EVIDRA_").split("__"));

    figment.extract().map_err(Box::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.embedding.vector_dim, 384);
        assert_eq!(config.chunking.text_chunk_size, 500);
        assert_eq!(config.chunking.text_chunk_overlap, 50);
        assert!(config.pdf.extract_images);
        assert_eq!(config.pdf.min_image_size, 100);
        assert_eq!(config.pdf.max_images_per_page, 10);
        assert_eq!(config.retrieval.default_top_k, 5);
        assert_eq!(config.llm.deadline_ms, 120_000);
        assert!(config.translation.enabled);
    }

    #[test]
    fn test_provider_chain_has_order() {
        let config = EngineConfig::default();
        assert_eq!(config.llm.providers.len(), 2);
        assert_eq!(config.llm.providers[0].kind, "gemini");
        assert_eq!(config.llm.providers[1].kind, "openai-compat");
    }

    #[test]
    fn test_load_config_without_file() {
        let config = load_config(None).unwrap();
        assert_eq!(config.embedding.vector_dim, 384);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("evidra.toml"),
            "[embedding]\nvector_dim = 512\n\n[pdf]\nextract_images = false\n",
        )
        .unwrap();
        let config = load_config(Some(dir.path())).unwrap();
        assert_eq!(config.embedding.vector_dim, 512);
        assert!(!config.pdf.extract_images);
        // untouched sections keep defaults
        assert_eq!(config.retrieval.default_top_k, 5);
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.embedding.vector_dim, config.embedding.vector_dim);
        assert_eq!(back.llm.providers.len(), config.llm.providers.len());
    }
}
