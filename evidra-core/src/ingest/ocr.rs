//! OCR engine abstraction.
//!
//! The [`OcrEngine`] trait keeps the pipeline independent of any concrete
//! OCR backend. `TesseractCli` shells out to the `tesseract` binary (TSV
//! output carries per-word confidences); `MockOcrEngine` serves tests with
//! queued results.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::ProcessingError;

/// Result of a single OCR pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OcrResult {
    /// Recognized text, whitespace-joined in reading order.
    pub text: String,
    /// Mean word confidence in [0,1]; 0.0 when nothing was recognized.
    pub confidence: f32,
}

impl OcrResult {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Optical character recognition over raster image bytes.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognize text in an encoded raster image (PNG, JPEG, ...).
    async fn recognize(&self, image_bytes: &[u8]) -> Result<OcrResult, ProcessingError>;

    /// Engine name for logging.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// Tesseract CLI engine
// ---------------------------------------------------------------------------

/// OCR via the external `tesseract` binary. Single pass on the original
/// image, no preprocessing pipeline.
pub struct TesseractCli {
    binary: PathBuf,
    language: String,
}

impl TesseractCli {
    /// Probe for the binary and construct the engine.
    ///
    /// Returns `ProcessingError::DependencyMissing` when `tesseract` is
    /// not runnable.
    pub async fn detect(language: impl Into<String>) -> Result<Self, ProcessingError> {
        let binary = PathBuf::from("tesseract");
        let probe = tokio::process::Command::new(&binary)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match probe {
            Ok(status) if status.success() => Ok(Self {
                binary,
                language: language.into(),
            }),
            Ok(status) => Err(ProcessingError::DependencyMissing {
                binary: "tesseract".into(),
                detail: format!("probe exited with {status}"),
            }),
            Err(e) => Err(ProcessingError::DependencyMissing {
                binary: "tesseract".into(),
                detail: e.to_string(),
            }),
        }
    }

    /// Parse tesseract TSV output into text + mean word confidence.
    fn parse_tsv(tsv: &str) -> OcrResult {
        let mut words: Vec<&str> = Vec::new();
        let mut confidences: Vec<f32> = Vec::new();
        for line in tsv.lines().skip(1) {
            let cols: Vec<&str> = line.split('\t').collect();
            // level ... conf(10) text(11); conf -1 marks non-word rows
            if cols.len() < 12 {
                continue;
            }
            let conf: f32 = cols[10].parse().unwrap_or(-1.0);
            let text = cols[11].trim();
            if conf >= 0.0 && !text.is_empty() {
                words.push(text);
                confidences.push(conf / 100.0);
            }
        }
        if words.is_empty() {
            return OcrResult::default();
        }
        let confidence = confidences.iter().sum::<f32>() / confidences.len() as f32;
        OcrResult {
            text: words.join(" "),
            confidence,
        }
    }
}

#[async_trait]
impl OcrEngine for TesseractCli {
    async fn recognize(&self, image_bytes: &[u8]) -> Result<OcrResult, ProcessingError> {
        let mut child = tokio::process::Command::new(&self.binary)
            .args(["stdin", "stdout", "-l", &self.language, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ProcessingError::DependencyMissing {
                binary: "tesseract".into(),
                detail: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(image_bytes)
                .await
                .map_err(|e| ProcessingError::Corrupt {
                    path: PathBuf::from("<ocr stdin>"),
                    detail: e.to_string(),
                })?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProcessingError::DependencyMissing {
                binary: "tesseract".into(),
                detail: e.to_string(),
            })?;

        if !output.status.success() {
            warn!(status = %output.status, "tesseract exited nonzero, treating as no text");
            return Ok(OcrResult::default());
        }

        let tsv = String::from_utf8_lossy(&output.stdout);
        let result = Self::parse_tsv(&tsv);
        debug!(
            chars = result.text.len(),
            confidence = result.confidence,
            "OCR pass complete"
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "tesseract"
    }
}

/// Placeholder engine used when no OCR backend could be detected at
/// startup: every call reports the missing dependency, so only image
/// ingest is affected.
pub struct UnavailableOcr {
    detail: String,
}

impl UnavailableOcr {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for UnavailableOcr {
    async fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrResult, ProcessingError> {
        Err(ProcessingError::DependencyMissing {
            binary: "tesseract".into(),
            detail: self.detail.clone(),
        })
    }

    fn name(&self) -> &str {
        "unavailable"
    }
}

// ---------------------------------------------------------------------------
// Mock engine
// ---------------------------------------------------------------------------

/// A mock OCR engine for tests: returns queued results in order, then
/// empty results once the queue drains.
pub struct MockOcrEngine {
    responses: std::sync::Mutex<Vec<OcrResult>>,
}

impl MockOcrEngine {
    pub fn new() -> Self {
        Self {
            responses: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn queue(&self, text: impl Into<String>, confidence: f32) {
        self.responses.lock().unwrap().push(OcrResult {
            text: text.into(),
            confidence,
        });
    }
}

impl Default for MockOcrEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OcrEngine for MockOcrEngine {
    async fn recognize(&self, _image_bytes: &[u8]) -> Result<OcrResult, ProcessingError> {
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(OcrResult::default())
        } else {
            Ok(responses.remove(0))
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
