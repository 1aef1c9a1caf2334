//! Multimodal ingestion: one uniform chunk model out of heterogeneous
//! files.
//!
//! Every processor obeys the same contract: input a file path, output the
//! complete ordered chunk sequence with `embedding` unset, or raise a
//! [`ProcessingError`](crate::error::ProcessingError) — never a partial
//! commit.

pub mod audio;
pub mod image;
pub mod ocr;
pub mod pdf;
pub mod text;

pub use audio::{AudioProcessor, MockSttEngine, SttEngine, Transcript, TranscriptSegment, WhisperCli};
pub use image::ImageProcessor;
pub use ocr::{MockOcrEngine, OcrEngine, OcrResult, TesseractCli};
pub use pdf::PdfProcessor;
pub use text::TextProcessor;

use std::path::Path;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::ProcessingError;
use crate::language::LanguageService;
use crate::types::Chunk;

/// The file families the ingestion pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Text,
    Docx,
    Pdf,
    Image,
    Audio,
}

/// Classify a path by extension. `None` means unsupported.
pub fn classify(path: &Path) -> Option<FileKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "txt" => Some(FileKind::Text),
        "docx" => Some(FileKind::Docx),
        "pdf" => Some(FileKind::Pdf),
        "png" | "jpg" | "jpeg" | "bmp" | "tif" | "tiff" => Some(FileKind::Image),
        "wav" | "mp3" | "m4a" | "flac" | "ogg" | "aac" => Some(FileKind::Audio),
        _ => None,
    }
}

/// All modality processors behind one dispatch point.
pub struct ProcessorSet {
    text: TextProcessor,
    pdf: PdfProcessor,
    image: ImageProcessor,
    audio: AudioProcessor,
    ocr: Arc<dyn OcrEngine>,
    stt: Arc<dyn SttEngine>,
    language: Arc<LanguageService>,
}

impl ProcessorSet {
    pub fn new(
        config: &EngineConfig,
        ocr: Arc<dyn OcrEngine>,
        stt: Arc<dyn SttEngine>,
        language: Arc<LanguageService>,
    ) -> Self {
        Self {
            text: TextProcessor::new(&config.chunking),
            pdf: PdfProcessor::new(&config.pdf, &config.chunking),
            image: ImageProcessor::new(),
            audio: AudioProcessor::new(),
            ocr,
            stt,
            language,
        }
    }

    /// Replace the audio processor, used by tests to skip ffmpeg decode.
    pub fn with_audio_processor(mut self, audio: AudioProcessor) -> Self {
        self.audio = audio;
        self
    }

    /// Turn a file into its chunk sequence.
    pub async fn process(&self, path: &Path) -> Result<Vec<Chunk>, ProcessingError> {
        let kind = classify(path).ok_or_else(|| ProcessingError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .and_then(|e| e.to_str())
                .unwrap_or("")
                .to_string(),
        })?;

        match kind {
            FileKind::Text | FileKind::Docx => self.text.process(path, &self.language),
            FileKind::Pdf => self.pdf.process(path, &self.language, &*self.ocr).await,
            FileKind::Image => self.image.process(path, &*self.ocr).await,
            FileKind::Audio => self.audio.process(path, &*self.stt).await,
        }
    }
}

/// Collect processor warnings out of chunk metadata: failed-status notes
/// and fallback warnings both surface in the ingest report.
pub fn collect_warnings(chunks: &[Chunk]) -> Vec<String> {
    let mut warnings = Vec::new();
    for chunk in chunks {
        if let Some(note) = chunk.metadata.extra.get("warning") {
            if !warnings.contains(note) {
                warnings.push(note.clone());
            }
        }
        if chunk.metadata.extra.get("status").map(String::as_str) == Some("failed") {
            let note = chunk
                .metadata
                .extra
                .get("note")
                .cloned()
                .unwrap_or_else(|| "processing failed".to_string());
            let message = format!("{}: {note}", chunk.source_file);
            if !warnings.contains(&message) {
                warnings.push(message);
            }
        }
    }
    warnings
}

/// Whether a chunk should be embedded and inserted at all. Failed audio
/// placeholders and other empty-content chunks are reported but never
/// stored.
pub fn is_storable(chunk: &Chunk) -> bool {
    !chunk.content.trim().is_empty()
        && chunk.metadata.extra.get("status").map(String::as_str) != Some("failed")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChunkMetadata, Modality, SourceType};

    #[test]
    fn test_classify_extensions() {
        assert_eq!(classify(Path::new("a.txt")), Some(FileKind::Text));
        assert_eq!(classify(Path::new("a.docx")), Some(FileKind::Docx));
        assert_eq!(classify(Path::new("a.PDF")), Some(FileKind::Pdf));
        assert_eq!(classify(Path::new("a.JPeg")), Some(FileKind::Image));
        assert_eq!(classify(Path::new("a.mp3")), Some(FileKind::Audio));
        assert_eq!(classify(Path::new("a.xlsx")), None);
        assert_eq!(classify(Path::new("noext")), None);
    }

    #[test]
    fn test_is_storable_filters_failed_and_empty() {
        let good = Chunk::new(Modality::Text, "body", "f.txt", SourceType::UploadedText);
        assert!(is_storable(&good));

        let empty = Chunk::new(Modality::Audio, "  ", "f.wav", SourceType::UploadedAudio);
        assert!(!is_storable(&empty));

        let mut metadata = ChunkMetadata::default();
        metadata.extra.insert("status".into(), "failed".into());
        let failed = Chunk::new(Modality::Audio, "x", "f.wav", SourceType::UploadedAudio)
            .with_metadata(metadata);
        assert!(!is_storable(&failed));
    }

    #[test]
    fn test_collect_warnings_dedupes() {
        let mut metadata = ChunkMetadata::default();
        metadata
            .extra
            .insert("warning".into(), "image extraction failed: oops".into());
        let a = Chunk::new(Modality::Text, "x", "f.pdf", SourceType::PdfText)
            .with_metadata(metadata.clone());
        let b = Chunk::new(Modality::Text, "y", "f.pdf", SourceType::PdfText)
            .with_metadata(metadata);
        let warnings = collect_warnings(&[a, b]);
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("image extraction failed"));
    }

    #[test]
    fn test_collect_warnings_failed_audio() {
        let mut metadata = ChunkMetadata::default();
        metadata.extra.insert("status".into(), "failed".into());
        metadata.extra.insert("note".into(), "no speech detected".into());
        let chunk = Chunk::new(Modality::Audio, "", "quiet.wav", SourceType::UploadedAudio)
            .with_metadata(metadata);
        let warnings = collect_warnings(&[chunk]);
        assert_eq!(warnings, vec!["quiet.wav: no speech detected".to_string()]);
    }
}
