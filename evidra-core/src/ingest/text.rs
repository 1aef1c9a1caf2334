//! Text document processor for `.txt` and `.docx` files.
//!
//! Splits on sentence boundaries into chunks of a target character size
//! with a configurable overlap carried between consecutive chunks.
//! Paragraph order is preserved via `metadata.order`. The document
//! language is detected once per file and stamped on every chunk.

use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

use crate::config::ChunkingConfig;
use crate::error::ProcessingError;
use crate::language::LanguageService;
use crate::types::{Chunk, ChunkMetadata, Modality, SourceType};

/// Hard ceiling on bytes decompressed from a single DOCX zip entry.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub struct TextProcessor {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl TextProcessor {
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.text_chunk_size.max(1),
            chunk_overlap: config.text_chunk_overlap,
        }
    }

    /// Process a `.txt` or `.docx` file into TEXT chunks.
    pub fn process(
        &self,
        path: &Path,
        language: &LanguageService,
    ) -> Result<Vec<Chunk>, ProcessingError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_ascii_lowercase();
        let (text, source_type) = match extension.as_str() {
            "txt" => {
                let bytes = std::fs::read(path).map_err(|e| ProcessingError::Corrupt {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })?;
                (
                    String::from_utf8_lossy(&bytes).into_owned(),
                    SourceType::UploadedText,
                )
            }
            "docx" => {
                let bytes = std::fs::read(path).map_err(|e| ProcessingError::Corrupt {
                    path: path.to_path_buf(),
                    detail: e.to_string(),
                })?;
                (extract_docx_text(&bytes, path)?, SourceType::DocxText)
            }
            other => {
                return Err(ProcessingError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    extension: other.to_string(),
                })
            }
        };

        let source_file = file_name(path);
        let chunks = self.chunk_document(&text, &source_file, source_type, language, None);
        info!(
            file = %source_file,
            chunks = chunks.len(),
            "Processed text document"
        );
        Ok(chunks)
    }

    /// Chunk already-extracted text, used directly for PDF page text.
    pub fn chunk_document(
        &self,
        text: &str,
        source_file: &str,
        source_type: SourceType,
        language: &LanguageService,
        page_number: Option<u32>,
    ) -> Vec<Chunk> {
        let normalized = normalize_whitespace(text);
        if normalized.is_empty() {
            return Vec::new();
        }

        let (lang_code, lang_confidence) = language.detect(&normalized);
        debug!(lang = %lang_code, confidence = lang_confidence, "Detected document language");

        let pieces = chunk_text(&normalized, self.chunk_size, self.chunk_overlap);
        pieces
            .into_iter()
            .enumerate()
            .map(|(order, piece)| {
                Chunk::new(Modality::Text, piece, source_file, source_type).with_metadata(
                    ChunkMetadata {
                        order: Some(order as u32),
                        page_number,
                        language: Some(lang_code.clone()),
                        ..Default::default()
                    },
                )
            })
            .collect()
    }
}

/// Collapse runs of whitespace to single spaces, preserving nothing of the
/// original layout (sentence splitting does not need it).
fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split text into sentences at `.`, `!`, `?` boundaries followed by
/// whitespace. Keeps the terminator with its sentence.
pub(crate) fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let bytes = text.as_bytes();
    let mut start = 0;
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'.' | b'!' | b'?') {
            let mut end = i + 1;
            // consume trailing closers like quotes or parens
            while end < bytes.len() && matches!(bytes[end], b'"' | b'\'' | b')') {
                end += 1;
            }
            if end >= bytes.len() || bytes[end].is_ascii_whitespace() {
                let sentence = text[start..end].trim();
                if !sentence.is_empty() {
                    sentences.push(sentence);
                }
                start = end;
                i = end;
                continue;
            }
        }
        i += 1;
    }
    let tail = text[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Pack sentences into chunks of roughly `chunk_size` characters, carrying
/// the last `overlap` characters into the next chunk.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if !current.is_empty() && current.chars().count() + 1 + sentence.chars().count() > chunk_size
        {
            let finished = std::mem::take(&mut current);
            let carry = overlap_tail(&finished, overlap);
            chunks.push(finished);
            current = carry;
        }
        if !current.is_empty() {
            current.push(' ');
        }
        // A single oversized sentence is hard-split at chunk_size.
        if sentence.chars().count() > chunk_size {
            let mut remaining: Vec<char> = sentence.chars().collect();
            while remaining.len() > chunk_size {
                let head: String = remaining.drain(..chunk_size).collect();
                current.push_str(&head);
                chunks.push(std::mem::take(&mut current));
            }
            current.push_str(&remaining.iter().collect::<String>());
        } else {
            current.push_str(sentence);
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}

/// Last `overlap` characters of a chunk, starting at a word boundary.
fn overlap_tail(text: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= overlap {
        return text.to_string();
    }
    let tail: String = chars[chars.len() - overlap..].iter().collect();
    match tail.find(' ') {
        Some(pos) => tail[pos + 1..].to_string(),
        None => tail,
    }
}

/// Extract the plain text of a DOCX file: `word/document.xml` text runs,
/// with paragraph boundaries rendered as sentence-ish breaks.
fn extract_docx_text(bytes: &[u8], path: &Path) -> Result<String, ProcessingError> {
    let corrupt = |detail: String| ProcessingError::Corrupt {
        path: path.to_path_buf(),
        detail,
    };

    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| corrupt(e.to_string()))?;
    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|e| corrupt(format!("missing word/document.xml: {e}")))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| corrupt(e.to_string()))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(corrupt("word/document.xml exceeds size limit".into()));
        }
    }

    let mut reader = quick_xml::Reader::from_reader(doc_xml.as_slice());
    let mut out = String::new();
    let mut in_text_run = false;
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                in_text_run = e.name().as_ref() == b"w:t";
            }
            Ok(quick_xml::events::Event::Text(t)) if in_text_run => {
                if let Ok(text) = t.unescape() {
                    out.push_str(&text);
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.name().as_ref() == b"w:t" {
                    in_text_run = false;
                } else if e.name().as_ref() == b"w:p" && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(corrupt(format!("document.xml parse error: {e}"))),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

pub(crate) fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
