//! PDF-as-container processor.
//!
//! A PDF contributes three kinds of chunks: per-page text chunks, IMAGE
//! chunks for embedded raster images above the minimum size, and OCR-text
//! sibling chunks linked to their parent image via `parent_chunk_id`.
//! Any failure in the image stage degrades the file to text-only; the
//! degradation is recorded as a warning in chunk metadata rather than
//! failing the ingest.

use image::RgbImage;
use lopdf::{Document, Object};
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::{ChunkingConfig, PdfConfig};
use crate::error::ProcessingError;
use crate::ingest::image::{image_confidence, image_content, visual_features};
use crate::ingest::ocr::{OcrEngine, OcrResult};
use crate::ingest::text::{file_name, TextProcessor};
use crate::language::LanguageService;
use crate::types::{Chunk, ChunkMetadata, Modality, SourceType};

/// OCR text shorter than this does not earn a sibling TEXT chunk.
const OCR_SIBLING_THRESHOLD: usize = 20;

/// Intrinsic confidence of OCR-derived sibling text chunks.
const OCR_SIBLING_CONFIDENCE: f32 = 0.85;

pub struct PdfProcessor {
    config: PdfConfig,
    chunker: TextProcessor,
}

impl PdfProcessor {
    pub fn new(pdf_config: &PdfConfig, chunking_config: &ChunkingConfig) -> Self {
        Self {
            config: pdf_config.clone(),
            chunker: TextProcessor::new(chunking_config),
        }
    }

    pub async fn process(
        &self,
        path: &Path,
        language: &LanguageService,
        ocr: &dyn OcrEngine,
    ) -> Result<Vec<Chunk>, ProcessingError> {
        let doc = Document::load(path).map_err(|e| ProcessingError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let source_file = file_name(path);
        let pages = doc.get_pages();
        let mut chunks: Vec<Chunk> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        if self.config.extract_images {
            match self.extract_images(&doc, &source_file, ocr).await {
                Ok(image_chunks) => chunks.extend(image_chunks),
                Err(e) => {
                    warn!(file = %source_file, error = %e, "Image extraction failed, text-only fallback");
                    warnings.push(format!("image extraction failed: {e}"));
                }
            }
        }

        for (&page_number, _) in &pages {
            let text = match doc.extract_text(&[page_number]) {
                Ok(text) => text,
                Err(e) => {
                    debug!(page = page_number, error = %e, "No extractable text on page");
                    continue;
                }
            };
            if text.trim().is_empty() {
                continue;
            }
            let page_chunks = self.chunker.chunk_document(
                &text,
                &source_file,
                SourceType::PdfText,
                language,
                Some(page_number),
            );
            chunks.extend(page_chunks);
        }

        // Surface the degradation on every text chunk of the file.
        if !warnings.is_empty() {
            let note = warnings.join("; ");
            for chunk in chunks.iter_mut().filter(|c| c.modality == Modality::Text) {
                chunk
                    .metadata
                    .extra
                    .insert("warning".to_string(), note.clone());
            }
        }

        info!(
            file = %source_file,
            pages = pages.len(),
            text_chunks = chunks.iter().filter(|c| c.modality == Modality::Text).count(),
            image_chunks = chunks.iter().filter(|c| c.modality == Modality::Image).count(),
            "Processed PDF"
        );
        Ok(chunks)
    }

    /// Walk every page's XObject resources and turn qualifying raster
    /// images into IMAGE chunks (plus OCR siblings).
    async fn extract_images(
        &self,
        doc: &Document,
        source_file: &str,
        ocr: &dyn OcrEngine,
    ) -> Result<Vec<Chunk>, ProcessingError> {
        let mut chunks = Vec::new();

        for (&page_number, &page_id) in &doc.get_pages() {
            let (resources, _) = doc.get_page_resources(page_id);
            let Some(resources) = resources else {
                continue;
            };
            let Ok(xobjects) = resources.get(b"XObject").and_then(Object::as_dict) else {
                continue;
            };

            let mut extracted_on_page = 0usize;
            for (_name, entry) in xobjects.iter() {
                if extracted_on_page >= self.config.max_images_per_page {
                    break;
                }
                let Ok(object_id) = entry.as_reference() else {
                    continue;
                };
                let Ok(stream) = doc.get_object(object_id).and_then(Object::as_stream) else {
                    continue;
                };
                let is_image = stream
                    .dict
                    .get(b"Subtype")
                    .and_then(Object::as_name)
                    .map(|n| n == b"Image")
                    .unwrap_or(false);
                if !is_image {
                    continue;
                }

                let width = stream
                    .dict
                    .get(b"Width")
                    .and_then(Object::as_i64)
                    .unwrap_or(0) as u32;
                let height = stream
                    .dict
                    .get(b"Height")
                    .and_then(Object::as_i64)
                    .unwrap_or(0) as u32;
                if width < self.config.min_image_size || height < self.config.min_image_size {
                    continue;
                }

                let rgb = match decode_image_stream(stream, width, height) {
                    Some(rgb) => rgb,
                    None => {
                        debug!(page = page_number, "Skipping undecodable embedded image");
                        continue;
                    }
                };

                extracted_on_page += 1;
                let image_index = extracted_on_page as u32;

                // Re-encode as PNG for the OCR engine.
                let mut png = Vec::new();
                image::DynamicImage::ImageRgb8(rgb.clone())
                    .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
                    .map_err(|e| ProcessingError::Corrupt {
                        path: source_file.into(),
                        detail: format!("png encode failed: {e}"),
                    })?;
                let ocr_result = ocr.recognize(&png).await?;

                chunks.extend(self.image_chunks(
                    source_file,
                    page_number,
                    image_index,
                    &rgb,
                    &ocr_result,
                ));
            }
        }

        Ok(chunks)
    }

    /// Build the IMAGE chunk and, when OCR recovered enough text, its
    /// sibling TEXT chunk pointing back at the image.
    fn image_chunks(
        &self,
        source_file: &str,
        page_number: u32,
        image_index: u32,
        rgb: &RgbImage,
        ocr_result: &OcrResult,
    ) -> Vec<Chunk> {
        let (width, height) = (rgb.width(), rgb.height());
        let content = image_content(source_file, width, height, Some("png"), ocr_result);

        let image_chunk = Chunk::new(
            Modality::Image,
            content,
            source_file,
            SourceType::PdfEmbeddedImage,
        )
        .with_confidence(image_confidence(width, height, ocr_result))
        .with_metadata(ChunkMetadata {
            page_number: Some(page_number),
            image_index: Some(image_index),
            width: Some(width),
            height: Some(height),
            format: Some("png".to_string()),
            ocr_chars: Some(ocr_result.text.chars().count() as u32),
            ocr_confidence: (!ocr_result.is_empty()).then_some(ocr_result.confidence),
            visual_features: Some(visual_features(rgb)),
            ..Default::default()
        });

        let mut chunks = Vec::with_capacity(2);
        if ocr_result.text.chars().count() >= OCR_SIBLING_THRESHOLD {
            let sibling = Chunk::new(
                Modality::Text,
                format!(
                    "Text extracted from image on page {page_number} of {source_file}:\n{}",
                    ocr_result.text
                ),
                source_file,
                SourceType::PdfImageOcr,
            )
            .with_confidence(OCR_SIBLING_CONFIDENCE)
            .with_metadata(ChunkMetadata {
                page_number: Some(page_number),
                image_index: Some(image_index),
                parent_chunk_id: Some(image_chunk.id.clone()),
                ocr_confidence: Some(ocr_result.confidence),
                ..Default::default()
            });
            debug!(
                page = page_number,
                chars = ocr_result.text.len(),
                "Created OCR sibling chunk for embedded image"
            );
            chunks.push(sibling);
        }
        chunks.insert(0, image_chunk);
        chunks
    }
}

/// Decode an image XObject stream into RGB. Handles DCT-encoded (JPEG)
/// streams and uncompressed/flate 8-bit RGB or grayscale samples; anything
/// else is skipped.
fn decode_image_stream(stream: &lopdf::Stream, width: u32, height: u32) -> Option<RgbImage> {
    let filter_names: Vec<Vec<u8>> = match stream.dict.get(b"Filter") {
        Ok(Object::Name(name)) => vec![name.clone()],
        Ok(Object::Array(items)) => items
            .iter()
            .filter_map(|o| o.as_name().ok().map(|n| n.to_vec()))
            .collect(),
        _ => Vec::new(),
    };

    if filter_names.iter().any(|n| n == b"DCTDecode") {
        let decoded = image::load_from_memory(&stream.content).ok()?;
        return Some(decoded.to_rgb8());
    }

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let pixels = (width * height) as usize;
    if data.len() >= pixels * 3 {
        RgbImage::from_raw(width, height, data[..pixels * 3].to_vec())
    } else if data.len() >= pixels {
        let mut rgb = Vec::with_capacity(pixels * 3);
        for &gray in &data[..pixels] {
            rgb.extend_from_slice(&[gray, gray, gray]);
        }
        RgbImage::from_raw(width, height, rgb)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ocr::MockOcrEngine;
    use lopdf::dictionary;
    use lopdf::{Dictionary, Stream};

    fn language() -> LanguageService {
        LanguageService::new(None)
    }

    fn processor() -> PdfProcessor {
        PdfProcessor::new(&PdfConfig::default(), &ChunkingConfig::default())
    }

    /// Build a minimal PDF with one text page and optionally one embedded
    /// grayscale image on a second page.
    fn build_pdf(path: &Path, page_text: &str, with_image: Option<(u32, u32)>) {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let font_id = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let resources_text = doc.add_object(dictionary! {
            "Font" => dictionary! { "F1" => font_id },
        });
        let content = lopdf::content::Content {
            operations: vec![
                lopdf::content::Operation::new("BT", vec![]),
                lopdf::content::Operation::new("Tf", vec!["F1".into(), 12.into()]),
                lopdf::content::Operation::new("Td", vec![50.into(), 700.into()]),
                lopdf::content::Operation::new(
                    "Tj",
                    vec![Object::string_literal(page_text)],
                ),
                lopdf::content::Operation::new("ET", vec![]),
            ],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            content.encode().unwrap(),
        ));
        let page1_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_text,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });

        let mut kids: Vec<Object> = vec![page1_id.into()];

        if let Some((w, h)) = with_image {
            let samples = vec![128u8; (w * h) as usize];
            let mut image_dict = Dictionary::new();
            image_dict.set("Type", Object::Name(b"XObject".to_vec()));
            image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
            image_dict.set("Width", Object::Integer(w as i64));
            image_dict.set("Height", Object::Integer(h as i64));
            image_dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
            image_dict.set("BitsPerComponent", Object::Integer(8));
            let mut image_stream = Stream::new(image_dict, samples);
            image_stream.allows_compression = false;
            let image_id = doc.add_object(image_stream);

            let resources_img = doc.add_object(dictionary! {
                "XObject" => dictionary! { "Im1" => image_id },
            });
            let empty_content = doc.add_object(Stream::new(
                dictionary! {},
                lopdf::content::Content { operations: vec![] }.encode().unwrap(),
            ));
            let page2_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => empty_content,
                "Resources" => resources_img,
                "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
            });
            kids.push(page2_id.into());
        }

        let count = kids.len() as i64;
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => count,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc.save(path).unwrap();
    }

    #[tokio::test]
    async fn test_text_only_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spec.pdf");
        build_pdf(&path, "Authentication uses OAuth 2.0.", None);

        let chunks = processor()
            .process(&path, &language(), &MockOcrEngine::new())
            .await
            .unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.modality == Modality::Text));
        assert!(chunks[0].content.contains("OAuth"));
        assert_eq!(chunks[0].metadata.page_number, Some(1));
        assert_eq!(chunks[0].source_type, SourceType::PdfText);
        assert_eq!(chunks[0].source_file, "spec.pdf");
    }

    #[tokio::test]
    async fn test_pdf_with_embedded_image_and_ocr_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.pdf");
        build_pdf(&path, "Authentication uses OAuth 2.0.", Some((200, 150)));

        let ocr = MockOcrEngine::new();
        ocr.queue("client -> auth server -> token", 0.88);

        let chunks = processor()
            .process(&path, &language(), &ocr)
            .await
            .unwrap();

        let image_chunk = chunks
            .iter()
            .find(|c| c.modality == Modality::Image)
            .expect("image chunk present");
        assert_eq!(image_chunk.source_type, SourceType::PdfEmbeddedImage);
        assert_eq!(image_chunk.metadata.page_number, Some(2));
        assert_eq!(image_chunk.metadata.width, Some(200));
        assert!(image_chunk.content.contains("auth server"));

        let sibling = chunks
            .iter()
            .find(|c| c.source_type == SourceType::PdfImageOcr)
            .expect("ocr sibling present");
        assert_eq!(sibling.modality, Modality::Text);
        assert_eq!(
            sibling.metadata.parent_chunk_id.as_deref(),
            Some(image_chunk.id.as_str())
        );
        assert!(sibling.content.contains("client -> auth server -> token"));

        // all chunks share the source file
        assert!(chunks.iter().all(|c| c.source_file == "flow.pdf"));
    }

    #[tokio::test]
    async fn test_small_images_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tiny.pdf");
        build_pdf(&path, "Body text here.", Some((40, 40)));

        let chunks = processor()
            .process(&path, &language(), &MockOcrEngine::new())
            .await
            .unwrap();
        assert!(chunks.iter().all(|c| c.modality == Modality::Text));
    }

    #[tokio::test]
    async fn test_short_ocr_gets_no_sibling() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logo.pdf");
        build_pdf(&path, "Body text here.", Some((200, 150)));

        let ocr = MockOcrEngine::new();
        ocr.queue("ACME", 0.9); // under the 20-char sibling threshold

        let chunks = processor().process(&path, &language(), &ocr).await.unwrap();
        assert!(chunks.iter().any(|c| c.modality == Modality::Image));
        assert!(!chunks.iter().any(|c| c.source_type == SourceType::PdfImageOcr));
    }

    #[tokio::test]
    async fn test_image_extraction_disabled_matches_text_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.pdf");
        build_pdf(&path, "Important facts inside.", Some((200, 150)));

        let disabled = PdfProcessor::new(
            &PdfConfig {
                extract_images: false,
                ..Default::default()
            },
            &ChunkingConfig::default(),
        );
        let chunks = disabled
            .process(&path, &language(), &MockOcrEngine::new())
            .await
            .unwrap();
        assert!(chunks.iter().all(|c| c.modality == Modality::Text));
    }

    #[tokio::test]
    async fn test_corrupt_pdf_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pdf");
        std::fs::write(&path, b"%PDF-1.5 truncated garbage").unwrap();
        let err = processor()
            .process(&path, &language(), &MockOcrEngine::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Corrupt { .. }));
    }
}
