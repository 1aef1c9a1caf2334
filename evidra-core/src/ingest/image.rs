//! Standalone image processor.
//!
//! Normalizes to RGB, runs a single OCR pass on the original file (no
//! preprocessing pipeline), and produces one IMAGE chunk whose content
//! carries the OCR text block (if any) and a short descriptor. The raw
//! visual feature vector is kept in metadata so the embedding manager can
//! project it when the OCR text is too thin to embed.

use image::RgbImage;
use std::path::Path;
use tracing::info;

use crate::embed::VISUAL_FEATURE_DIM;
use crate::error::ProcessingError;
use crate::ingest::ocr::{OcrEngine, OcrResult};
use crate::ingest::text::file_name;
use crate::types::{Chunk, ChunkMetadata, Modality, SourceType};

pub struct ImageProcessor;

impl ImageProcessor {
    pub fn new() -> Self {
        Self
    }

    pub async fn process(
        &self,
        path: &Path,
        ocr: &dyn OcrEngine,
    ) -> Result<Vec<Chunk>, ProcessingError> {
        let bytes = std::fs::read(path).map_err(|e| ProcessingError::Corrupt {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
        let decoded = image::load_from_memory(&bytes).map_err(|e| ProcessingError::Corrupt {
            path: path.to_path_buf(),
            detail: format!("image decode failed: {e}"),
        })?;
        let rgb = decoded.to_rgb8();
        let (width, height) = (rgb.width(), rgb.height());

        let ocr_result = ocr.recognize(&bytes).await?;
        let source_file = file_name(path);
        let format = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());

        let content = image_content(&source_file, width, height, format.as_deref(), &ocr_result);
        let confidence = image_confidence(width, height, &ocr_result);

        let chunk = Chunk::new(
            Modality::Image,
            content,
            source_file.clone(),
            SourceType::UploadedImage,
        )
        .with_confidence(confidence)
        .with_metadata(ChunkMetadata {
            width: Some(width),
            height: Some(height),
            format,
            ocr_chars: Some(ocr_result.text.chars().count() as u32),
            ocr_confidence: (!ocr_result.is_empty()).then_some(ocr_result.confidence),
            visual_features: Some(visual_features(&rgb)),
            ..Default::default()
        });

        info!(
            file = %source_file,
            width,
            height,
            ocr_chars = ocr_result.text.len(),
            "Processed image"
        );
        Ok(vec![chunk])
    }
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Build the textual content of an IMAGE chunk: OCR text block first (it
/// is what queries match), descriptor second.
pub(crate) fn image_content(
    source_file: &str,
    width: u32,
    height: u32,
    format: Option<&str>,
    ocr: &OcrResult,
) -> String {
    let orientation = if height > width {
        "portrait"
    } else if width > height {
        "landscape"
    } else {
        "square"
    };
    let format_label = format.unwrap_or("unknown").to_uppercase();

    if ocr.is_empty() {
        format!(
            "Image file: {source_file}. Format: {format_label}. \
             Dimensions: {width}x{height} pixels, {orientation} orientation."
        )
    } else {
        format!(
            "Image file: {source_file}\nExtracted text from image:\n{}\n\n\
             Image properties: {width}x{height} pixels, {orientation} orientation, {format_label}",
            ocr.text
        )
    }
}

/// Intrinsic confidence for an image chunk: a function of resolution and
/// OCR quality, bounded to [0.5, 1.0].
pub(crate) fn image_confidence(width: u32, height: u32, ocr: &OcrResult) -> f32 {
    let resolution_score = (((width * height) as f32).sqrt() / 1000.0).clamp(0.0, 1.0);
    let ocr_score = if ocr.is_empty() { 0.0 } else { ocr.confidence };
    (0.5 + 0.25 * resolution_score + 0.25 * ocr_score).clamp(0.5, 1.0)
}

/// Raw visual feature vector: 16 intensity bins per RGB channel plus 8
/// layout statistics, [`VISUAL_FEATURE_DIM`] values total.
pub(crate) fn visual_features(img: &RgbImage) -> Vec<f32> {
    let mut features = vec![0.0f32; VISUAL_FEATURE_DIM];
    let pixel_count = (img.width() * img.height()) as f32;
    if pixel_count == 0.0 {
        return features;
    }

    let mut sums = [0.0f64; 3];
    let mut luma_sum = 0.0f64;
    let mut luma_sq_sum = 0.0f64;
    for pixel in img.pixels() {
        for (channel, &value) in pixel.0.iter().enumerate() {
            let bin = (value as usize) / 16; // 256 / 16 bins
            features[channel * 16 + bin] += 1.0;
            sums[channel] += value as f64;
        }
        let luma = 0.299 * pixel.0[0] as f64 + 0.587 * pixel.0[1] as f64
            + 0.114 * pixel.0[2] as f64;
        luma_sum += luma;
        luma_sq_sum += luma * luma;
    }

    for bin in features.iter_mut().take(48) {
        *bin /= pixel_count;
    }

    let mean_luma = luma_sum / pixel_count as f64;
    let variance = (luma_sq_sum / pixel_count as f64 - mean_luma * mean_luma).max(0.0);
    let aspect = img.width() as f32 / img.height().max(1) as f32;

    features[48] = (sums[0] / pixel_count as f64 / 255.0) as f32;
    features[49] = (sums[1] / pixel_count as f64 / 255.0) as f32;
    features[50] = (sums[2] / pixel_count as f64 / 255.0) as f32;
    features[51] = (mean_luma / 255.0) as f32;
    features[52] = (variance.sqrt() / 255.0) as f32;
    features[53] = (aspect / 3.0).clamp(0.0, 1.0);
    features[54] = (img.width() as f32 / 4096.0).clamp(0.0, 1.0);
    features[55] = (img.height() as f32 / 4096.0).clamp(0.0, 1.0);
    features
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::ocr::MockOcrEngine;

    /// Encode a solid-color PNG for fixtures.
    pub(crate) fn png_bytes(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, image::Rgb(rgb));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, png_bytes(width, height, [120, 90, 200])).unwrap();
        path
    }

    #[tokio::test]
    async fn test_process_image_with_ocr_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "label.png", 640, 480);
        let ocr = MockOcrEngine::new();
        ocr.queue("MACHINE LABEL Voltage: 110V", 0.92);

        let chunks = ImageProcessor::new().process(&path, &ocr).await.unwrap();
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.modality, Modality::Image);
        assert_eq!(chunk.source_type, SourceType::UploadedImage);
        assert!(chunk.content.contains("MACHINE LABEL Voltage: 110V"));
        assert!(chunk.content.contains("640x480"));
        assert_eq!(chunk.metadata.ocr_chars, Some(27));
        assert_eq!(
            chunk.metadata.visual_features.as_ref().unwrap().len(),
            VISUAL_FEATURE_DIM
        );
        assert!(chunk.confidence >= 0.5 && chunk.confidence <= 1.0);
    }

    #[tokio::test]
    async fn test_process_image_without_ocr_gets_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_png(dir.path(), "photo.png", 200, 400);
        let ocr = MockOcrEngine::new(); // empty queue -> no text

        let chunks = ImageProcessor::new().process(&path, &ocr).await.unwrap();
        let chunk = &chunks[0];
        assert!(chunk.content.contains("portrait"));
        assert!(chunk.content.contains("PNG"));
        assert_eq!(chunk.metadata.ocr_chars, Some(0));
        assert!(chunk.metadata.ocr_confidence.is_none());
    }

    #[tokio::test]
    async fn test_corrupt_image_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"not an image at all").unwrap();
        let err = ImageProcessor::new()
            .process(&path, &MockOcrEngine::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::Corrupt { .. }));
    }

    #[test]
    fn test_confidence_bounded() {
        let empty = OcrResult::default();
        let tiny = image_confidence(10, 10, &empty);
        assert!(tiny >= 0.5);
        let big = image_confidence(4000, 3000, &OcrResult {
            text: "lots of text".into(),
            confidence: 1.0,
        });
        assert!(big <= 1.0);
        assert!(big > tiny);
    }

    #[test]
    fn test_visual_features_shape_and_range() {
        let img = RgbImage::from_pixel(32, 16, image::Rgb([255, 0, 128]));
        let features = visual_features(&img);
        assert_eq!(features.len(), VISUAL_FEATURE_DIM);
        // red channel mass lands in the top bin
        assert!((features[15] - 1.0).abs() < 1e-5);
        // green channel mass in the bottom bin
        assert!((features[16] - 1.0).abs() < 1e-5);
        // aspect 2.0 -> 2/3
        assert!((features[53] - 2.0 / 3.0).abs() < 1e-5);
    }
}
