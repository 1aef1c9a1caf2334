//! Shared fixtures for integration tests: tiny in-memory PNG, WAV, and
//! PDF documents.

use lopdf::{dictionary, Dictionary, Document, Object, Stream};

/// A solid-color RGB PNG.
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([90, 120, 200]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// A 16 kHz mono WAV carrying a quiet sine tone.
#[allow(dead_code)]
pub fn wav_bytes(seconds: f32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..(16_000.0 * seconds) as usize {
            let sample = ((i as f32 * 0.05).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// A PDF with text placed on the named pages and, optionally, one
/// embedded grayscale image on a given page. Pages run from 1 to the
/// highest page mentioned.
pub fn pdf_with_text_and_image(
    text_pages: &[(u32, &str)],
    image: Option<(u32, u32, u32)>,
) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let max_page = text_pages
        .iter()
        .map(|(p, _)| *p)
        .chain(image.iter().map(|(p, _, _)| *p))
        .max()
        .unwrap_or(1);

    let mut kids: Vec<Object> = Vec::new();
    for page_number in 1..=max_page {
        let text = text_pages
            .iter()
            .find(|(p, _)| *p == page_number)
            .map(|(_, t)| *t);

        let operations = match text {
            Some(text) => vec![
                lopdf::content::Operation::new("BT", vec![]),
                lopdf::content::Operation::new("Tf", vec!["F1".into(), 12.into()]),
                lopdf::content::Operation::new("Td", vec![50.into(), 700.into()]),
                lopdf::content::Operation::new("Tj", vec![Object::string_literal(text)]),
                lopdf::content::Operation::new("ET", vec![]),
            ],
            None => vec![],
        };
        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            lopdf::content::Content { operations }.encode().unwrap(),
        ));

        let mut resources = Dictionary::new();
        resources.set("Font", Object::Dictionary(dictionary! { "F1" => font_id }));

        if let Some((image_page, width, height)) = image {
            if image_page == page_number {
                let samples = vec![140u8; (width * height) as usize];
                let mut image_dict = Dictionary::new();
                image_dict.set("Type", Object::Name(b"XObject".to_vec()));
                image_dict.set("Subtype", Object::Name(b"Image".to_vec()));
                image_dict.set("Width", Object::Integer(width as i64));
                image_dict.set("Height", Object::Integer(height as i64));
                image_dict.set("ColorSpace", Object::Name(b"DeviceGray".to_vec()));
                image_dict.set("BitsPerComponent", Object::Integer(8));
                let mut image_stream = Stream::new(image_dict, samples);
                image_stream.allows_compression = false;
                let image_id = doc.add_object(image_stream);
                resources.set(
                    "XObject",
                    Object::Dictionary(dictionary! { "Im1" => image_id }),
                );
            }
        }

        let resources_id = doc.add_object(Object::Dictionary(resources));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        kids.push(page_id.into());
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

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).unwrap();
    bytes
}
