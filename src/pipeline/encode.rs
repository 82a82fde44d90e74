//! Image encoding: rendered canvas → encoded bytes.
//!
//! The normaliser works on decoded pixels; everything downstream (decoder
//! adapter, cropping surface, CLI `--save-normalized`) wants encoded bytes
//! again. JPEG at quality 90 is the default: it keeps bar edges sharp enough
//! for PDF417 while a 3000 px canvas stays small enough to hand to a browser.

use crate::config::OutputFormat;
use crate::pipeline::input::{ImageMime, RawImage};
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rendered canvas in the configured output format.
///
/// The canvas is flattened to 8-bit RGB first; JPEG has no alpha channel and
/// the barcode reader only looks at luminance anyway.
pub fn encode_canvas(img: &DynamicImage, format: OutputFormat) -> Result<RawImage, image::ImageError> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();

    let mime = match format {
        OutputFormat::Jpeg { quality } => {
            let encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            rgb.write_with_encoder(encoder)?;
            ImageMime::Jpeg
        }
        OutputFormat::Png => {
            rgb.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
            ImageMime::Png
        }
    };

    debug!(
        "Encoded {}x{} canvas → {} bytes {}",
        img.width(),
        img.height(),
        buf.len(),
        mime
    );

    Ok(RawImage::from_parts(buf, mime))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn red_square() -> DynamicImage {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn encode_jpeg_canvas() {
        let data = encode_canvas(&red_square(), OutputFormat::Jpeg { quality: 90 })
            .expect("encode should succeed");
        assert_eq!(data.mime(), ImageMime::Jpeg);
        assert_eq!(&data.bytes()[..2], &[0xFF, 0xD8]);
        let back = image::load_from_memory(data.bytes()).expect("valid jpeg");
        assert_eq!((back.width(), back.height()), (10, 10));
    }

    #[test]
    fn encode_png_canvas_is_lossless() {
        let data = encode_canvas(&red_square(), OutputFormat::Png).expect("encode should succeed");
        assert_eq!(data.mime(), ImageMime::Png);
        let back = image::load_from_memory(data.bytes()).expect("valid png").to_rgb8();
        assert_eq!(back.get_pixel(5, 5).0, [255, 0, 0]);
    }
}
