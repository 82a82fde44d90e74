//! Barcode decoding: encoded image → raw PDF417 text.
//!
//! The decode algorithm itself comes from `rxing` (a Rust port of ZXing). This
//! module only adapts it to the scan pipeline: rasterise to 8-bit luminance,
//! restrict the reader to PDF417 so it never reports a stray QR or 1-D code
//! printed elsewhere on the card, and map failures to [`AttemptError`].
//!
//! [`BarcodeDecoder`] is the seam the controller depends on, so tests and
//! embedders can substitute their own reader.

use crate::error::AttemptError;
use crate::pipeline::input::RawImage;
use rxing::common::HybridBinarizer;
use rxing::{
    BarcodeFormat, BinaryBitmap, DecodeHintValue, DecodeHints, Luma8LuminanceSource,
    MultiFormatReader, Reader,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Locates and decodes one PDF417 symbol in an encoded image.
///
/// Implementations are called from the blocking pool and may take as long as
/// they need; the controller bounds total work by attempt count, not time.
pub trait BarcodeDecoder: Send + Sync {
    /// Return the symbol's text, or an [`AttemptError`] when none is found.
    fn decode(&self, image: &RawImage) -> Result<String, AttemptError>;
}

/// Run `decoder` on the blocking pool.
pub async fn decode(
    decoder: &Arc<dyn BarcodeDecoder>,
    image: &RawImage,
) -> Result<String, AttemptError> {
    let decoder = Arc::clone(decoder);
    let image = image.clone();
    tokio::task::spawn_blocking(move || decoder.decode(&image))
        .await
        .unwrap_or_else(|e| {
            warn!("Decode task panicked: {}", e);
            Err(AttemptError::decode(format!("decode task panicked: {e}")))
        })
}

/// The default decoder: rxing restricted to PDF417.
#[derive(Debug, Clone)]
pub struct Pdf417Decoder {
    try_harder: bool,
}

impl Pdf417Decoder {
    pub fn new(try_harder: bool) -> Self {
        Self { try_harder }
    }

    fn hints(&self) -> DecodeHints {
        let formats = HashSet::from([BarcodeFormat::PDF_417]);
        DecodeHints::default()
            .with(DecodeHintValue::TryHarder(self.try_harder))
            .with(DecodeHintValue::PossibleFormats(formats))
    }
}

impl Default for Pdf417Decoder {
    fn default() -> Self {
        Self::new(true)
    }
}

impl BarcodeDecoder for Pdf417Decoder {
    fn decode(&self, image: &RawImage) -> Result<String, AttemptError> {
        let decoded = image::load_from_memory_with_format(image.bytes(), image.mime().image_format())
            .map_err(|e| AttemptError::render(e.to_string()))?;

        let luma = decoded.to_luma8();
        let (width, height) = luma.dimensions();
        if width == 0 || height == 0 {
            return Err(AttemptError::render("image has zero dimensions"));
        }

        let source = Luma8LuminanceSource::new(luma.into_raw(), width, height);
        let mut bitmap = BinaryBitmap::new(HybridBinarizer::new(source));
        let mut reader = MultiFormatReader::default();

        let result = reader
            .decode_with_hints(&mut bitmap, &self.hints())
            .map_err(|e| AttemptError::decode(format!("{e:?}")))?;

        let text = result.getText().to_string();
        if text.is_empty() {
            return Err(AttemptError::decode("symbol decoded to empty text"));
        }

        debug!("Decoded PDF417 from {}x{} image → {} chars", width, height, text.len());
        Ok(text)
    }
}
