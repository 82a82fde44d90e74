//! Image normalisation: apply the EXIF orientation and stretch to a target canvas.
//!
//! ## Why stretch instead of letterbox?
//!
//! The canvas is filled edge to edge and the aspect ratio is not preserved.
//! The decoder only needs enough pixels per PDF417 module; padding would spend
//! canvas area on background, which is exactly the noise the manual-crop step
//! tries to remove. Non-uniform scaling does distort the symbol's geometry, so
//! it is a deliberate behaviour to check against real decoder tolerance.
//!
//! ## Why spawn_blocking?
//!
//! Decoding a 12 MP photo and resampling it to 3000 × 3000 takes hundreds of
//! milliseconds of pure CPU. Running it on the blocking pool keeps the caller's
//! executor (often a UI event loop) responsive.

use crate::config::OutputFormat;
use crate::error::AttemptError;
use crate::pipeline::encode::encode_canvas;
use crate::pipeline::input::RawImage;
use crate::pipeline::orientation::OrientationCode;
use crate::session::Dimensions;
use image::imageops::FilterType;
use image::DynamicImage;
use std::fmt;
use tracing::{debug, warn};

/// A [`RawImage`] re-derived from a source by orientation + resize.
///
/// Never mutated in place; a larger target produces a new value.
#[derive(Clone)]
pub struct NormalizedImage {
    image: RawImage,
    size: Dimensions,
    orientation: OrientationCode,
}

impl NormalizedImage {
    /// The encoded bytes, usable anywhere a [`RawImage`] is.
    pub fn as_raw(&self) -> &RawImage {
        &self.image
    }

    pub fn into_raw(self) -> RawImage {
        self.image
    }

    /// Pixel size of the encoded canvas (axes swapped for codes 5–8).
    pub fn size(&self) -> Dimensions {
        self.size
    }

    /// Orientation that was applied to the source.
    pub fn orientation(&self) -> OrientationCode {
        self.orientation
    }

    /// Base64 data URL for an external cropping surface.
    pub fn to_data_url(&self) -> String {
        self.image.to_data_url()
    }
}

impl fmt::Debug for NormalizedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizedImage")
            .field("size", &self.size)
            .field("orientation", &self.orientation)
            .field("image", &self.image)
            .finish()
    }
}

/// Canvas size for a requested target: axes swap for quarter-turn orientations.
pub fn canvas_size(orientation: OrientationCode, target: Dimensions) -> Dimensions {
    if orientation.swaps_axes() {
        target.transposed()
    } else {
        target
    }
}

/// Apply the flip/rotate selected by `orientation`.
///
/// | Code | Transform |
/// |------|-----------|
/// | 1 | identity |
/// | 2 | horizontal mirror |
/// | 3 | 180° rotation |
/// | 4 | vertical mirror |
/// | 5 | vertical mirror, then 90° clockwise |
/// | 6 | 90° clockwise |
/// | 7 | horizontal mirror, then 90° clockwise |
/// | 8 | 90° counter-clockwise |
pub fn apply_orientation(img: DynamicImage, orientation: OrientationCode) -> DynamicImage {
    match orientation.get() {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.flipv().rotate90(),
        6 => img.rotate90(),
        7 => img.fliph().rotate90(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Stretch `source` onto the canvas for `target`, oriented upright.
///
/// The source is resampled to `target` first and then turned, which lands on
/// [`canvas_size`] and covers it completely.
pub fn render_canvas(
    source: &DynamicImage,
    orientation: OrientationCode,
    target: Dimensions,
) -> Result<DynamicImage, AttemptError> {
    if source.width() == 0 || source.height() == 0 {
        return Err(AttemptError::render("source image has zero dimensions"));
    }
    if target.is_empty() {
        return Err(AttemptError::render(format!("invalid target size {target}")));
    }

    let resized = source.resize_exact(target.width, target.height, FilterType::Triangle);
    Ok(apply_orientation(resized, orientation))
}

/// Normalise `image` on the blocking pool.
pub async fn normalize(
    image: &RawImage,
    orientation: OrientationCode,
    target: Dimensions,
    format: OutputFormat,
) -> Result<NormalizedImage, AttemptError> {
    let image = image.clone();
    tokio::task::spawn_blocking(move || normalize_blocking(&image, orientation, target, format))
        .await
        .unwrap_or_else(|e| {
            warn!("Normalise task panicked: {}", e);
            Err(AttemptError::render(format!("normalise task panicked: {e}")))
        })
}

/// Blocking implementation of normalisation.
pub fn normalize_blocking(
    image: &RawImage,
    orientation: OrientationCode,
    target: Dimensions,
    format: OutputFormat,
) -> Result<NormalizedImage, AttemptError> {
    let source = image::load_from_memory_with_format(image.bytes(), image.mime().image_format())
        .map_err(|e| AttemptError::render(e.to_string()))?;

    let canvas = render_canvas(&source, orientation, target)?;
    let size = Dimensions::new(canvas.width(), canvas.height());
    debug!(
        "Normalised {}x{} → {} (orientation {})",
        source.width(),
        source.height(),
        size,
        orientation
    );

    let encoded = encode_canvas(&canvas, format).map_err(|e| AttemptError::render(e.to_string()))?;

    Ok(NormalizedImage {
        image: encoded,
        size,
        orientation,
    })
}
