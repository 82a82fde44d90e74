//! Orientation resolution: read the EXIF orientation tag of an encoded image.
//!
//! Phone cameras store pixels in sensor order and record the intended display
//! rotation as EXIF tag 0x0112. The normaliser needs that code to rotate the
//! card upright before the decoder sees it. A missing or unreadable tag is the
//! common case (PNG screenshots, cropped regions) and resolves to `1`.

use crate::pipeline::input::RawImage;
use image::metadata::Orientation;
use image::{ImageDecoder, ImageReader};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use tracing::{debug, warn};

/// EXIF orientation code, always within 1–8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrientationCode(u8);

impl OrientationCode {
    /// Code 1: stored pixels are already upright.
    pub const IDENTITY: Self = Self(1);

    /// Build from a raw tag value; anything outside 1–8 becomes [`Self::IDENTITY`].
    pub fn from_exif(value: u32) -> Self {
        match value {
            1..=8 => Self(value as u8),
            _ => Self::IDENTITY,
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Codes 5–8 include a quarter turn, so width and height trade places.
    pub fn swaps_axes(self) -> bool {
        self.0 > 4
    }

    fn from_metadata(orientation: Orientation) -> Self {
        Self(match orientation {
            Orientation::NoTransforms => 1,
            Orientation::FlipHorizontal => 2,
            Orientation::Rotate180 => 3,
            Orientation::FlipVertical => 4,
            Orientation::Rotate90FlipH => 5,
            Orientation::Rotate90 => 6,
            Orientation::Rotate270FlipH => 7,
            Orientation::Rotate270 => 8,
        })
    }
}

impl Default for OrientationCode {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl fmt::Display for OrientationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolve the orientation of `image` on the blocking pool.
///
/// Never fails: a panicked task is logged and treated as "no metadata".
pub async fn resolve(image: &RawImage) -> OrientationCode {
    let image = image.clone();
    match tokio::task::spawn_blocking(move || resolve_blocking(&image)).await {
        Ok(code) => code,
        Err(e) => {
            warn!("Orientation task failed, assuming upright: {}", e);
            OrientationCode::IDENTITY
        }
    }
}

/// Blocking implementation of orientation resolution.
pub fn resolve_blocking(image: &RawImage) -> OrientationCode {
    let reader = ImageReader::with_format(Cursor::new(image.bytes()), image.mime().image_format());

    let mut decoder = match reader.into_decoder() {
        Ok(decoder) => decoder,
        Err(e) => {
            debug!("No readable header for orientation ({}), assuming 1", e);
            return OrientationCode::IDENTITY;
        }
    };

    match decoder.orientation() {
        Ok(orientation) => {
            let code = OrientationCode::from_metadata(orientation);
            if code != OrientationCode::IDENTITY {
                debug!("EXIF orientation detected: {}", code);
            }
            code
        }
        Err(e) => {
            debug!("Orientation metadata unreadable ({}), assuming 1", e);
            OrientationCode::IDENTITY
        }
    }
}
