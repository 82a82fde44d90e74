//! Input handling: raw image bytes, MIME types and validation.
//!
//! Every image entering the scan (the back of the card and any manual crop)
//! is a [`RawImage`]: encoded bytes plus a declared MIME type. Validation
//! happens once, before the first decode attempt, so a wrong file type or an
//! oversize upload never costs a rasterisation.

use crate::error::{InvalidInputReason, ScanError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The two encodings a license image may arrive in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageMime {
    Jpeg,
    Png,
}

impl ImageMime {
    /// Parse a declared MIME type. Case-insensitive; parameters after `;` are ignored.
    pub fn parse(mime: &str) -> Result<Self, InvalidInputReason> {
        let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Ok(ImageMime::Jpeg),
            "image/png" => Ok(ImageMime::Png),
            _ => Err(InvalidInputReason::UnsupportedMimeType(mime.to_string())),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "image/jpeg",
            ImageMime::Png => "image/png",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageMime::Jpeg => "jpg",
            ImageMime::Png => "png",
        }
    }

    pub(crate) fn image_format(self) -> image::ImageFormat {
        match self {
            ImageMime::Jpeg => image::ImageFormat::Jpeg,
            ImageMime::Png => image::ImageFormat::Png,
        }
    }
}

impl fmt::Display for ImageMime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoded image bytes plus their declared MIME type.
///
/// Immutable once built; cloning is cheap (the bytes are reference-counted),
/// which lets the controller keep the original back image for the whole
/// session while handing copies to blocking tasks.
#[derive(Clone, PartialEq, Eq)]
pub struct RawImage {
    bytes: Arc<[u8]>,
    mime: ImageMime,
}

impl RawImage {
    /// Wrap caller-supplied bytes, checking the declared MIME type.
    pub fn new(bytes: impl Into<Vec<u8>>, mime: &str) -> Result<Self, ScanError> {
        let mime = ImageMime::parse(mime).map_err(ScanError::invalid_input)?;
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(ScanError::invalid_input(InvalidInputReason::Empty));
        }
        Ok(Self::from_parts(bytes, mime))
    }

    pub(crate) fn from_parts(bytes: Vec<u8>, mime: ImageMime) -> Self {
        Self {
            bytes: bytes.into(),
            mime,
        }
    }

    /// Parse a `data:<mime>;base64,<payload>` URL.
    pub fn from_data_url(url: &str) -> Result<Self, ScanError> {
        let malformed =
            |detail: &str| ScanError::invalid_input(InvalidInputReason::MalformedDataUrl(detail.into()));

        let rest = url
            .strip_prefix("data:")
            .ok_or_else(|| malformed("missing 'data:' prefix"))?;
        let (header, payload) = rest
            .split_once(',')
            .ok_or_else(|| malformed("missing ',' separator"))?;
        let mime = header
            .strip_suffix(";base64")
            .ok_or_else(|| malformed("only base64 payloads are supported"))?;
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| malformed(&e.to_string()))?;

        Self::new(bytes, mime)
    }

    /// Render as a base64 `data:` URL, the form browser cropping widgets consume.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime(&self) -> ImageMime {
        self.mime
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for RawImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawImage")
            .field("mime", &self.mime)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Reject an image before any decode attempt.
///
/// MIME type and emptiness are already enforced by [`RawImage::new`]; this
/// adds the size bound, which is configuration-dependent.
pub fn validate(image: &RawImage, max_bytes: usize) -> Result<(), ScanError> {
    if image.is_empty() {
        return Err(ScanError::invalid_input(InvalidInputReason::Empty));
    }
    if image.len() > max_bytes {
        return Err(ScanError::invalid_input(InvalidInputReason::TooLarge {
            size: image.len(),
            max: max_bytes,
        }));
    }
    Ok(())
}

/// Identify JPEG/PNG content from its leading bytes.
pub fn sniff_mime(bytes: &[u8]) -> Option<ImageMime> {
    match image::guess_format(bytes).ok()? {
        image::ImageFormat::Jpeg => Some(ImageMime::Jpeg),
        image::ImageFormat::Png => Some(ImageMime::Png),
        _ => None,
    }
}

fn mime_from_extension(path: &Path) -> Option<ImageMime> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some(ImageMime::Jpeg),
        "png" => Some(ImageMime::Png),
        _ => None,
    }
}

/// Load an image file from disk.
///
/// The MIME type comes from the file's magic bytes; the extension is only
/// consulted when the content is too short to sniff.
pub fn load_image(path: impl AsRef<Path>) -> Result<RawImage, ScanError> {
    let path: PathBuf = path.as_ref().to_path_buf();

    if !path.exists() {
        return Err(ScanError::FileNotFound { path });
    }

    let mut bytes = Vec::new();
    match std::fs::File::open(&path) {
        Ok(mut f) => {
            if let Err(e) = f.read_to_end(&mut bytes) {
                return Err(match e.kind() {
                    std::io::ErrorKind::PermissionDenied => ScanError::PermissionDenied { path },
                    _ => ScanError::Internal(format!("Failed to read {}: {e}", path.display())),
                });
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(ScanError::PermissionDenied { path });
        }
        Err(_) => {
            return Err(ScanError::FileNotFound { path });
        }
    }

    if bytes.is_empty() {
        return Err(ScanError::invalid_input(InvalidInputReason::Empty));
    }

    let mime = match sniff_mime(&bytes) {
        Some(mime) => mime,
        None if bytes.len() < 8 => mime_from_extension(&path).ok_or_else(|| {
            ScanError::invalid_input(InvalidInputReason::NotAnImage {
                magic: bytes.clone(),
            })
        })?,
        None => {
            return Err(ScanError::invalid_input(InvalidInputReason::NotAnImage {
                magic: bytes[..8].to_vec(),
            }))
        }
    };

    debug!("Loaded {} ({}, {} bytes)", path.display(), mime, bytes.len());
    Ok(RawImage::from_parts(bytes, mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mime_parsing_accepts_jpeg_and_png_only() {
        assert_eq!(ImageMime::parse("image/jpeg"), Ok(ImageMime::Jpeg));
        assert_eq!(ImageMime::parse("IMAGE/JPG"), Ok(ImageMime::Jpeg));
        assert_eq!(ImageMime::parse("image/png; charset=binary"), Ok(ImageMime::Png));
        assert!(ImageMime::parse("image/gif").is_err());
        assert!(ImageMime::parse("application/pdf").is_err());
        assert!(ImageMime::parse("").is_err());
    }

    #[test]
    fn raw_image_rejects_wrong_mime_and_empty_bytes() {
        let err = RawImage::new(vec![1, 2, 3], "image/webp").unwrap_err();
        assert!(err.is_invalid_input());

        let err = RawImage::new(Vec::new(), "image/png").unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidInput {
                reason: InvalidInputReason::Empty
            }
        ));
    }

    #[test]
    fn validate_enforces_size_limit() {
        let img = RawImage::new(vec![0u8; 10], "image/png").unwrap();
        assert!(validate(&img, 10).is_ok());
        let err = validate(&img, 9).unwrap_err();
        assert!(matches!(
            err,
            ScanError::InvalidInput {
                reason: InvalidInputReason::TooLarge { size: 10, max: 9 }
            }
        ));
    }

    #[test]
    fn data_url_round_trip() {
        let img = RawImage::new(vec![0x89, b'P', b'N', b'G', 1, 2, 3], "image/png").unwrap();
        let url = img.to_data_url();
        assert!(url.starts_with("data:image/png;base64,"));
        let back = RawImage::from_data_url(&url).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn data_url_rejects_garbage() {
        assert!(RawImage::from_data_url("not a url").is_err());
        assert!(RawImage::from_data_url("data:image/png,plain").is_err());
        assert!(RawImage::from_data_url("data:image/gif;base64,AAAA")
            .unwrap_err()
            .is_invalid_input());
    }

    #[test]
    fn sniff_recognises_png_signature() {
        let png_magic = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0];
        assert_eq!(sniff_mime(&png_magic), Some(ImageMime::Png));
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0, 0, 0]), Some(ImageMime::Jpeg));
        assert_eq!(sniff_mime(b"%PDF-1.7"), None);
    }

    #[test]
    fn debug_does_not_dump_bytes() {
        let img = RawImage::new(vec![7u8; 64], "image/jpeg").unwrap();
        let dbg = format!("{img:?}");
        assert!(dbg.contains("len: 64"), "got: {dbg}");
        assert!(!dbg.contains("7, 7"), "got: {dbg}");
    }
}
