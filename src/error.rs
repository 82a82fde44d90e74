//! Error types for the license-scan library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`ScanError`] — **Fatal**: the scan cannot continue (rejected input,
//!   every attempt used up, a command issued in the wrong state). Returned as
//!   `Err(ScanError)` from the controller and the top-level `scan*` functions.
//!
//! * [`AttemptError`] — **Non-fatal**: a single decode attempt failed (the
//!   image could not be rasterised, or no PDF417 symbol was found). The
//!   controller absorbs it, records it in the attempt log and escalates.
//!
//! Only [`ScanError::InvalidInput`] and [`ScanError::DecodeExhausted`] are
//! produced by the controller itself. [`ScanError::ManualCropRequired`] is the
//! one-shot API's way of saying it ran out of crops before attempts; the
//! remaining variants cover file loading, configuration and API misuse.

use crate::session::{Dimensions, ScanState};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the license-scan library.
///
/// Per-attempt failures use [`AttemptError`] and are stored in
/// [`crate::output::ScanAttempt`] rather than propagated here.
#[derive(Debug, Error)]
pub enum ScanError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The supplied image was rejected before any decode attempt.
    #[error("Invalid input image: {reason}")]
    InvalidInput { reason: InvalidInputReason },

    /// Input file was not found at the given path.
    #[error("Image file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    // ── Scan errors ───────────────────────────────────────────────────────
    /// Every decode attempt, including the manual-crop retries, failed.
    #[error(
        "Failed to extract data from the barcode after {attempts} attempts.\n\
Please try uploading a clearer image of the back of the license."
    )]
    DecodeExhausted { attempts: u32 },

    /// Automatic attempts failed and no crop was available to continue with.
    #[error(
        "The barcode could not be read automatically.\n\
Crop the image tightly around the barcode (target canvas {target}) and try again."
    )]
    ManualCropRequired { target: Dimensions },

    /// A command arrived in a state that does not accept it.
    #[error("Cannot {operation} while the scan is in state {state}")]
    InvalidState {
        state: ScanState,
        operation: &'static str,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the output JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ScanError {
    pub(crate) fn invalid_input(reason: InvalidInputReason) -> Self {
        ScanError::InvalidInput { reason }
    }

    /// True for errors the caller can fix by supplying a different image.
    pub fn is_invalid_input(&self) -> bool {
        matches!(self, ScanError::InvalidInput { .. })
    }

    /// True when the scan ran out of attempts.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, ScanError::DecodeExhausted { .. })
    }
}

/// Why an input image was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidInputReason {
    /// Declared MIME type is not JPEG or PNG.
    UnsupportedMimeType(String),
    /// Image exceeds the configured size limit.
    TooLarge { size: usize, max: usize },
    /// No bytes at all.
    Empty,
    /// File content is not a JPEG or PNG image.
    NotAnImage { magic: Vec<u8> },
    /// A `data:` URL could not be parsed.
    MalformedDataUrl(String),
}

impl fmt::Display for InvalidInputReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidInputReason::UnsupportedMimeType(mime) => {
                write!(f, "unsupported type '{mime}' (expected image/jpeg or image/png)")
            }
            InvalidInputReason::TooLarge { size, max } => {
                write!(f, "{size} bytes exceeds the {max} byte limit")
            }
            InvalidInputReason::Empty => write!(f, "image is empty"),
            InvalidInputReason::NotAnImage { magic } => {
                write!(f, "not a JPEG or PNG image (first bytes: {magic:02x?})")
            }
            InvalidInputReason::MalformedDataUrl(detail) => {
                write!(f, "malformed data URL: {detail}")
            }
        }
    }
}

/// A non-fatal error for a single decode attempt.
///
/// Stored in [`crate::output::AttemptOutcome::DecodeFailed`]. The controller
/// escalates (upscale, then manual crop) instead of surfacing it.
#[derive(Debug, Clone, PartialEq, Error, serde::Serialize, serde::Deserialize)]
pub enum AttemptError {
    /// Source bytes could not be rasterised (corrupt data, zero dimensions).
    #[error("rasterisation failed: {detail}")]
    RenderFailed { detail: String },

    /// No PDF417 symbol was found or decoded.
    #[error("barcode decoding failed: {detail}")]
    DecodeFailed { detail: String },
}

impl AttemptError {
    pub(crate) fn render(detail: impl Into<String>) -> Self {
        AttemptError::RenderFailed {
            detail: detail.into(),
        }
    }

    pub(crate) fn decode(detail: impl Into<String>) -> Self {
        AttemptError::DecodeFailed {
            detail: detail.into(),
        }
    }
}
