//! # license-scan
//!
//! Read the PDF417 barcode on the back of a North American driver's license
//! and parse its AAMVA payload into named fields.
//!
//! ## Why this crate?
//!
//! Barcode readers handle a clean, upright, well-lit symbol fine. Phone photos
//! of license backs are none of those: they arrive rotated via EXIF, at low
//! resolution, and surrounded by hologram glare. Instead of a single decode
//! call this crate climbs an escalation ladder: decode as-is, then upscale,
//! then ask for a manual crop and retry at growing resolution until a bounded
//! budget runs out.
//!
//! ## Pipeline Overview
//!
//! ```text
//! back image (JPEG/PNG)
//!  │
//!  ├─ 1. Input      validate MIME type and size
//!  ├─ 2. Direct     decode the untouched bytes (cheapest)
//!  ├─ 3. Upscale    orient + stretch to 3000×3000, decode again
//!  ├─ 4. Crop       pause for a manual crop; stretch it, decode;
//!  │                grow the canvas +500 px per failure (max 3)
//!  ├─ 5. Parse      AAMVA tagged lines → FieldMap
//!  └─ 6. Output     fields + raw text + attempt log
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use license_scan::{scan_file, ScanConfig, ScanReport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ScanConfig::default();
//!     let no_crops: &[&str] = &[];
//!     match scan_file("license-back.jpg", no_crops, &config).await? {
//!         ScanReport::Decoded(result) => {
//!             for (field, value) in &result.fields {
//!                 println!("{field}: {value}");
//!             }
//!         }
//!         ScanReport::NeedsCrop(request) => {
//!             eprintln!("crop the barcode at {} and try again", request.target);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! Interactive callers that show a cropping surface should drive a
//! [`ScanController`] directly.
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `license-scan` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! license-scan = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod controller;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod scan;
pub mod session;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{OutputFormat, ScanConfig, ScanConfigBuilder};
pub use controller::{CropBase, CropRequest, ScanController, ScanOutcome};
pub use error::{AttemptError, InvalidInputReason, ScanError};
pub use output::{AttemptOutcome, AttemptStage, ScanAttempt, ScanResult, ScanStats};
pub use pipeline::aamva::{parse, parse_with_diagnostics, Field, FieldMap, ParseReport};
pub use pipeline::decode::{BarcodeDecoder, Pdf417Decoder};
pub use pipeline::input::{load_image, ImageMime, RawImage};
pub use pipeline::normalize::NormalizedImage;
pub use pipeline::orientation::OrientationCode;
pub use progress::{NoopProgressCallback, ProgressCallback, ScanProgressCallback};
pub use scan::{scan, scan_file, scan_sync, scan_to_file, scan_with_crops, ScanReport};
pub use session::{Dimensions, ResetReason, ScanState, SessionSnapshot};
pub use stream::{EventStream, ScanEvent};
