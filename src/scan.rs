//! One-shot scan entry points.
//!
//! ## Why a one-shot API next to the controller?
//!
//! The controller is built for interactive callers that show a cropping
//! surface between attempts. Batch jobs and the CLI already have every image
//! they will ever get, so these functions run a whole session in one call:
//! feed the back image, hand over the next pre-made crop whenever one is
//! requested, and return the field map or the terminal error.

use crate::config::ScanConfig;
use crate::controller::{CropRequest, ScanController, ScanOutcome};
use crate::error::ScanError;
use crate::output::{self, ScanResult};
use crate::pipeline::decode::{BarcodeDecoder, Pdf417Decoder};
use crate::pipeline::input::{self, RawImage};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// How a one-shot scan ended.
///
/// `NeedsCrop` is not an error: the caller may still save the crop base for
/// a human to work on.
#[derive(Debug, Clone)]
pub enum ScanReport {
    Decoded(ScanResult),
    /// Crops ran out before the budget did.
    NeedsCrop(CropRequest),
}

impl ScanReport {
    pub fn into_result(self) -> Option<ScanResult> {
        match self {
            ScanReport::Decoded(result) => Some(result),
            ScanReport::NeedsCrop(_) => None,
        }
    }
}

/// Scan a back image with the PDF417 decoder, no manual crops.
///
/// # Errors
/// [`ScanError::InvalidInput`] for a rejected image. If both automatic
/// attempts fail, returns `Ok(ScanReport::NeedsCrop)`.
pub async fn scan(image: RawImage, config: &ScanConfig) -> Result<ScanReport, ScanError> {
    let decoder = Arc::new(Pdf417Decoder::new(config.try_harder));
    scan_with_crops(image, Vec::new(), config, decoder).await
}

/// Scan a back image, supplying `crops` in order whenever one is requested.
///
/// # Errors
/// [`ScanError::DecodeExhausted`] once every crop attempt allowed by
/// `config.max_attempts` has failed.
pub async fn scan_with_crops(
    image: RawImage,
    crops: Vec<RawImage>,
    config: &ScanConfig,
    decoder: Arc<dyn BarcodeDecoder>,
) -> Result<ScanReport, ScanError> {
    let controller = ScanController::new(config.clone(), decoder)?;
    let mut crops = crops.into_iter();

    let mut outcome = controller.submit_back_image(image).await?;
    loop {
        match outcome {
            ScanOutcome::Decoded(result) => return Ok(ScanReport::Decoded(result)),
            ScanOutcome::CropRequired(request) => match crops.next() {
                Some(crop) => {
                    info!("Using supplied crop for attempt {}", request.attempt_index + 1);
                    outcome = controller.submit_crop(crop).await?;
                }
                None => return Ok(ScanReport::NeedsCrop(request)),
            },
            ScanOutcome::Cancelled => {
                // Nothing else holds this controller, so nothing can reset it.
                return Err(ScanError::Internal("scan session was reset unexpectedly".into()));
            }
        }
    }
}

/// Load a back image (and crops) from disk and scan it.
pub async fn scan_file(
    path: impl AsRef<Path>,
    crop_paths: &[impl AsRef<Path>],
    config: &ScanConfig,
) -> Result<ScanReport, ScanError> {
    let image = load(path.as_ref()).await?;
    let mut crops = Vec::with_capacity(crop_paths.len());
    for crop in crop_paths {
        crops.push(load(crop.as_ref()).await?);
    }
    let decoder = Arc::new(Pdf417Decoder::new(config.try_harder));
    scan_with_crops(image, crops, config, decoder).await
}

/// Synchronous wrapper around [`scan`].
///
/// Creates a temporary tokio runtime internally.
pub fn scan_sync(image: RawImage, config: &ScanConfig) -> Result<ScanReport, ScanError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| ScanError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(scan(image, config))
}

/// Scan a file and write the decoded field map to `output_path` as JSON.
///
/// The write is atomic. Returns the full result for callers that want more
/// than the field map.
pub async fn scan_to_file(
    path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &ScanConfig,
) -> Result<ScanResult, ScanError> {
    let no_crops: &[&Path] = &[];
    match scan_file(path, no_crops, config).await? {
        ScanReport::Decoded(result) => {
            output::write_json(output_path, &result.fields).await?;
            Ok(result)
        }
        ScanReport::NeedsCrop(request) => Err(ScanError::ManualCropRequired {
            target: request.target,
        }),
    }
}

async fn load(path: &Path) -> Result<RawImage, ScanError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || input::load_image(path))
        .await
        .map_err(|e| ScanError::Internal(format!("image load task failed: {e}")))?
}
