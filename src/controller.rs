//! The scan controller: the escalation state machine.
//!
//! [`ScanController`] drives one [`ScanSession`] through
//! direct decode → upscale retry → manual crop (bounded, growing) and returns
//! a [`ScanOutcome`] at every point where it either finishes or needs the
//! caller to act.
//!
//! ## Why a generation counter?
//!
//! Every decode and normalise step runs on the blocking pool and the caller
//! may `retry()` or `remove_image()` while one is in flight. The step carries
//! the generation it started under; when it completes, the controller re-locks
//! the session and drops the result if the generation has moved on. Such a
//! call returns [`ScanOutcome::Cancelled`] and never touches the new session.
//!
//! ## Why a `std::sync::Mutex`?
//!
//! The lock only guards a few field updates and is never held across an
//! `.await`, so a blocking mutex is cheaper than an async one and keeps the
//! controller's futures `Send`.
//!
//! # Example
//!
//! ```rust,no_run
//! use license_scan::{RawImage, ScanConfig, ScanController, ScanOutcome};
//!
//! # async fn run(back: Vec<u8>, crop: Vec<u8>) -> Result<(), license_scan::ScanError> {
//! let controller = ScanController::with_pdf417(ScanConfig::default())?;
//! let mut outcome = controller
//!     .submit_back_image(RawImage::new(back, "image/jpeg")?)
//!     .await?;
//!
//! if let ScanOutcome::CropRequired(request) = &outcome {
//!     // Show `request.base.to_data_url()` in a cropping widget, then:
//!     outcome = controller.submit_crop(RawImage::new(crop, "image/png")?).await?;
//! }
//!
//! if let ScanOutcome::Decoded(result) = outcome {
//!     for (field, value) in &result.fields {
//!         println!("{field}: {value}");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use crate::config::ScanConfig;
use crate::error::{AttemptError, ScanError};
use crate::output::{AttemptStage, ScanResult, ScanStats};
use crate::pipeline::decode::{self, BarcodeDecoder, Pdf417Decoder};
use crate::pipeline::input::{self, RawImage};
use crate::pipeline::normalize::{self, NormalizedImage};
use crate::pipeline::orientation::{self, OrientationCode};
use crate::pipeline::aamva;
use crate::session::{Dimensions, ResetReason, ScanSession, ScanState, SessionSnapshot};
use crate::stream::{EventBus, EventStream, ScanEvent};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a controller call ended with.
#[derive(Debug, Clone)]
pub enum ScanOutcome {
    /// A symbol was decoded and parsed. The session is `Succeeded`.
    Decoded(ScanResult),
    /// Paused in `AwaitManualCrop`; supply a crop via
    /// [`ScanController::submit_crop`].
    CropRequired(CropRequest),
    /// The session was reset while this call was in flight; its result was
    /// discarded.
    Cancelled,
}

impl ScanOutcome {
    pub fn is_decoded(&self) -> bool {
        matches!(self, ScanOutcome::Decoded(_))
    }

    pub fn into_result(self) -> Option<ScanResult> {
        match self {
            ScanOutcome::Decoded(result) => Some(result),
            _ => None,
        }
    }
}

/// The "crop required" signal.
///
/// Any crop accepted against an earlier request is void; crop `base` afresh.
#[derive(Debug, Clone)]
pub struct CropRequest {
    /// Image the cropping surface should show.
    pub base: CropBase,
    /// Canvas the crop will be stretched to before decoding.
    pub target: Dimensions,
    /// Failed crop attempts so far.
    pub attempt_index: u32,
    /// Crop attempts left, including the next one.
    pub remaining_attempts: u32,
    /// Session generation the request belongs to.
    pub generation: u64,
}

/// The image offered for cropping.
#[derive(Debug, Clone)]
pub enum CropBase {
    /// The original re-normalised to the current target.
    Normalized(NormalizedImage),
    /// The untouched original, when normalisation failed.
    Original(RawImage),
}

impl CropBase {
    pub fn image(&self) -> &RawImage {
        match self {
            CropBase::Normalized(n) => n.as_raw(),
            CropBase::Original(raw) => raw,
        }
    }

    pub fn to_data_url(&self) -> String {
        self.image().to_data_url()
    }
}

/// Where a locked completion handler sends the caller next.
enum Step<T> {
    Done(ScanResult),
    Continue(T),
}

/// Drives a single scan session. Cheap to share behind an `Arc`.
pub struct ScanController {
    config: ScanConfig,
    decoder: Arc<dyn BarcodeDecoder>,
    session: Mutex<ScanSession>,
    events: EventBus,
}

impl std::fmt::Debug for ScanController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanController")
            .field("config", &self.config)
            .field("session", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl ScanController {
    /// Create a controller with a custom decoder.
    pub fn new(config: ScanConfig, decoder: Arc<dyn BarcodeDecoder>) -> Result<Self, ScanError> {
        config.validate()?;
        Ok(Self {
            session: Mutex::new(ScanSession::new(config.initial_size)),
            config,
            decoder,
            events: EventBus::default(),
        })
    }

    /// Create a controller using the bundled PDF417 decoder.
    pub fn with_pdf417(config: ScanConfig) -> Result<Self, ScanError> {
        let decoder = Arc::new(Pdf417Decoder::new(config.try_harder));
        Self::new(config, decoder)
    }

    pub fn config(&self) -> &ScanConfig {
        &self.config
    }

    pub fn state(&self) -> ScanState {
        self.lock().state
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    /// The normalised image the next crop should be taken from, if any.
    pub fn current_image(&self) -> Option<NormalizedImage> {
        self.lock().current_image.clone()
    }

    /// Observe transitions as a stream. Each call gets its own stream.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    // ── Commands ─────────────────────────────────────────────────────────

    /// Accept a back image and run the automatic rungs of the ladder.
    ///
    /// Only valid in `AwaitingImage`. Returns `Decoded` if the direct or the
    /// upscaled decode succeeds, otherwise `CropRequired`.
    pub async fn submit_back_image(&self, image: RawImage) -> Result<ScanOutcome, ScanError> {
        let generation = {
            let mut s = self.lock();
            if s.state != ScanState::AwaitingImage {
                return Err(ScanError::InvalidState {
                    state: s.state,
                    operation: "submit a back image",
                });
            }
            input::validate(&image, self.config.max_input_bytes)?;
            s.original = Some(image.clone());
            s.state = ScanState::DirectDecode;
            s.started_at = Some(Instant::now());
            s.generation
        };

        info!(
            "Scan session {} started: {} bytes {}",
            generation,
            image.len(),
            image.mime()
        );
        self.notify(ScanEvent::SessionStarted {
            generation,
            image_bytes: image.len(),
        });

        // ── DirectDecode ─────────────────────────────────────────────────
        let Some(index) = self.begin_attempt(generation, AttemptStage::Direct, None) else {
            return Ok(self.discard(generation));
        };
        let result = decode::decode(&self.decoder, &image).await;

        let upscale = self.config.upscale_size;
        let Some(step) = self.guarded(generation, |s| {
            s.record_outcome(index, None, &result);
            match &result {
                Ok(text) => Step::Done(self.succeed(s, text)),
                Err(_) => {
                    s.state = ScanState::UpscaleRetry;
                    s.target = upscale;
                    Step::Continue(())
                }
            }
        }) else {
            return Ok(self.discard(generation));
        };
        match step {
            Step::Done(scan) => return Ok(self.decoded(generation, scan)),
            Step::Continue(()) => self.attempt_failed(generation, index, AttemptStage::Direct, &result),
        }

        // ── UpscaleRetry ─────────────────────────────────────────────────
        let Some(orientation) = self.original_orientation(generation, &image).await else {
            return Ok(self.discard(generation));
        };
        let Some(index) = self.begin_attempt(generation, AttemptStage::Upscale, Some(upscale)) else {
            return Ok(self.discard(generation));
        };
        let (normalized, result) = self.normalize_and_decode(&image, orientation, upscale).await;

        let Some(step) = self.guarded(generation, |s| {
            s.record_outcome(index, normalized.as_ref().map(NormalizedImage::size), &result);
            match &result {
                Ok(text) => Step::Done(self.succeed(s, text)),
                Err(_) => {
                    s.current_image = normalized;
                    s.state = ScanState::AwaitManualCrop;
                    Step::Continue(self.crop_request(s, &image))
                }
            }
        }) else {
            return Ok(self.discard(generation));
        };
        match step {
            Step::Done(scan) => Ok(self.decoded(generation, scan)),
            Step::Continue(request) => {
                self.attempt_failed(generation, index, AttemptStage::Upscale, &result);
                Ok(self.crop_required(request))
            }
        }
    }

    /// Decode a manually cropped region of the current crop base.
    ///
    /// Only valid in `AwaitManualCrop`. The crop is stretched to the current
    /// target before decoding. On failure the target grows and a new
    /// `CropRequired` is returned until the attempt budget runs out, at which
    /// point the session is `Exhausted` and this returns
    /// [`ScanError::DecodeExhausted`].
    pub async fn submit_crop(&self, crop: RawImage) -> Result<ScanOutcome, ScanError> {
        let (generation, original, target, attempt_index) = {
            let mut s = self.lock();
            if s.state != ScanState::AwaitManualCrop {
                return Err(ScanError::InvalidState {
                    state: s.state,
                    operation: "submit a crop",
                });
            }
            input::validate(&crop, self.config.max_input_bytes)?;
            let original = s
                .original
                .clone()
                .ok_or_else(|| ScanError::Internal("session has no back image".into()))?;
            s.state = ScanState::CroppedDecode;
            (s.generation, original, s.target, s.attempt_index)
        };

        // ── CroppedDecode ────────────────────────────────────────────────
        let stage = AttemptStage::Cropped { attempt_index };
        let Some(index) = self.begin_attempt(generation, stage, Some(target)) else {
            return Ok(self.discard(generation));
        };
        let crop_orientation = orientation::resolve(&crop).await;
        let (normalized, result) = self.normalize_and_decode(&crop, crop_orientation, target).await;

        let max_attempts = self.config.max_attempts;
        let growth_step = self.config.growth_step;
        let Some(step) = self.guarded(generation, |s| {
            s.record_outcome(index, normalized.as_ref().map(NormalizedImage::size), &result);
            match &result {
                Ok(text) => Step::Done(self.succeed(s, text)),
                Err(_) => {
                    s.attempt_index += 1;
                    s.current_image = None;
                    if s.attempt_index < max_attempts {
                        s.target = s.target.grown(growth_step);
                        Step::Continue(Some(s.target))
                    } else {
                        s.state = ScanState::Exhausted;
                        Step::Continue(None)
                    }
                }
            }
        }) else {
            return Ok(self.discard(generation));
        };

        let next_target = match step {
            Step::Done(scan) => return Ok(self.decoded(generation, scan)),
            Step::Continue(next) => {
                self.attempt_failed(generation, index, stage, &result);
                next
            }
        };

        let Some(next_target) = next_target else {
            let attempts = max_attempts;
            warn!("Scan session {} exhausted after {} crop attempts", generation, attempts);
            self.notify(ScanEvent::Exhausted { generation, attempts });
            return Err(ScanError::DecodeExhausted { attempts });
        };

        // ── Re-normalise the original for the next crop ──────────────────
        debug!("Growing crop target to {}", next_target);
        let Some(orientation) = self.original_orientation(generation, &original).await else {
            return Ok(self.discard(generation));
        };
        let rendered =
            normalize::normalize(&original, orientation, next_target, self.config.output_format).await;
        if let Err(e) = &rendered {
            warn!("Could not re-normalise back image to {}: {}", next_target, e);
        }

        let Some(request) = self.guarded(generation, |s| {
            s.current_image = rendered.ok();
            s.state = ScanState::AwaitManualCrop;
            self.crop_request(s, &original)
        }) else {
            return Ok(self.discard(generation));
        };
        Ok(self.crop_required(request))
    }

    /// Reset to `AwaitingImage` from any state. Returns the new generation.
    pub fn retry(&self) -> u64 {
        self.reset(ResetReason::Retry)
    }

    /// Drop the back image and reset. Returns the new generation.
    pub fn remove_image(&self) -> u64 {
        self.reset(ResetReason::ImageRemoved)
    }

    fn reset(&self, reason: ResetReason) -> u64 {
        let (previous, generation) = {
            let mut s = self.lock();
            let previous = s.state;
            (previous, s.reset())
        };
        info!(
            "Scan session reset ({}) from {} → generation {}",
            reason, previous, generation
        );
        self.notify(ScanEvent::Reset { generation, reason });
        generation
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn lock(&self) -> MutexGuard<'_, ScanSession> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` on the session if it is still on `generation`.
    fn guarded<R>(&self, generation: u64, f: impl FnOnce(&mut ScanSession) -> R) -> Option<R> {
        let mut s = self.lock();
        if s.generation != generation {
            return None;
        }
        Some(f(&mut s))
    }

    fn begin_attempt(
        &self,
        generation: u64,
        stage: AttemptStage,
        target: Option<Dimensions>,
    ) -> Option<u32> {
        let index = self.guarded(generation, |s| s.begin_attempt(stage, target))?;
        debug!("Attempt {} ({}) target {:?}", index, stage, target);
        self.notify(ScanEvent::AttemptStarted {
            generation,
            index,
            stage,
            target,
        });
        Some(index)
    }

    /// Orientation of the back image, resolved once per session.
    async fn original_orientation(&self, generation: u64, image: &RawImage) -> Option<OrientationCode> {
        if let Some(cached) = self.guarded(generation, |s| s.orientation)? {
            return Some(cached);
        }
        let code = orientation::resolve(image).await;
        self.guarded(generation, |s| {
            s.orientation = Some(code);
            code
        })
    }

    async fn normalize_and_decode(
        &self,
        source: &RawImage,
        orientation: OrientationCode,
        target: Dimensions,
    ) -> (Option<NormalizedImage>, Result<String, AttemptError>) {
        match normalize::normalize(source, orientation, target, self.config.output_format).await {
            Ok(normalized) => {
                let result = decode::decode(&self.decoder, normalized.as_raw()).await;
                (Some(normalized), result)
            }
            Err(e) => (None, Err(e)),
        }
    }

    fn succeed(&self, s: &mut ScanSession, text: &str) -> ScanResult {
        s.state = ScanState::Succeeded;
        let report = aamva::parse_with_diagnostics(text);
        let duration_ms = s
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or_default();
        ScanResult {
            stats: ScanStats::from_attempts(&s.attempts, s.attempt_index, duration_ms),
            fields: report.fields,
            raw_text: text.to_string(),
            unmapped_tags: report.unmapped,
            attempts: s.attempts.clone(),
        }
    }

    fn crop_request(&self, s: &ScanSession, original: &RawImage) -> CropRequest {
        let base = match &s.current_image {
            Some(normalized) => CropBase::Normalized(normalized.clone()),
            None => CropBase::Original(original.clone()),
        };
        CropRequest {
            base,
            target: s.target,
            attempt_index: s.attempt_index,
            remaining_attempts: self.config.max_attempts.saturating_sub(s.attempt_index),
            generation: s.generation,
        }
    }

    fn decoded(&self, generation: u64, result: ScanResult) -> ScanOutcome {
        let field_count = result.fields.len();
        if field_count == 0 {
            warn!("Barcode decoded but no AAMVA fields were recognised");
        }
        info!(
            "Scan session {} decoded {} fields after {} attempts",
            generation, field_count, result.stats.decode_attempts
        );
        self.notify(ScanEvent::Decoded {
            generation,
            field_count,
        });
        ScanOutcome::Decoded(result)
    }

    fn attempt_failed(
        &self,
        generation: u64,
        index: u32,
        stage: AttemptStage,
        result: &Result<String, AttemptError>,
    ) {
        if let Err(error) = result {
            warn!("Attempt {} ({}) failed: {}", index, stage, error);
            self.notify(ScanEvent::AttemptFailed {
                generation,
                index,
                stage,
                error: error.clone(),
            });
        }
    }

    fn crop_required(&self, request: CropRequest) -> ScanOutcome {
        info!(
            "Manual crop required (attempt {} of {}, target {})",
            request.attempt_index + 1,
            self.config.max_attempts,
            request.target
        );
        self.notify(ScanEvent::CropRequired {
            generation: request.generation,
            attempt_index: request.attempt_index,
            target: request.target,
        });
        ScanOutcome::CropRequired(request)
    }

    fn discard(&self, generation: u64) -> ScanOutcome {
        warn!("Discarding result from stale scan session {}", generation);
        self.notify(ScanEvent::StaleResultDiscarded { generation });
        ScanOutcome::Cancelled
    }

    /// Forward an event to the progress callback and every subscriber.
    fn notify(&self, event: ScanEvent) {
        if let Some(cb) = &self.config.progress_callback {
            match &event {
                ScanEvent::SessionStarted { image_bytes, .. } => cb.on_session_start(*image_bytes),
                ScanEvent::AttemptStarted { stage, .. } => cb.on_attempt_start(*stage),
                ScanEvent::AttemptFailed { stage, error, .. } => cb.on_attempt_failed(*stage, error),
                ScanEvent::CropRequired {
                    attempt_index,
                    target,
                    ..
                } => cb.on_crop_required(*attempt_index, *target),
                ScanEvent::Decoded { field_count, .. } => cb.on_decoded(*field_count),
                ScanEvent::Exhausted { attempts, .. } => cb.on_exhausted(*attempts),
                ScanEvent::Reset { reason, .. } => cb.on_reset(*reason),
                ScanEvent::StaleResultDiscarded { .. } => {}
            }
        }
        self.events.publish(&event);
    }
}
