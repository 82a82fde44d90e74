//! Progress-callback trait for per-attempt scan events.
//!
//! Inject an [`Arc<dyn ScanProgressCallback>`] via
//! [`crate::config::ScanConfigBuilder::progress_callback`] to hear about each
//! rung of the escalation ladder as the controller climbs it.
//!
//! # Why callbacks instead of channels?
//!
//! A callback is the least-invasive hook: a CLI can drive a spinner, a server
//! can forward to a WebSocket, and the library stays ignorant of both. Callers
//! that do want an async stream can use [`crate::ScanController::subscribe`],
//! which carries the same events.
//!
//! # Example
//!
//! ```rust
//! use license_scan::{AttemptStage, ScanConfig, ScanProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     attempts: AtomicUsize,
//! }
//!
//! impl ScanProgressCallback for CountingCallback {
//!     fn on_attempt_start(&self, stage: AttemptStage) {
//!         let n = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("attempt {n}: {stage}");
//!     }
//! }
//!
//! let cb = Arc::new(CountingCallback { attempts: AtomicUsize::new(0) });
//!
//! let config = ScanConfig::builder()
//!     .progress_callback(cb as Arc<dyn ScanProgressCallback>)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::AttemptError;
use crate::output::AttemptStage;
use crate::session::{Dimensions, ResetReason};
use std::sync::Arc;

/// Called by the scan controller as a session progresses.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Calls are made from whichever task drives the
/// controller, never while its session lock is held.
pub trait ScanProgressCallback: Send + Sync {
    /// A back image was accepted and the direct decode is about to run.
    fn on_session_start(&self, image_bytes: usize) {
        let _ = image_bytes;
    }

    /// A decode attempt is starting.
    fn on_attempt_start(&self, stage: AttemptStage) {
        let _ = stage;
    }

    /// A decode attempt failed; the controller will escalate.
    fn on_attempt_failed(&self, stage: AttemptStage, error: &AttemptError) {
        let _ = (stage, error);
    }

    /// The controller paused for a manual crop.
    ///
    /// # Arguments
    /// * `attempt_index` — failed crop attempts so far
    /// * `target`        — canvas the crop will be stretched to
    fn on_crop_required(&self, attempt_index: u32, target: Dimensions) {
        let _ = (attempt_index, target);
    }

    /// A symbol was decoded and parsed into `field_count` fields.
    fn on_decoded(&self, field_count: usize) {
        let _ = field_count;
    }

    /// Every crop attempt failed.
    fn on_exhausted(&self, attempts: u32) {
        let _ = attempts;
    }

    /// The session was reset.
    fn on_reset(&self, reason: ResetReason) {
        let _ = reason;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopProgressCallback;

impl ScanProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::ScanConfig`].
pub type ProgressCallback = Arc<dyn ScanProgressCallback>;
