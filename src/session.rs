//! Scan session: the aggregate the controller mutates.
//!
//! A [`ScanSession`] owns the original back image for its whole lifetime, the
//! manual-crop attempt counter, the current target canvas and the
//! [`ScanState`]. Only [`crate::controller::ScanController`] touches it, and
//! only while holding its lock; callers observe it through
//! [`SessionSnapshot`].
//!
//! ## State machine
//!
//! ```text
//! AwaitingImage ──▶ DirectDecode ──▶ UpscaleRetry ──▶ AwaitManualCrop ◀─┐
//!                        │                │                 │           │
//!                        ▼                ▼                 ▼           │
//!                    Succeeded        Succeeded       CroppedDecode ────┘
//!                                                       │       │
//!                                                       ▼       ▼
//!                                                 Succeeded  Exhausted
//! ```
//!
//! `retry` / `remove_image` return any state to `AwaitingImage` and bump the
//! generation so in-flight results are discarded on arrival.

use crate::error::AttemptError;
use crate::output::{AttemptOutcome, AttemptStage, ScanAttempt};
use crate::pipeline::input::RawImage;
use crate::pipeline::normalize::NormalizedImage;
use crate::pipeline::orientation::OrientationCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

// ── Dimensions ───────────────────────────────────────────────────────────

/// A width × height pair in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width and height swapped.
    pub fn transposed(self) -> Self {
        Self::new(self.height, self.width)
    }

    /// True if either axis is zero.
    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Both axes enlarged by `step`, saturating at `u32::MAX`.
    pub fn grown(self, step: u32) -> Self {
        Self::new(
            self.width.saturating_add(step),
            self.height.saturating_add(step),
        )
    }
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

// ── ScanState ────────────────────────────────────────────────────────────

/// Where a session is in the escalation ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScanState {
    /// No back image yet (initial state and the target of every reset).
    AwaitingImage,
    /// Decoding the unmodified back image.
    DirectDecode,
    /// Decoding the original re-normalised to the upscale size.
    UpscaleRetry,
    /// Paused until a manually cropped region is supplied.
    AwaitManualCrop,
    /// Decoding a crop (or re-normalising for the next one).
    CroppedDecode,
    /// Finished with a field map.
    Succeeded,
    /// Finished without one; every crop attempt failed.
    Exhausted,
}

impl ScanState {
    /// `Succeeded` or `Exhausted`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ScanState::Succeeded | ScanState::Exhausted)
    }

    /// True while a decode or normalise step for this state is running.
    pub fn is_working(self) -> bool {
        matches!(
            self,
            ScanState::DirectDecode | ScanState::UpscaleRetry | ScanState::CroppedDecode
        )
    }
}

impl fmt::Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Why a session was reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResetReason {
    /// Explicit retry command; any state, including `Succeeded`.
    Retry,
    /// The back image was removed.
    ImageRemoved,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetReason::Retry => f.write_str("retry"),
            ResetReason::ImageRemoved => f.write_str("image removed"),
        }
    }
}

// ── ScanSession ──────────────────────────────────────────────────────────

/// Mutable session state. Lives behind the controller's mutex.
#[derive(Debug)]
pub(crate) struct ScanSession {
    /// Incremented on every reset; async completions carry the value they
    /// started with and are dropped if it no longer matches.
    pub(crate) generation: u64,
    pub(crate) state: ScanState,
    pub(crate) original: Option<RawImage>,
    /// Orientation of `original`, resolved on first use.
    pub(crate) orientation: Option<OrientationCode>,
    /// Failed manual-crop attempts so far.
    pub(crate) attempt_index: u32,
    pub(crate) target: Dimensions,
    /// Image the next crop should be taken from.
    pub(crate) current_image: Option<NormalizedImage>,
    pub(crate) attempts: Vec<ScanAttempt>,
    pub(crate) started_at: Option<Instant>,
    initial_target: Dimensions,
}

impl ScanSession {
    pub(crate) fn new(initial_target: Dimensions) -> Self {
        Self {
            generation: 0,
            state: ScanState::AwaitingImage,
            original: None,
            orientation: None,
            attempt_index: 0,
            target: initial_target,
            current_image: None,
            attempts: Vec::new(),
            started_at: None,
            initial_target,
        }
    }

    /// Return to `AwaitingImage` with initial values and a new generation.
    pub(crate) fn reset(&mut self) -> u64 {
        let generation = self.generation.wrapping_add(1);
        *self = Self::new(self.initial_target);
        self.generation = generation;
        generation
    }

    /// Log a pending attempt and return its index.
    pub(crate) fn begin_attempt(&mut self, stage: AttemptStage, target: Option<Dimensions>) -> u32 {
        let index = self.attempts.len() as u32;
        self.attempts.push(ScanAttempt::pending(index, stage, target));
        index
    }

    /// Fill in the outcome of a logged attempt.
    pub(crate) fn record_outcome(
        &mut self,
        index: u32,
        canvas: Option<Dimensions>,
        result: &Result<String, AttemptError>,
    ) {
        if let Some(attempt) = self.attempts.get_mut(index as usize) {
            attempt.canvas = canvas;
            attempt.outcome = match result {
                Ok(text) => AttemptOutcome::Decoded(text.clone()),
                Err(e) => AttemptOutcome::DecodeFailed(e.clone()),
            };
        }
    }

    pub(crate) fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            generation: self.generation,
            attempt_index: self.attempt_index,
            target: self.target,
            has_image: self.original.is_some(),
            attempts: self.attempts.clone(),
        }
    }
}

/// Read-only copy of a session, safe to hand to a UI or serialise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub state: ScanState,
    pub generation: u64,
    /// Failed manual-crop attempts so far.
    pub attempt_index: u32,
    /// Canvas the next normalisation will use.
    pub target: Dimensions,
    /// Whether a back image has been accepted.
    pub has_image: bool,
    /// Every decode attempt made in this generation, oldest first.
    pub attempts: Vec<ScanAttempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimensions_grow_on_both_axes() {
        let d = Dimensions::new(3000, 2000).grown(500);
        assert_eq!(d, Dimensions::new(3500, 2500));
        assert_eq!(Dimensions::new(u32::MAX, 1).grown(10).width, u32::MAX);
    }

    #[test]
    fn dimensions_display_and_transpose() {
        let d = Dimensions::new(1920, 1080);
        assert_eq!(d.to_string(), "1920x1080");
        assert_eq!(d.transposed(), Dimensions::new(1080, 1920));
        assert!(Dimensions::new(0, 5).is_empty());
        assert!(!d.is_empty());
    }

    #[test]
    fn reset_restores_initial_values_and_bumps_generation() {
        let initial = Dimensions::new(100, 100);
        let mut s = ScanSession::new(initial);
        s.state = ScanState::Exhausted;
        s.attempt_index = 3;
        s.target = Dimensions::new(2000, 2000);
        s.original = Some(RawImage::new(vec![1, 2, 3], "image/png").unwrap());

        let gen = s.reset();
        assert_eq!(gen, 1);
        assert_eq!(s.generation, 1);
        assert_eq!(s.state, ScanState::AwaitingImage);
        assert_eq!(s.attempt_index, 0);
        assert_eq!(s.target, initial);
        assert!(s.original.is_none());
        assert!(s.attempts.is_empty());

        assert_eq!(s.reset(), 2);
    }

    #[test]
    fn attempts_are_logged_in_order() {
        let mut s = ScanSession::new(Dimensions::new(10, 10));
        let a = s.begin_attempt(AttemptStage::Direct, None);
        let b = s.begin_attempt(AttemptStage::Upscale, Some(Dimensions::new(30, 30)));
        assert_eq!((a, b), (0, 1));

        s.record_outcome(b, Some(Dimensions::new(30, 30)), &Err(AttemptError::decode("none")));
        assert_eq!(s.attempts[0].outcome, AttemptOutcome::Pending);
        assert!(matches!(s.attempts[1].outcome, AttemptOutcome::DecodeFailed(_)));
        assert_eq!(s.attempts[1].canvas, Some(Dimensions::new(30, 30)));

        // Unknown index is ignored.
        s.record_outcome(9, None, &Ok("DAQ1".into()));
        assert_eq!(s.attempts.len(), 2);
    }

    #[test]
    fn state_classification() {
        assert!(ScanState::Succeeded.is_terminal());
        assert!(ScanState::Exhausted.is_terminal());
        assert!(!ScanState::AwaitManualCrop.is_terminal());
        assert!(ScanState::CroppedDecode.is_working());
        assert!(!ScanState::AwaitManualCrop.is_working());
        assert_eq!(ScanState::AwaitManualCrop.to_string(), "AwaitManualCrop");
    }

    #[test]
    fn snapshot_serialises() {
        let s = ScanSession::new(Dimensions::new(10, 20));
        let json = serde_json::to_value(s.snapshot()).unwrap();
        assert_eq!(json["state"], "AwaitingImage");
        assert_eq!(json["target"]["width"], 10);
        assert_eq!(json["has_image"], false);
    }
}
