//! Streaming observer API: controller transitions as an async `Stream`.
//!
//! ## Why stream?
//!
//! A cropping UI has to react to "crop required" the moment it happens, and
//! wants to grey out its buttons while an attempt runs. [`ScanEvent`]s carry
//! the same information as [`crate::ScanProgressCallback`] but as owned values
//! on a `Stream`, which composes with `select!` loops and forwards easily to
//! a WebSocket.
//!
//! Every event carries the session generation it belongs to, so a consumer
//! can drop events from a session that has since been reset.

use crate::error::AttemptError;
use crate::output::AttemptStage;
use crate::session::{Dimensions, ResetReason};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// A boxed stream of controller events.
pub type EventStream = Pin<Box<dyn Stream<Item = ScanEvent> + Send>>;

/// One observable controller transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ScanEvent {
    SessionStarted {
        generation: u64,
        image_bytes: usize,
    },
    AttemptStarted {
        generation: u64,
        index: u32,
        stage: AttemptStage,
        target: Option<Dimensions>,
    },
    AttemptFailed {
        generation: u64,
        index: u32,
        stage: AttemptStage,
        error: AttemptError,
    },
    CropRequired {
        generation: u64,
        attempt_index: u32,
        target: Dimensions,
    },
    Decoded {
        generation: u64,
        field_count: usize,
    },
    Exhausted {
        generation: u64,
        attempts: u32,
    },
    Reset {
        generation: u64,
        reason: ResetReason,
    },
    /// An async step finished after a reset; its result was dropped.
    StaleResultDiscarded {
        generation: u64,
    },
}

impl ScanEvent {
    /// Generation of the session the event belongs to.
    pub fn generation(&self) -> u64 {
        match self {
            ScanEvent::SessionStarted { generation, .. }
            | ScanEvent::AttemptStarted { generation, .. }
            | ScanEvent::AttemptFailed { generation, .. }
            | ScanEvent::CropRequired { generation, .. }
            | ScanEvent::Decoded { generation, .. }
            | ScanEvent::Exhausted { generation, .. }
            | ScanEvent::Reset { generation, .. }
            | ScanEvent::StaleResultDiscarded { generation } => *generation,
        }
    }
}

/// Fan-out of events to every live subscriber.
#[derive(Debug, Default)]
pub(crate) struct EventBus {
    senders: Mutex<Vec<mpsc::UnboundedSender<ScanEvent>>>,
}

impl EventBus {
    pub(crate) fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        Box::pin(UnboundedReceiverStream::new(rx))
    }

    /// Send to every subscriber, forgetting the ones that were dropped.
    pub(crate) fn publish(&self, event: &ScanEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<ScanEvent>>> {
        self.senders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
