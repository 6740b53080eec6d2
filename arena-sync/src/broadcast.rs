//! Best-effort fan-out to per-connection outboxes.
//!
//! Every connection owns a bounded outbox drained by its own socket task.
//! Broadcasting serializes an event once and `try_send`s the shared frame
//! into each recipient's outbox, so delivery never waits on a slow peer:
//!
//! ```text
//!              ┌──► Outbox A ──► socket task A
//! event ─ encode ──► Outbox B ──► socket task B   (full: frame dropped)
//!              └──► Outbox C ──► socket task C   (closed: skipped)
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::protocol::ParticipantId;

/// A serialized frame shared by every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Outcome of enqueueing one frame for one recipient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    /// Outbox at capacity; the frame was dropped for this recipient only.
    Full,
    /// Connection already gone; skipped.
    Closed,
}

/// Sending half of a connection's outbox.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::Sender<Frame>,
}

impl Outbox {
    /// Create an outbox buffering up to `capacity` frames.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting.
    pub fn deliver(&self, frame: Frame) -> Delivery {
        match self.tx.try_send(frame) {
            Ok(()) => Delivery::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => Delivery::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::Closed,
        }
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Per-broadcast tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    pub delivered: usize,
    pub dropped: usize,
    pub skipped: usize,
}

impl FanOutReport {
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.skipped
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub frames_skipped: u64,
}

/// Atomic broadcast stats, lock-free on the hot path.
#[derive(Debug, Default)]
pub(crate) struct AtomicBroadcastStats {
    broadcasts: AtomicU64,
    frames_delivered: AtomicU64,
    frames_dropped: AtomicU64,
    frames_skipped: AtomicU64,
}

impl AtomicBroadcastStats {
    pub(crate) fn record(&self, report: &FanOutReport) {
        self.broadcasts.fetch_add(1, Ordering::Relaxed);
        self.frames_delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.frames_dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        self.frames_skipped
            .fetch_add(report.skipped as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            frames_delivered: self.frames_delivered.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
        }
    }
}

/// Send `frame` to every recipient except `exclude`.
///
/// `recipients` is a snapshot taken by the caller, so concurrent admissions
/// and departures never affect the iteration.
pub fn fan_out(
    recipients: &[(ParticipantId, Outbox)],
    frame: &Frame,
    exclude: Option<&ParticipantId>,
) -> FanOutReport {
    let mut report = FanOutReport::default();

    for (id, outbox) in recipients {
        if Some(id) == exclude {
            continue;
        }
        match outbox.deliver(frame.clone()) {
            Delivery::Queued => report.delivered += 1,
            Delivery::Full => {
                log::warn!("Outbox for participant {id} is full, dropping frame");
                report.dropped += 1;
            }
            Delivery::Closed => {
                log::debug!("Skipping closed connection for participant {id}");
                report.skipped += 1;
            }
        }
    }

    report
}
