//! Readiness flags gating collection cycles.
//!
//! Producers raise a domain flag and clear `processed` when fresh data lands.
//! The collector claims a cycle by setting `processed` back to true and then
//! taking both domain flags. Claiming before taking means a write that races
//! the cycle re-arms `processed` for the next one instead of being lost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};

/// Which domains had unconsumed data when a cycle was claimed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingDomains {
    pub image: bool,
    pub frame: bool,
}

impl PendingDomains {
    /// Both domains ready: the cycle emits a full row.
    pub fn is_full(&self) -> bool {
        self.image && self.frame
    }
}

/// Outcome of waiting for a wake-up signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Signalled,
    TimedOut,
    Disconnected,
}

/// Image/frame readiness plus the processed flag and the collector wake-up.
pub struct ReadinessTracker {
    image_ready: AtomicBool,
    frame_ready: AtomicBool,
    processed: AtomicBool,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl ReadinessTracker {
    /// All domains idle, nothing pending.
    pub fn new() -> Self {
        // One slot: a full channel already means "wake up".
        let (wake_tx, wake_rx) = bounded(1);
        Self {
            image_ready: AtomicBool::new(false),
            frame_ready: AtomicBool::new(false),
            processed: AtomicBool::new(true),
            wake_tx,
            wake_rx,
        }
    }

    /// Signal a fresh raster.
    pub fn mark_image_ready(&self) {
        self.image_ready.store(true, Ordering::SeqCst);
        self.mark_unprocessed();
    }

    /// Signal a fresh frame.
    pub fn mark_frame_ready(&self) {
        self.frame_ready.store(true, Ordering::SeqCst);
        self.mark_unprocessed();
    }

    fn mark_unprocessed(&self) {
        self.processed.store(false, Ordering::SeqCst);
        self.notify();
    }

    /// Wake the collector without changing any flag.
    pub fn notify(&self) {
        // Full means a wake-up is already queued. The receiver lives in
        // `self`, so the channel cannot be disconnected here.
        let _ = self.wake_tx.try_send(());
    }

    /// True when no cycle is pending.
    pub fn is_processed(&self) -> bool {
        self.processed.load(Ordering::SeqCst)
    }

    /// Current domain flags without consuming them.
    pub fn peek(&self) -> PendingDomains {
        PendingDomains {
            image: self.image_ready.load(Ordering::SeqCst),
            frame: self.frame_ready.load(Ordering::SeqCst),
        }
    }

    /// Claim the pending cycle, if any, clearing both domain flags.
    ///
    /// A producer can raise its domain flag, have it taken by a cycle, and
    /// only then clear `processed`. The next claim then finds no domain
    /// pending and returns `None`.
    pub fn claim(&self) -> Option<PendingDomains> {
        if self.processed.swap(true, Ordering::SeqCst) {
            return None;
        }
        let pending = PendingDomains {
            image: self.image_ready.swap(false, Ordering::SeqCst),
            frame: self.frame_ready.swap(false, Ordering::SeqCst),
        };
        if pending.image || pending.frame {
            Some(pending)
        } else {
            None
        }
    }

    /// Block until a producer signals or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Wake {
        match self.wake_rx.recv_timeout(timeout) {
            Ok(()) => Wake::Signalled,
            Err(RecvTimeoutError::Timeout) => Wake::TimedOut,
            Err(RecvTimeoutError::Disconnected) => Wake::Disconnected,
        }
    }
}

impl Default for ReadinessTracker {
    fn default() -> Self {
        Self::new()
    }
}
