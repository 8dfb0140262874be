//! Rate limiting for streamed partial transcript writes.

use std::time::Duration;
use tokio::time::Instant;

/// Decides when a partial transcript write may run.
///
/// A write runs immediately if the previous one was at least `interval` ago;
/// otherwise it is deferred to the end of the interval and coalesced with
/// any further appends.
#[derive(Debug, Clone)]
pub struct PartialSaveThrottle {
    interval: Duration,
    last_write: Option<Instant>,
    pending: bool,
}

impl PartialSaveThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_write: None,
            pending: false,
        }
    }

    /// Records an append. Returns `true` when a write should run now.
    pub fn on_append(&mut self, now: Instant) -> bool {
        match self.last_write {
            Some(last) if now.duration_since(last) < self.interval => {
                self.pending = true;
                false
            }
            _ => {
                self.last_write = Some(now);
                self.pending = false;
                true
            }
        }
    }

    /// When a deferred write becomes due.
    pub fn due_at(&self) -> Option<Instant> {
        if !self.pending {
            return None;
        }
        Some(self.last_write.map_or_else(Instant::now, |last| last + self.interval))
    }

    /// Claims the deferred write if it is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.due_at() {
            Some(due) if now >= due => {
                self.pending = false;
                self.last_write = Some(now);
                true
            }
            _ => false,
        }
    }

    /// Drops any deferred write.
    pub fn cancel(&mut self) {
        self.pending = false;
    }
}
