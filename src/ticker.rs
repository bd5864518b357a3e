//! Per-second ticking for polling loops
//!
//! Converts arbitrary "now" instants into a gap-free, duplicate-free stream
//! of elapsed whole seconds since an epoch. A loop that wakes irregularly
//! still processes every second exactly once: a late wake-up receives the
//! whole missed range as one batch, an early one receives nothing.

use std::time::Instant;

/// Elapsed-seconds ticker.
///
/// Not thread-safe by itself (`&mut self`); callers sharing one across tasks
/// must serialize access. Restart by constructing a new ticker.
#[derive(Debug, Clone)]
pub struct TimeTicker {
    epoch: Instant,
    last_emitted: Option<u64>,
}

impl TimeTicker {
    /// Create a ticker whose second 0 starts at `epoch`
    pub fn new(epoch: Instant) -> Self {
        Self {
            epoch,
            last_emitted: None,
        }
    }

    /// Create a ticker starting now
    pub fn starting_now() -> Self {
        Self::new(Instant::now())
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    /// Highest second already returned, if any
    pub fn last_emitted(&self) -> Option<u64> {
        self.last_emitted
    }

    /// Return the seconds elapsed since the previous call, inclusive of the
    /// current one.
    ///
    /// With `s = floor(now - epoch)`, returns `[last + 1 ..= s]` and records
    /// `s`, or an empty vec when `s` was already emitted or `now` precedes
    /// the epoch.
    pub fn elapsed_seconds(&mut self, now: Instant) -> Vec<u64> {
        let Some(elapsed) = now.checked_duration_since(self.epoch) else {
            return Vec::new();
        };
        let current = elapsed.as_secs();

        let first = match self.last_emitted {
            Some(last) if current <= last => return Vec::new(),
            Some(last) => last + 1,
            None => 0,
        };

        self.last_emitted = Some(current);
        (first..=current).collect()
    }
}
