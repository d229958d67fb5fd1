//! # Quiesce Counter
//!
//! Counts requests forwarded with a completion routine that has not run yet.
//!
//! ```text
//! begin_async()  ──▶ forward ──▶ ... lower completes ... ──▶ on_complete()
//!      +1                                                        -1
//! ```
//!
//! Node release waits on [`QuiesceCounter::wait_until_zero`], which sleeps on
//! a condition variable and re-checks at least once per poll interval, so a
//! missed wake-up costs at most one interval.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use log::warn;

/// Process-wide count of in-flight asynchronous completions.
///
/// The count never goes below zero: a surplus [`on_complete`] is logged and
/// ignored.
///
/// [`on_complete`]: QuiesceCounter::on_complete
#[derive(Debug, Default)]
pub struct QuiesceCounter {
    pending: AtomicUsize,
    lock: Mutex<()>,
    drained: Condvar,
}

impl QuiesceCounter {
    /// A counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request about to be forwarded with a completion routine.
    ///
    /// Returns the new count.
    pub fn begin_async(&self) -> usize {
        self.pending.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Record that a completion routine ran.
    ///
    /// Returns the new count.
    pub fn on_complete(&self) -> usize {
        let previous = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
                self.drained.notify_all();
                0
            }
            Ok(n) => n - 1,
            Err(_) => {
                warn!("completion reported with no request in flight; ignored");
                0
            }
        }
    }

    /// Current count.
    #[inline]
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Block until the count reads zero.
    ///
    /// `poll` bounds each wait before the count is re-read.
    pub fn wait_until_zero(&self, poll: Duration) {
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.pending() != 0 {
            guard = self
                .drained
                .wait_timeout(guard, poll)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Block until the count reads zero or `timeout` elapses.
    ///
    /// Returns `true` if the count reached zero.
    pub fn wait_until_zero_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if self.pending() == 0 {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = self
                .drained
                .wait_timeout(guard, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }
}
