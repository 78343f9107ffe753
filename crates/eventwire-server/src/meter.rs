//! Per-second request counting.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Receives one tick per frame read from any peer.
pub trait RequestMeter: Send + Sync {
    /// Counts one received frame.
    fn record(&self);
}

/// Counts requests per wall-clock second and keeps a rolling history.
///
/// Seconds roll over lazily on the next `record` or read, so idle seconds
/// show up as zero samples without a ticker thread.
#[derive(Debug)]
pub struct RequestRate {
    inner: Mutex<RateWindow>,
    capacity: usize,
}

#[derive(Debug)]
struct RateWindow {
    started: Instant,
    current: u64,
    history: VecDeque<u64>,
}

impl RequestRate {
    /// Creates a meter keeping `capacity` completed seconds.
    pub fn new(capacity: usize) -> Self {
        Self::starting_at(capacity, Instant::now())
    }

    fn starting_at(capacity: usize, started: Instant) -> Self {
        Self {
            inner: Mutex::new(RateWindow {
                started,
                current: 0,
                history: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    fn lock_at(&self, now: Instant) -> MutexGuard<'_, RateWindow> {
        let mut window = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = now.saturating_duration_since(window.started).as_secs();
        if elapsed > 0 {
            // Only the most recent `capacity` seconds can survive the roll.
            let rolled = elapsed.min(self.capacity as u64 + 1);
            let finished = window.current;
            window.current = 0;
            for step in 0..rolled {
                let sample = if step == 0 { finished } else { 0 };
                window.history.push_back(sample);
                if window.history.len() > self.capacity {
                    window.history.pop_front();
                }
            }
            window.started += Duration::from_secs(elapsed);
        }
        window
    }

    fn record_at(&self, now: Instant) {
        self.lock_at(now).current += 1;
    }

    /// Requests counted so far in the current second.
    pub fn current(&self) -> u64 {
        self.lock_at(Instant::now()).current
    }

    /// Completed per-second samples, oldest first.
    pub fn history(&self) -> Vec<u64> {
        self.history_at(Instant::now())
    }

    fn history_at(&self, now: Instant) -> Vec<u64> {
        self.lock_at(now).history.iter().copied().collect()
    }

    /// Highest completed sample, or zero.
    pub fn peak(&self) -> u64 {
        self.history().into_iter().max().unwrap_or(0)
    }
}

impl Default for RequestRate {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_RATE_HISTORY)
    }
}

impl RequestMeter for RequestRate {
    fn record(&self) {
        self.record_at(Instant::now());
    }
}
