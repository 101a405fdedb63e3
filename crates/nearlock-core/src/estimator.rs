//! Sliding-window RSSI smoothing.

use std::collections::VecDeque;

/// Default number of samples averaged by the estimator.
pub const DEFAULT_WINDOW_SIZE: usize = 5;

/// Clamp a raw RSSI reading: only negative values are physically meaningful,
/// so anything non-negative becomes 0.
#[inline]
#[must_use]
pub const fn clamp_rssi(raw: i16) -> i16 {
    if raw > 0 {
        0
    } else {
        raw
    }
}

/// Running mean over the last `capacity` samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalEstimator {
    window: VecDeque<i16>,
    capacity: usize,
}

impl SignalEstimator {
    /// Create an estimator holding at most `capacity` samples (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `sample`, evicting the oldest one when full, and return the
    /// mean of the window rounded toward zero.
    pub fn estimate(&mut self, sample: i16) -> i16 {
        if self.window.len() >= self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);

        let sum: i64 = self.window.iter().copied().map(i64::from).sum();
        // Integer division truncates toward zero; the mean of i16 values
        // always fits back into i16.
        let mean = sum / self.window.len() as i64;
        i16::try_from(mean).unwrap_or(i16::MIN)
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// Samples currently in the window, oldest first.
    #[must_use]
    pub fn samples(&self) -> Vec<i16> {
        self.window.iter().copied().collect()
    }

    /// Number of samples currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Maximum number of samples held.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for SignalEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_SIZE)
    }
}
