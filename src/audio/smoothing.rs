//! Moving-average smoothing of successive decibel readings.
//!
//! [`MeasurementBuffer`] keeps the last [`SMOOTHING_WINDOW`] raw readings and
//! reports their arithmetic mean.  A five-reading window follows a sustained
//! level change completely within five frames while a single-frame spike only
//! moves the output by a fifth of its height.
//!
//! # Example
//!
//! ```rust
//! use noise_meter::audio::MeasurementBuffer;
//!
//! let mut buf = MeasurementBuffer::new();
//! assert_eq!(buf.push(50.0), 50.0);
//! assert_eq!(buf.push(52.0), 51.0);
//! assert_eq!(buf.push(90.0), 64.0); // spike pulled toward the history
//! ```

use std::collections::VecDeque;

/// Number of readings averaged by [`MeasurementBuffer`].
pub const SMOOTHING_WINDOW: usize = 5;

/// Bounded history of recent raw readings.
#[derive(Debug, Clone)]
pub struct MeasurementBuffer {
    window: VecDeque<f32>,
    capacity: usize,
}

impl MeasurementBuffer {
    /// Buffer with the default [`SMOOTHING_WINDOW`] capacity.
    pub fn new() -> Self {
        Self::with_capacity(SMOOTHING_WINDOW)
    }

    /// Buffer averaging the last `capacity` readings.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "smoothing window must be > 0");
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record `value` and return the mean of the window.
    ///
    /// Non-positive or non-finite values are not measurements; they leave the
    /// window untouched and yield `0.0`.
    pub fn push(&mut self, value: f32) -> f32 {
        if !value.is_finite() || value <= 0.0 {
            return 0.0;
        }

        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(value);

        self.mean()
    }

    /// Mean of the stored readings (`0.0` when empty).
    pub fn mean(&self) -> f32 {
        if self.window.is_empty() {
            return 0.0;
        }
        self.window.iter().sum::<f32>() / self.window.len() as f32
    }

    /// Forget all readings.
    pub fn clear(&mut self) {
        self.window.clear();
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl Default for MeasurementBuffer {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
