//! Fixed-capacity sample ring shared between the capture thread and the
//! analyser.
//!
//! The capture side appends with [`SampleRing::push_slice`]; when the ring is
//! full the oldest samples are overwritten so the most recent `capacity`
//! samples are always available.  Readers take a non-destructive snapshot of
//! the newest samples with [`SampleRing::latest_into`], which is what a
//! time-domain analyser needs: every frame looks at "the last N samples",
//! regardless of how many were consumed before.
//!
//! # Example
//!
//! ```rust
//! use noise_meter::audio::SampleRing;
//!
//! let mut ring = SampleRing::new(4);
//! ring.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0]);
//!
//! let mut out = [0.0_f32; 3];
//! assert_eq!(ring.latest_into(&mut out), 3);
//! assert_eq!(out, [3.0, 4.0, 5.0]);
//! ```

use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// SampleRing
// ---------------------------------------------------------------------------

/// A fixed-capacity circular buffer of mono `f32` samples.
///
/// ## Overflow behaviour
///
/// Pushing past `capacity` silently overwrites the oldest samples.  The ring
/// never allocates after construction.
pub struct SampleRing {
    buf: Vec<f32>,
    /// Index of the *next* write position (wraps around the capacity).
    write_pos: usize,
    /// Number of valid samples currently stored (≤ capacity).
    len: usize,
}

impl SampleRing {
    /// Create a ring holding at most `capacity` samples.
    ///
    /// # Panics
    ///
    /// Panics if `capacity == 0`.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SampleRing capacity must be > 0");
        Self {
            buf: vec![0.0; capacity],
            write_pos: 0,
            len: 0,
        }
    }

    /// Append `data`, overwriting the oldest samples once full.
    pub fn push_slice(&mut self, data: &[f32]) {
        let capacity = self.buf.len();

        // Only the tail of an oversized slice can survive.
        let data = if data.len() > capacity {
            &data[data.len() - capacity..]
        } else {
            data
        };

        for &sample in data {
            self.buf[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % capacity;
        }
        self.len = (self.len + data.len()).min(capacity);
    }

    /// Copy the newest `min(out.len(), len())` samples into the **end** of
    /// `out`, oldest first, and return how many were copied.
    ///
    /// When fewer samples are stored than `out` can hold, the leading part of
    /// `out` is zero-filled so the buffer always reads as "silence, then the
    /// most recent audio".  The ring itself is left untouched.
    pub fn latest_into(&self, out: &mut [f32]) -> usize {
        let capacity = self.buf.len();
        let n = out.len().min(self.len);
        let pad = out.len() - n;

        out[..pad].iter_mut().for_each(|s| *s = 0.0);

        // Oldest of the `n` newest samples.
        let start = (self.write_pos + capacity - n) % capacity;
        for (i, slot) in out[pad..].iter_mut().enumerate() {
            *slot = self.buf[(start + i) % capacity];
        }
        n
    }

    /// Discard all samples.
    pub fn clear(&mut self) {
        self.write_pos = 0;
        self.len = 0;
    }

    /// Number of valid samples currently stored.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when nothing has been captured since the last clear.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Maximum number of samples the ring can hold.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

// ---------------------------------------------------------------------------
// SampleTap
// ---------------------------------------------------------------------------

/// Thread-safe handle to a [`SampleRing`].
///
/// The capture callback pushes into it; every analyser created from the same
/// processing context reads from it.  Cheap to clone (`Arc` clone).
pub type SampleTap = Arc<Mutex<SampleRing>>;

/// Construct a new, empty [`SampleTap`].
pub fn new_tap(capacity: usize) -> SampleTap {
    Arc::new(Mutex::new(SampleRing::new(capacity)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_within_capacity() {
        let mut ring = SampleRing::new(8);
        ring.push_slice(&[0.1, 0.2, 0.3]);

        let mut out = [9.0_f32; 3];
        assert_eq!(ring.latest_into(&mut out), 3);
        assert_eq!(out, [0.1, 0.2, 0.3]);
    }

    #[test]
    fn short_ring_is_zero_padded_at_the_front() {
        let mut ring = SampleRing::new(8);
        ring.push_slice(&[0.5, 0.6]);

        let mut out = [9.0_f32; 4];
        assert_eq!(ring.latest_into(&mut out), 2);
        assert_eq!(out, [0.0, 0.0, 0.5, 0.6]);
    }

    #[test]
    fn overflow_keeps_newest_in_order() {
        let mut ring = SampleRing::new(4);
        ring.push_slice(&[1.0, 2.0, 3.0]);
        ring.push_slice(&[4.0, 5.0, 6.0]);

        assert_eq!(ring.len(), 4);
        let mut out = [0.0_f32; 4];
        ring.latest_into(&mut out);
        assert_eq!(out, [3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn oversized_push_keeps_tail() {
        let mut ring = SampleRing::new(3);
        ring.push_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);

        let mut out = [0.0_f32; 3];
        ring.latest_into(&mut out);
        assert_eq!(out, [5.0, 6.0, 7.0]);
    }

    #[test]
    fn snapshot_is_non_destructive() {
        let mut ring = SampleRing::new(4);
        ring.push_slice(&[0.25; 4]);

        let mut a = [0.0_f32; 4];
        let mut b = [0.0_f32; 4];
        ring.latest_into(&mut a);
        ring.latest_into(&mut b);
        assert_eq!(a, b);
        assert_eq!(ring.len(), 4);
    }

    #[test]
    fn clear_empties_ring() {
        let mut ring = SampleRing::new(4);
        ring.push_slice(&[1.0, 2.0]);
        ring.clear();
        assert!(ring.is_empty());

        let mut out = [7.0_f32; 2];
        assert_eq!(ring.latest_into(&mut out), 0);
        assert_eq!(out, [0.0, 0.0]);
    }

    #[test]
    fn capacity_reported() {
        assert_eq!(SampleRing::new(4096).capacity(), 4096);
    }

    #[test]
    #[should_panic(expected = "SampleRing capacity must be > 0")]
    fn zero_capacity_panics() {
        let _ = SampleRing::new(0);
    }
}
