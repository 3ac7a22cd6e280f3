//! Time-domain analysis node.
//!
//! An [`Analyser`] is created from a [`ProcessingContext`](crate::audio::ProcessingContext)
//! and reads the newest `fft_size` samples of the microphone source on
//! demand.  It stays valid only while it is connected, its context is open
//! and the underlying stream is live; every read re-checks all three so the
//! frame loop can tell a transient hiccup from a dead stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError};

use thiserror::Error;

use crate::audio::buffer::SampleTap;

/// Default analysis window (samples per read).
pub const DEFAULT_FFT_SIZE: usize = 4096;

// ---------------------------------------------------------------------------
// ReadError
// ---------------------------------------------------------------------------

/// Why a time-domain read produced no buffer.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ReadError {
    /// The source has not delivered any samples yet.
    #[error("no audio samples captured yet")]
    NoData,

    /// The analyser was disconnected from its source.
    #[error("analyser disconnected")]
    Disconnected,

    /// The processing context was closed.
    #[error("processing context closed")]
    ContextClosed,

    /// The microphone stream stopped (device unplugged, stream error).
    #[error("microphone stream ended")]
    StreamEnded,
}

impl ReadError {
    /// `true` when the analyser can never produce data again.
    ///
    /// ```
    /// use noise_meter::audio::ReadError;
    ///
    /// assert!(!ReadError::NoData.is_fatal());
    /// assert!(ReadError::StreamEnded.is_fatal());
    /// ```
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReadError::Disconnected | ReadError::ContextClosed | ReadError::StreamEnded
        )
    }
}

// ---------------------------------------------------------------------------
// Analyser
// ---------------------------------------------------------------------------

/// Reads time-domain windows from a microphone source.
pub struct Analyser {
    tap: SampleTap,
    fft_size: usize,
    connected: bool,
    context_open: Arc<AtomicBool>,
    stream_live: Arc<AtomicBool>,
}

impl Analyser {
    pub(crate) fn new(
        tap: SampleTap,
        fft_size: usize,
        context_open: Arc<AtomicBool>,
        stream_live: Arc<AtomicBool>,
    ) -> Self {
        Self {
            tap,
            fft_size,
            connected: true,
            context_open,
            stream_live,
        }
    }

    /// Samples returned by a read once a full window has been captured.
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Detach from the source.  Subsequent reads fail with
    /// [`ReadError::Disconnected`].  Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        self.connected = false;
    }

    /// Fill `out` with the newest `fft_size` samples.
    ///
    /// Until the source has captured a full window `out` holds only the
    /// samples captured so far, so a short start-up read is not diluted by
    /// padding.
    pub fn read_time_domain(&self, out: &mut Vec<f32>) -> Result<(), ReadError> {
        if !self.connected {
            return Err(ReadError::Disconnected);
        }
        if !self.context_open.load(Ordering::Acquire) {
            return Err(ReadError::ContextClosed);
        }
        if !self.stream_live.load(Ordering::Acquire) {
            return Err(ReadError::StreamEnded);
        }

        // The ring stays consistent across a panicking writer; keep reading.
        let ring = self.tap.lock().unwrap_or_else(PoisonError::into_inner);
        let available = ring.len().min(self.fft_size);
        if available == 0 {
            return Err(ReadError::NoData);
        }
        out.resize(available, 0.0);
        ring.latest_into(out);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::new_tap;

    fn analyser(fft_size: usize) -> (Analyser, SampleTap, Arc<AtomicBool>, Arc<AtomicBool>) {
        let tap = new_tap(fft_size * 2);
        let open = Arc::new(AtomicBool::new(true));
        let live = Arc::new(AtomicBool::new(true));
        let a = Analyser::new(tap.clone(), fft_size, open.clone(), live.clone());
        (a, tap, open, live)
    }

    #[test]
    fn empty_source_reports_no_data() {
        let (a, _tap, _, _) = analyser(8);
        let mut out = Vec::new();
        assert_eq!(a.read_time_domain(&mut out), Err(ReadError::NoData));
    }

    #[test]
    fn read_returns_window_of_fft_size() {
        let (a, tap, _, _) = analyser(4);
        tap.lock().unwrap().push_slice(&[0.1, 0.2, 0.3, 0.4, 0.5, 0.6]);

        let mut out = Vec::new();
        a.read_time_domain(&mut out).unwrap();
        assert_eq!(out, vec![0.3, 0.4, 0.5, 0.6]);
    }

    #[test]
    fn short_capture_reads_only_captured_samples() {
        let (a, tap, _, _) = analyser(8);
        tap.lock().unwrap().push_slice(&[0.5; 3]);

        let mut out = vec![9.0; 8];
        a.read_time_domain(&mut out).unwrap();
        assert_eq!(out, vec![0.5; 3]);

        tap.lock().unwrap().push_slice(&[0.25; 10]);
        a.read_time_domain(&mut out).unwrap();
        assert_eq!(out, vec![0.25; 8]);
    }

    #[test]
    fn poisoned_ring_still_reads() {
        let (a, tap, _, _) = analyser(4);
        tap.lock().unwrap().push_slice(&[0.5; 4]);

        let poisoner = tap.clone();
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.lock().unwrap();
            panic!("writer panicked while holding the ring");
        })
        .join();
        assert!(tap.is_poisoned());

        let mut out = Vec::new();
        a.read_time_domain(&mut out).unwrap();
        assert_eq!(out, vec![0.5; 4]);
    }

    #[test]
    fn disconnected_analyser_fails() {
        let (mut a, tap, _, _) = analyser(4);
        tap.lock().unwrap().push_slice(&[0.5; 4]);
        a.disconnect();
        a.disconnect();
        assert!(!a.is_connected());
        assert_eq!(a.read_time_domain(&mut Vec::new()), Err(ReadError::Disconnected));
    }

    #[test]
    fn closed_context_and_dead_stream_are_fatal() {
        let (a, tap, open, live) = analyser(4);
        tap.lock().unwrap().push_slice(&[0.5; 4]);

        live.store(false, Ordering::Release);
        let err = a.read_time_domain(&mut Vec::new()).unwrap_err();
        assert_eq!(err, ReadError::StreamEnded);
        assert!(err.is_fatal());

        live.store(true, Ordering::Release);
        open.store(false, Ordering::Release);
        assert_eq!(a.read_time_domain(&mut Vec::new()), Err(ReadError::ContextClosed));
    }
}
