//! In-memory audio backend for unit tests.
//!
//! [`MockBackend`] counts every stream it opens and every stream that is
//! still running, so tests can assert that no microphone handle outlives
//! its session.  Tests push audio with [`MockBackend::feed`] and simulate an
//! unplugged device with [`MockBackend::unplug`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::audio::buffer::{new_tap, SampleTap};
use crate::audio::device::{AudioBackend, CaptureConstraints, DeviceError, InputStream};

#[derive(Default)]
struct Shared {
    opened: AtomicUsize,
    outstanding: Arc<AtomicUsize>,
    failure: Mutex<Option<DeviceError>>,
    preload: Mutex<Vec<f32>>,
    current: Mutex<Option<(SampleTap, Arc<AtomicBool>)>>,
    last_constraints: Mutex<Option<CaptureConstraints>>,
}

/// Scriptable [`AudioBackend`]; clones share state.
#[derive(Clone, Default)]
pub struct MockBackend {
    shared: Arc<Shared>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend whose every `open` fails with `error`.
    pub fn failing(error: DeviceError) -> Self {
        let backend = Self::new();
        backend.set_failure(Some(error));
        backend
    }

    pub fn set_failure(&self, error: Option<DeviceError>) {
        *self.shared.failure.lock().unwrap() = error;
    }

    /// Samples pushed into every newly opened stream.
    pub fn preload(&self, samples: &[f32]) {
        *self.shared.preload.lock().unwrap() = samples.to_vec();
    }

    /// Push samples into the most recently opened stream.
    pub fn feed(&self, samples: &[f32]) {
        if let Some((tap, _)) = self.shared.current.lock().unwrap().as_ref() {
            tap.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_slice(samples);
        }
    }

    /// Drop everything buffered by the most recently opened stream.
    pub fn drain(&self) {
        if let Some((tap, _)) = self.shared.current.lock().unwrap().as_ref() {
            tap.lock().unwrap_or_else(PoisonError::into_inner).clear();
        }
    }

    /// Poison the most recently opened stream's ring the way a panicking
    /// capture callback would.
    pub fn poison(&self) {
        let tap = match self.shared.current.lock().unwrap().as_ref() {
            Some((tap, _)) => tap.clone(),
            None => return,
        };
        let _ = std::thread::spawn(move || {
            let _guard = tap.lock().unwrap();
            panic!("capture callback panicked");
        })
        .join();
    }

    /// Kill the most recently opened stream as if the device vanished.
    pub fn unplug(&self) {
        if let Some((_, live)) = self.shared.current.lock().unwrap().as_ref() {
            live.store(false, Ordering::Release);
        }
    }

    /// Streams opened so far.
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Streams opened and not yet stopped.
    pub fn outstanding(&self) -> usize {
        self.shared.outstanding.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<CaptureConstraints> {
        self.shared.last_constraints.lock().unwrap().clone()
    }
}

impl AudioBackend for MockBackend {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputStream>, DeviceError> {
        *self.shared.last_constraints.lock().unwrap() = Some(constraints.clone());
        if let Some(error) = self.shared.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let tap = new_tap(constraints.ring_capacity);
        let preload = self.shared.preload.lock().unwrap().clone();
        if !preload.is_empty() {
            tap.lock().unwrap().push_slice(&preload);
        }
        let live = Arc::new(AtomicBool::new(true));

        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.outstanding.fetch_add(1, Ordering::SeqCst);
        *self.shared.current.lock().unwrap() = Some((tap.clone(), Arc::clone(&live)));

        Ok(Box::new(MockStream {
            tap,
            live,
            outstanding: Arc::clone(&self.shared.outstanding),
            stopped: false,
        }))
    }
}

struct MockStream {
    tap: SampleTap,
    live: Arc<AtomicBool>,
    outstanding: Arc<AtomicUsize>,
    stopped: bool,
}

impl InputStream for MockStream {
    fn sample_rate(&self) -> u32 {
        48_000
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn live_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.live)
    }

    fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        self.live.store(false, Ordering::Release);
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}
