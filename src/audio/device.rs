//! Exclusive ownership of the microphone stream and its processing context.
//!
//! [`DeviceManager`] is the only place audio hardware is acquired or
//! released.  The measurement controller and the calibration procedure both
//! go through it (behind [`SharedDevices`]), so "who holds the microphone" is
//! answered by a single mutex and cleanup is a single code path:
//!
//! ```text
//! initialize(constraints)
//!   ├─ release()                      ← whatever was held before
//!   ├─ spawn_blocking(backend.open)   → Box<dyn InputStream>
//!   └─ ProcessingContext::new(stream) → handed to the caller
//!
//! release()  (also on Drop)
//!   ├─ context.close()                → analysers report ContextClosed
//!   └─ stream.stop()                  → tracks stopped, capture thread exits
//! ```

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::audio::analyser::Analyser;
use crate::audio::buffer::SampleTap;

/// Samples retained by the capture ring (a little over one second at 48 kHz).
pub const DEFAULT_RING_CAPACITY: usize = 65_536;

// ---------------------------------------------------------------------------
// CaptureConstraints
// ---------------------------------------------------------------------------

/// What the caller asks of the microphone.
///
/// Post-processing (echo cancellation, noise suppression, automatic gain)
/// biases the raw amplitude, so the level meter always asks for it to be
/// off; see [`CaptureConstraints::unprocessed`].
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Input device name; `None` selects the host default.
    pub device_name: Option<String>,
    /// Capacity of the sample ring analysers read from.
    pub ring_capacity: usize,
}

impl CaptureConstraints {
    /// Raw capture from the default device.
    pub fn unprocessed() -> Self {
        Self {
            echo_cancellation: false,
            noise_suppression: false,
            auto_gain_control: false,
            device_name: None,
            ring_capacity: DEFAULT_RING_CAPACITY,
        }
    }

    /// Raw capture from a named device (`None` = default).
    pub fn with_device(mut self, device_name: Option<String>) -> Self {
        self.device_name = device_name;
        self
    }

    /// `true` when any post-processing stage was requested.
    pub fn wants_processing(&self) -> bool {
        self.echo_cancellation || self.noise_suppression || self.auto_gain_control
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::unprocessed()
    }
}

// ---------------------------------------------------------------------------
// DeviceError
// ---------------------------------------------------------------------------

/// Reasons the microphone could not be acquired.
///
/// None of these are fatal to the process; callers surface them as a
/// "not available" state.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeviceError {
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),

    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device `{0}` not found")]
    DeviceNotFound(String),

    #[error("unsupported capture configuration: {0}")]
    Unsupported(String),

    #[error("failed to open audio stream: {0}")]
    Stream(String),

    #[error("processing context is closed")]
    ContextClosed,

    #[error("audio backend failed: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Backend seam
// ---------------------------------------------------------------------------

/// A live microphone stream.
///
/// Implementations push mono `f32` samples into [`InputStream::tap`] and
/// clear [`InputStream::live_flag`] when the stream dies on its own.
pub trait InputStream: Send {
    /// Native sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Ring the captured samples are written to.
    fn tap(&self) -> SampleTap;

    /// Shared flag that is `true` while the stream delivers audio.
    fn live_flag(&self) -> Arc<AtomicBool>;

    /// Stop every track.  Must be idempotent.
    fn stop(&mut self);
}

/// Opens microphone streams.
///
/// `open` may block (device negotiation, permission prompts); the
/// [`DeviceManager`] always calls it from `spawn_blocking`.
pub trait AudioBackend: Send + Sync {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputStream>, DeviceError>;
}

// Compile-time assertion: Arc<dyn AudioBackend> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Arc<dyn AudioBackend>) {}
};

// ---------------------------------------------------------------------------
// ProcessingContext
// ---------------------------------------------------------------------------

/// Processing graph root bound to one stream.
///
/// Cheap to clone; all clones share the open/closed flag, so closing the
/// context through the [`DeviceManager`] invalidates every analyser created
/// from any clone.
#[derive(Clone)]
pub struct ProcessingContext {
    sample_rate: u32,
    tap: SampleTap,
    open: Arc<AtomicBool>,
    stream_live: Arc<AtomicBool>,
}

impl ProcessingContext {
    fn new(stream: &dyn InputStream) -> Self {
        Self {
            sample_rate: stream.sample_rate(),
            tap: stream.tap(),
            open: Arc::new(AtomicBool::new(true)),
            stream_live: stream.live_flag(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn is_closed(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }

    /// Create an analyser connected to the microphone source.
    pub fn create_analyser(&self, fft_size: usize) -> Result<Analyser, DeviceError> {
        if self.is_closed() {
            return Err(DeviceError::ContextClosed);
        }
        if fft_size == 0 {
            return Err(DeviceError::Unsupported("analyser window must be > 0".into()));
        }
        Ok(Analyser::new(
            self.tap.clone(),
            fft_size,
            Arc::clone(&self.open),
            Arc::clone(&self.stream_live),
        ))
    }

    /// Close the context.  Returns `false` if it was already closed.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::AcqRel)
    }
}

impl fmt::Debug for ProcessingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessingContext")
            .field("sample_rate", &self.sample_rate)
            .field("open", &!self.is_closed())
            .field("stream_live", &self.stream_live.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// DeviceManager
// ---------------------------------------------------------------------------

/// Owns at most one stream and one context at a time.
pub struct DeviceManager {
    backend: Arc<dyn AudioBackend>,
    stream: Option<Box<dyn InputStream>>,
    context: Option<ProcessingContext>,
    is_available: bool,
    error: Option<String>,
}

impl DeviceManager {
    pub fn new(backend: Arc<dyn AudioBackend>) -> Self {
        Self {
            backend,
            stream: None,
            context: None,
            is_available: false,
            error: None,
        }
    }

    /// Check the permission/hardware path with a throwaway stream.
    ///
    /// The throwaway stream is stopped before this returns.  While a stream is
    /// already held the answer is `true` without opening a second one.
    pub async fn check_availability(&mut self) -> bool {
        if self.is_initialized() {
            return true;
        }

        let backend = Arc::clone(&self.backend);
        match open_stream(backend, CaptureConstraints::unprocessed()).await {
            Ok(mut stream) => {
                stream.stop();
                log::debug!("device: availability check succeeded");
                self.is_available = true;
            }
            Err(e) => {
                log::warn!("device: availability check failed: {e}");
                self.error = Some(e.to_string());
                self.is_available = false;
            }
        }
        self.is_available
    }

    /// Release anything held, then acquire a fresh stream and context.
    ///
    /// On failure the error message is also kept in [`DeviceManager::error`].
    pub async fn initialize(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<ProcessingContext, DeviceError> {
        self.release();

        let backend = Arc::clone(&self.backend);
        let stream = match open_stream(backend, constraints.clone()).await {
            Ok(stream) => stream,
            Err(e) => {
                log::error!("device: initialize failed: {e}");
                self.error = Some(e.to_string());
                self.is_available = false;
                return Err(e);
            }
        };

        let context = ProcessingContext::new(stream.as_ref());
        log::info!(
            "device: microphone acquired ({} Hz)",
            context.sample_rate()
        );

        self.stream = Some(stream);
        self.context = Some(context.clone());
        self.is_available = true;
        self.error = None;
        Ok(context)
    }

    /// Stop every track and close the context.  Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(context) = self.context.take() {
            context.close();
        }
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            log::debug!("device: microphone released");
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.stream.is_some()
    }

    pub fn is_available(&self) -> bool {
        self.is_available
    }

    /// Last acquisition error, cleared on a successful [`initialize`](Self::initialize).
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// The context currently held, if any.
    pub fn context(&self) -> Option<&ProcessingContext> {
        self.context.as_ref()
    }
}

/// Run the (possibly blocking) backend open on the blocking pool.
async fn open_stream(
    backend: Arc<dyn AudioBackend>,
    constraints: CaptureConstraints,
) -> Result<Box<dyn InputStream>, DeviceError> {
    tokio::task::spawn_blocking(move || backend.open(&constraints))
        .await
        .map_err(|e| DeviceError::Internal(e.to_string()))?
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.release();
    }
}

// ---------------------------------------------------------------------------
// SharedDevices
// ---------------------------------------------------------------------------

/// Async mutex around the [`DeviceManager`].
///
/// Held across `initialize().await` by the session controller and for the
/// whole calibration procedure, which is what keeps the two from ever using
/// the microphone at the same time.
pub type SharedDevices = Arc<tokio::sync::Mutex<DeviceManager>>;

/// Wrap `backend` in a new [`SharedDevices`].
pub fn new_shared_devices(backend: Arc<dyn AudioBackend>) -> SharedDevices {
    Arc::new(tokio::sync::Mutex::new(DeviceManager::new(backend)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
