//! Session state machine and the shared handles the controller hands out.
//!
//! [`SessionState`] drives the measurement controller.  Callers read an
//! [`AudioSession`] snapshot to render a level display, a duration counter
//! and any error badge.
//!
//! [`SharedSession`] and [`SharedProcessor`] are `Arc<Mutex<…>>` aliases,
//! cheap to clone and safe to share between the controller, its frame loop
//! and the calibration procedure.  Never hold either lock across an
//! `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::time::Instant;

use crate::audio::SignalProcessor;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// States of a measurement session.
///
/// ```text
/// Idle ──start──▶ Starting ──first sample──▶ Active ──stop──▶ Idle
///                    │                          │
///                    └──── acquisition / stream failure ────▶ Error
/// Error ──start / stop──▶ (resources already released) Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No microphone held.
    #[default]
    Idle,

    /// Microphone requested; waiting for the first sample.
    Starting,

    /// Readings are flowing.
    Active,

    /// The last session failed.  All resources have already been released;
    /// the state only carries the message until the next start or stop.
    Error,
}

impl SessionState {
    /// Returns `true` while a session holds (or is acquiring) the microphone.
    ///
    /// ```
    /// use noise_meter::meter::SessionState;
    ///
    /// assert!(!SessionState::Idle.is_running());
    /// assert!(SessionState::Starting.is_running());
    /// assert!(SessionState::Active.is_running());
    /// assert!(!SessionState::Error.is_running());
    /// ```
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Starting | SessionState::Active)
    }

    /// Short label for status displays.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Starting",
            SessionState::Active => "Measuring",
            SessionState::Error => "Error",
        }
    }
}

// ---------------------------------------------------------------------------
// AudioSession
// ---------------------------------------------------------------------------

/// One continuous measurement run.
#[derive(Debug, Clone)]
pub struct AudioSession {
    pub state: SessionState,

    /// Set by the first valid sample, so acquisition latency never counts
    /// toward the duration.
    pub started_at: Option<Instant>,

    /// Whole seconds since `started_at`, refreshed by the 1-second ticker.
    pub duration_secs: u64,

    /// Last smoothed reading delivered to the sink (`0.0` before the first).
    pub last_level: f32,

    /// Message to display when `state == SessionState::Error`.
    pub error_message: Option<String>,

    /// Readings delivered in this session.
    pub frames: u64,

    /// Frames skipped because of a transient read error.
    pub dropped_frames: u64,

    /// Incremented on every start; tasks belonging to an older session use
    /// it to notice they have been superseded.
    pub generation: u64,
}

impl AudioSession {
    pub fn new() -> Self {
        Self {
            state: SessionState::Idle,
            started_at: None,
            duration_secs: 0,
            last_level: 0.0,
            error_message: None,
            frames: 0,
            dropped_frames: 0,
            generation: 0,
        }
    }

    /// Enter `Starting` with cleared counters; returns the new generation.
    pub fn begin(&mut self) -> u64 {
        self.generation += 1;
        self.state = SessionState::Starting;
        self.started_at = None;
        self.duration_secs = 0;
        self.last_level = 0.0;
        self.error_message = None;
        self.frames = 0;
        self.dropped_frames = 0;
        self.generation
    }

    /// `true` while `generation` is the current, running session.
    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.state.is_running()
    }

    /// First valid sample arrived.
    pub fn activate(&mut self, now: Instant) {
        if self.state == SessionState::Starting {
            self.state = SessionState::Active;
            self.started_at = Some(now);
        }
    }

    /// Recompute `duration_secs` from `started_at`.
    pub fn refresh_duration(&mut self, now: Instant) {
        if let Some(started_at) = self.started_at {
            self.duration_secs = now.saturating_duration_since(started_at).as_secs();
        }
    }

    /// Record a failure.  Readings taken so far are kept.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::error!("meter: session failed: {message}");
        self.state = SessionState::Error;
        self.error_message = Some(message);
    }

    /// Back to `Idle`.  The last reading and duration stay available for
    /// reporting and saving.
    pub fn finish(&mut self) {
        if self.state == SessionState::Active {
            self.refresh_duration(Instant::now());
        }
        self.state = SessionState::Idle;
        self.error_message = None;
    }
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Shared handles
// ---------------------------------------------------------------------------

/// Thread-safe handle to the [`AudioSession`].
pub type SharedSession = Arc<Mutex<AudioSession>>;

/// Thread-safe handle to the [`SignalProcessor`] (and so to the calibration
/// offset it owns).
pub type SharedProcessor = Arc<Mutex<SignalProcessor>>;

pub fn new_shared_session() -> SharedSession {
    Arc::new(Mutex::new(AudioSession::new()))
}

pub fn new_shared_processor(processor: SignalProcessor) -> SharedProcessor {
    Arc::new(Mutex::new(processor))
}

/// Lock a shared handle, recovering the data if a previous holder panicked.
///
/// Session and processor state stay meaningful after a panic elsewhere, and
/// the meter must keep releasing audio resources regardless.
pub(crate) fn lock<T>(shared: &Mutex<T>) -> MutexGuard<'_, T> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
