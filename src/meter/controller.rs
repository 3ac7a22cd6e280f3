//! Measurement session controller: drives the start → frames → stop loop.
//!
//! [`MeasurementController`] owns the session state machine and spawns two
//! tokio tasks per session:
//!
//! ```text
//! start(sink)
//!   ├─ session: Idle → Starting, smoothing window cleared
//!   ├─ DeviceManager::initialize          (Err → Error, nothing held)
//!   ├─ ProcessingContext::create_analyser (4096-sample window)
//!   ├─ spawn frame loop ─┐
//!   └─ spawn 1 s ticker  │
//!                        ▼
//!   loop {
//!     clock.next_frame().await
//!     still current & running?            ← cancellation check
//!     analyser.read_time_domain
//!       ├─ NoData → skip frame (Starting times out → Error)
//!       └─ fatal  → Error, release devices, exit
//!     calculate_level → smooth
//!     session lock held:
//!       still current?                    ← stop() waits here
//!       first frame: Starting → Active
//!       sink.on_level(db)
//!   }
//!
//! stop()
//!   └─ state → Idle, abort + await both tasks, release devices
//! ```
//!
//! Once `stop()` returns the frame loop has terminated, so no reading can
//! reach the sink afterwards.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::audio::{
    Analyser, CaptureConstraints, DeviceError, ReadError, SharedDevices, SignalProcessor,
    DEFAULT_FFT_SIZE,
};
use crate::config::AppConfig;
use crate::meter::calibration::{CalibrationError, CalibrationOutcome, CalibrationOptions, Calibrator};
use crate::meter::clock::{FrameClock, IntervalClock, DEFAULT_FRAME_RATE};
use crate::meter::state::{
    lock, new_shared_processor, new_shared_session, AudioSession, SessionState, SharedProcessor,
    SharedSession,
};
use crate::report::{generate_report, NoiseContext, NoiseReport};
use crate::store::{MeasurementStore, NoiseRecord, StoreError};

// ---------------------------------------------------------------------------
// MeterError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum MeterError {
    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error("no reading available yet, run a measurement first")]
    NoReading,

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ---------------------------------------------------------------------------
// LevelSink
// ---------------------------------------------------------------------------

/// Receives every smoothed reading, in frame order, on the frame loop task.
///
/// Called while the session lock is held, so `stop()` cannot complete
/// between the cancellation check and the delivery.  A sink must return
/// promptly and must not call back into the [`MeasurementController`].
///
/// Implemented for any `FnMut(f32) + Send + 'static` closure.
pub trait LevelSink: Send + 'static {
    fn on_level(&mut self, db: f32);
}

impl<F> LevelSink for F
where
    F: FnMut(f32) + Send + 'static,
{
    fn on_level(&mut self, db: f32) {
        self(db)
    }
}

// ---------------------------------------------------------------------------
// MeterOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct MeterOptions {
    /// Samples per analysis window.
    pub fft_size: usize,
    /// Frame rate of the default [`IntervalClock`].
    pub frame_rate: u32,
    /// A session that has not seen a sample after this long fails.
    pub first_sample_timeout: Duration,
    pub constraints: CaptureConstraints,
}

impl Default for MeterOptions {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            frame_rate: DEFAULT_FRAME_RATE,
            first_sample_timeout: Duration::from_secs(5),
            constraints: CaptureConstraints::unprocessed(),
        }
    }
}

impl MeterOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            fft_size: config.meter.fft_size,
            frame_rate: config.meter.frame_rate,
            first_sample_timeout: Duration::from_millis(config.meter.first_sample_timeout_ms),
            constraints: config.capture.constraints(),
        }
    }
}

// ---------------------------------------------------------------------------
// MeasurementController
// ---------------------------------------------------------------------------

struct SessionTasks {
    frame_loop: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

impl SessionTasks {
    /// Abort both tasks and wait until they are gone.
    async fn shutdown(self) {
        self.frame_loop.abort();
        self.ticker.abort();
        // JoinError here only ever means "cancelled" or a panic already
        // logged by the runtime; either way the task is finished.
        let _ = self.frame_loop.await;
        let _ = self.ticker.await;
    }
}

/// Orchestrates measurement sessions and calibration on one microphone.
pub struct MeasurementController {
    devices: SharedDevices,
    processor: SharedProcessor,
    session: SharedSession,
    options: MeterOptions,
    calibrator: Calibrator,
    tasks: Option<SessionTasks>,
}

impl MeasurementController {
    /// Controller with a fresh processor and session.
    pub fn new(devices: SharedDevices, options: MeterOptions) -> Self {
        Self::with_processor(devices, new_shared_processor(SignalProcessor::new()), options)
    }

    /// Controller sharing an existing processor (and so its calibration).
    pub fn with_processor(
        devices: SharedDevices,
        processor: SharedProcessor,
        options: MeterOptions,
    ) -> Self {
        Self {
            devices,
            processor,
            session: new_shared_session(),
            options,
            calibrator: Calibrator::default(),
            tasks: None,
        }
    }

    /// Replace the calibration options used by [`calibrate`](Self::calibrate).
    pub fn with_calibration(mut self, options: CalibrationOptions) -> Self {
        self.calibrator = Calibrator::new(options);
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    /// Snapshot of the current session.
    pub fn session(&self) -> AudioSession {
        lock(&self.session).clone()
    }

    pub fn state(&self) -> SessionState {
        lock(&self.session).state
    }

    /// Handle to the live session state.
    pub fn shared_session(&self) -> SharedSession {
        Arc::clone(&self.session)
    }

    pub fn processor(&self) -> SharedProcessor {
        Arc::clone(&self.processor)
    }

    pub fn devices(&self) -> SharedDevices {
        Arc::clone(&self.devices)
    }

    // -----------------------------------------------------------------------
    // Session lifecycle
    // -----------------------------------------------------------------------

    /// Start a session paced by an [`IntervalClock`] at the configured rate.
    pub async fn start<S: LevelSink>(&mut self, sink: S) -> Result<(), MeterError> {
        let clock = IntervalClock::new(self.options.frame_rate);
        self.start_with_clock(sink, clock).await
    }

    /// Start a session whose frames come from `clock`.
    ///
    /// A no-op while a session is already starting or active.  On failure
    /// the session is left in [`SessionState::Error`] with the device's
    /// message and nothing is held.
    pub async fn start_with_clock<S, C>(&mut self, sink: S, clock: C) -> Result<(), MeterError>
    where
        S: LevelSink,
        C: FrameClock + 'static,
    {
        if lock(&self.session).state.is_running() {
            log::debug!("meter: start ignored, session already running");
            return Ok(());
        }

        // A loop that ended on its own (stream loss) still has to be reaped.
        if let Some(tasks) = self.tasks.take() {
            tasks.shutdown().await;
        }

        let generation = lock(&self.session).begin();
        lock(&self.processor).reset_smoothing();
        log::info!("meter: starting session #{generation}");

        let context = {
            let mut devices = self.devices.lock().await;
            devices.initialize(&self.options.constraints).await
        };
        let analyser = match context.and_then(|ctx| ctx.create_analyser(self.options.fft_size)) {
            Ok(analyser) => analyser,
            Err(e) => {
                lock(&self.session).fail(e.to_string());
                self.devices.lock().await.release();
                return Err(e.into());
            }
        };

        let frame_loop = FrameLoop {
            generation,
            analyser,
            devices: Arc::clone(&self.devices),
            processor: Arc::clone(&self.processor),
            session: Arc::clone(&self.session),
            first_sample_timeout: self.options.first_sample_timeout,
        };

        self.tasks = Some(SessionTasks {
            frame_loop: tokio::spawn(frame_loop.run(Box::new(clock), Box::new(sink))),
            ticker: tokio::spawn(run_duration_ticker(Arc::clone(&self.session), generation)),
        });
        Ok(())
    }

    /// Stop the session and release the microphone.
    ///
    /// Safe to call when nothing is running.
    pub async fn stop(&mut self) {
        let was = {
            let mut session = lock(&self.session);
            let was = session.state;
            session.finish();
            was
        };

        if let Some(tasks) = self.tasks.take() {
            tasks.shutdown().await;
        }
        self.devices.lock().await.release();

        if was.is_running() {
            log::info!("meter: session stopped");
        }
    }

    // -----------------------------------------------------------------------
    // Calibration
    // -----------------------------------------------------------------------

    /// Calibrate the processor, stopping any running session first.
    pub async fn calibrate(&mut self) -> Result<CalibrationOutcome, CalibrationError> {
        if lock(&self.session).state.is_running() {
            log::info!("meter: stopping session to calibrate");
        }
        self.stop().await;
        self.calibrator
            .run(&self.devices, &self.processor, &self.session)
            .await
    }

    // -----------------------------------------------------------------------
    // Downstream collaborators
    // -----------------------------------------------------------------------

    /// Persistence record for the last reading, if there is one.
    pub fn record(&self, kind: &str) -> Option<NoiseRecord> {
        let session = lock(&self.session);
        NoiseRecord::from_reading(session.last_level, session.duration_secs, kind)
    }

    /// Hand the last reading to `store`.
    pub async fn save(
        &self,
        store: &dyn MeasurementStore,
        kind: &str,
    ) -> Result<NoiseRecord, MeterError> {
        let record = self.record(kind).ok_or(MeterError::NoReading)?;
        store.save(&record).await?;
        Ok(record)
    }

    /// Report for the last reading.
    pub fn report(&self, context: NoiseContext) -> Option<NoiseReport> {
        let session = lock(&self.session);
        if session.last_level <= 0.0 {
            return None;
        }
        Some(generate_report(
            session.last_level,
            session.duration_secs as f32 / 60.0,
            context,
        ))
    }
}

impl Drop for MeasurementController {
    fn drop(&mut self) {
        lock(&self.session).finish();
        if let Some(tasks) = self.tasks.take() {
            tasks.frame_loop.abort();
            tasks.ticker.abort();
        }
        // Best effort: a concurrent holder (a calibration elsewhere) releases
        // through its own guard.
        if let Ok(mut devices) = self.devices.try_lock() {
            devices.release();
        }
    }
}

// ---------------------------------------------------------------------------
// Frame loop
// ---------------------------------------------------------------------------

struct FrameLoop {
    generation: u64,
    analyser: Analyser,
    devices: SharedDevices,
    processor: SharedProcessor,
    session: SharedSession,
    first_sample_timeout: Duration,
}

enum Frame {
    Emitted,
    Skipped,
    Exit,
}

impl FrameLoop {
    async fn run(mut self, mut clock: Box<dyn FrameClock>, mut sink: Box<dyn LevelSink>) {
        let requested_at = Instant::now();
        let mut samples = Vec::with_capacity(self.analyser.fft_size());

        loop {
            clock.next_frame().await;

            match self.frame(&mut samples, requested_at, sink.as_mut()) {
                Frame::Emitted | Frame::Skipped => {}
                Frame::Exit => break,
            }
        }

        self.analyser.disconnect();
        let failed = lock(&self.session).state == SessionState::Error;
        if failed {
            self.devices.lock().await.release();
        }
        log::debug!("meter: frame loop #{} exited", self.generation);
    }

    /// One read-compute-deliver step.  Never panics on bad audio.
    fn frame(
        &mut self,
        samples: &mut Vec<f32>,
        requested_at: Instant,
        sink: &mut dyn LevelSink,
    ) -> Frame {
        if !lock(&self.session).is_current(self.generation) {
            return Frame::Exit;
        }

        match self.analyser.read_time_domain(samples) {
            Ok(()) => {}
            Err(ReadError::NoData) => {
                let mut session = lock(&self.session);
                if session.state == SessionState::Starting
                    && requested_at.elapsed() >= self.first_sample_timeout
                {
                    session.fail("no audio received from the microphone");
                    return Frame::Exit;
                }
                session.dropped_frames += 1;
                return Frame::Skipped;
            }
            Err(e) => {
                let mut session = lock(&self.session);
                if session.is_current(self.generation) {
                    session.fail(format!("microphone disconnected: {e}"));
                }
                return Frame::Exit;
            }
        }

        let db = {
            let mut processor = lock(&self.processor);
            let level = processor.calculate_level(samples);
            processor.smooth(level)
        };

        let mut session = lock(&self.session);
        if !session.is_current(self.generation) {
            return Frame::Exit;
        }
        if session.state == SessionState::Starting {
            session.activate(Instant::now());
            log::info!("meter: first sample received, measuring");
        }
        session.last_level = db;
        session.frames += 1;
        sink.on_level(db);
        Frame::Emitted
    }
}

/// Refresh `duration_secs` once per second while the session is active.
async fn run_duration_ticker(session: SharedSession, generation: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let mut session = lock(&session);
        if !session.is_current(generation) {
            break;
        }
        if session.state == SessionState::Active {
            session.refresh_duration(Instant::now());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
