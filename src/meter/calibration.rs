//! Calibration: map the room's ambient level onto a target baseline.
//!
//! ## Procedure
//!
//! 1. Refuse while a measurement session runs.
//! 2. Take the [`DeviceManager`] exclusively and open an unprocessed stream.
//! 3. Wait for the capture pipeline to settle.
//! 4. Take `samples` readings `interval` apart with
//!    [`SignalProcessor::raw_level`](crate::audio::SignalProcessor::raw_level),
//!    which ignores the current offset.
//! 5. `offset = target_db − mean(raw readings)`; commit it.
//!
//! The microphone is released on every path, including when the calibration
//! future is dropped half-way.  A failed calibration never touches the offset
//! already in effect.

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::MutexGuard;

use crate::audio::{
    Analyser, CaptureConstraints, DeviceError, DeviceManager, ReadError, SharedDevices,
    DEFAULT_FFT_SIZE,
};
use crate::meter::state::{lock, SharedProcessor, SharedSession};

/// Ambient baseline a quiet room should read after calibration.
pub const DEFAULT_TARGET_DB: f32 = 42.0;

// ---------------------------------------------------------------------------
// CalibrationError
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("a measurement session is running; stop it before calibrating")]
    SessionActive,

    #[error("calibration could not acquire the microphone: {0}")]
    Device(#[from] DeviceError),

    #[error("calibration sample failed: {0}")]
    Read(#[from] ReadError),

    #[error("no signal during calibration (microphone muted?)")]
    NoSignal,

    #[error("invalid calibration options: {0}")]
    InvalidOptions(String),
}

// ---------------------------------------------------------------------------
// Options / outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOptions {
    pub target_db: f32,
    /// Number of readings averaged.
    pub samples: usize,
    /// Spacing between readings.
    pub interval: Duration,
    /// Wait after acquisition before the first reading.
    pub settle: Duration,
    pub fft_size: usize,
    pub constraints: CaptureConstraints,
}

impl Default for CalibrationOptions {
    fn default() -> Self {
        Self {
            target_db: DEFAULT_TARGET_DB,
            samples: 5,
            interval: Duration::from_millis(250),
            settle: Duration::from_millis(500),
            fft_size: DEFAULT_FFT_SIZE,
            constraints: CaptureConstraints::unprocessed(),
        }
    }
}

/// Result of a successful calibration.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    /// Offset now in effect.
    pub offset_db: f32,
    /// Mean of the non-silent raw readings.
    pub average_raw_db: f32,
    /// Raw reading per sample; `None` where the buffer was silent.
    pub readings: Vec<Option<f32>>,
}

// ---------------------------------------------------------------------------
// Exclusive device access
// ---------------------------------------------------------------------------

/// Device manager lock that releases the microphone when it goes out of
/// scope, whichever way that happens.
struct Exclusive<'a> {
    devices: MutexGuard<'a, DeviceManager>,
}

impl Deref for Exclusive<'_> {
    type Target = DeviceManager;

    fn deref(&self) -> &DeviceManager {
        &self.devices
    }
}

impl DerefMut for Exclusive<'_> {
    fn deref_mut(&mut self) -> &mut DeviceManager {
        &mut self.devices
    }
}

impl Drop for Exclusive<'_> {
    fn drop(&mut self) {
        self.devices.release();
    }
}

// ---------------------------------------------------------------------------
// Calibrator
// ---------------------------------------------------------------------------

pub struct Calibrator {
    options: CalibrationOptions,
}

impl Calibrator {
    pub fn new(options: CalibrationOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CalibrationOptions {
        &self.options
    }

    /// Run the procedure and commit the new offset into `processor`.
    pub async fn run(
        &self,
        devices: &SharedDevices,
        processor: &SharedProcessor,
        session: &SharedSession,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        if lock(session).state.is_running() {
            return Err(CalibrationError::SessionActive);
        }
        self.validate()?;

        log::info!(
            "calibration: starting ({} samples, target {:.1} dB)",
            self.options.samples,
            self.options.target_db
        );

        let readings = {
            let mut exclusive = Exclusive {
                devices: devices.lock().await,
            };
            self.collect(&mut exclusive, processor).await
        };
        let readings = match readings {
            Ok(readings) => readings,
            Err(e) => {
                log::warn!("calibration: aborted, keeping previous offset: {e}");
                return Err(e);
            }
        };

        let valid: Vec<f32> = readings.iter().flatten().copied().collect();
        if valid.is_empty() {
            log::warn!("calibration: every sample was silent, keeping previous offset");
            return Err(CalibrationError::NoSignal);
        }
        let average_raw_db = valid.iter().sum::<f32>() / valid.len() as f32;
        let offset_db = self.options.target_db - average_raw_db;

        if !lock(processor).set_calibration_offset(offset_db) {
            return Err(CalibrationError::NoSignal);
        }

        log::info!(
            "calibration: raw ambient {average_raw_db:.1} dB → offset {offset_db:+.1} dB"
        );
        Ok(CalibrationOutcome {
            offset_db,
            average_raw_db,
            readings,
        })
    }

    fn validate(&self) -> Result<(), CalibrationError> {
        let o = &self.options;
        if o.samples == 0 {
            return Err(CalibrationError::InvalidOptions("samples must be > 0".into()));
        }
        if !o.target_db.is_finite() {
            return Err(CalibrationError::InvalidOptions("target must be finite".into()));
        }
        Ok(())
    }

    async fn collect(
        &self,
        devices: &mut DeviceManager,
        processor: &SharedProcessor,
    ) -> Result<Vec<Option<f32>>, CalibrationError> {
        let context = devices.initialize(&self.options.constraints).await?;
        let analyser = context.create_analyser(self.options.fft_size)?;

        tokio::time::sleep(self.options.settle).await;

        let mut readings = Vec::with_capacity(self.options.samples);
        let mut buffer = Vec::with_capacity(self.options.fft_size);
        for i in 0..self.options.samples {
            if i > 0 {
                tokio::time::sleep(self.options.interval).await;
            }
            let reading = sample(&analyser, &mut buffer, processor)?;
            log::debug!("calibration: sample {}/{}: {reading:?}", i + 1, self.options.samples);
            readings.push(reading);
        }
        Ok(readings)
    }
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new(CalibrationOptions::default())
    }
}

fn sample(
    analyser: &Analyser,
    buffer: &mut Vec<f32>,
    processor: &SharedProcessor,
) -> Result<Option<f32>, CalibrationError> {
    analyser.read_time_domain(buffer)?;
    Ok(lock(processor).raw_level(buffer))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
