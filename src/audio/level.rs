//! Sample buffer → calibrated sound-pressure-level estimate.
//!
//! [`SignalProcessor`] owns the calibration state and the smoothing window.
//! The conversion runs in these steps:
//!
//! | Step | Operation |
//! |------|-----------|
//! | 1 | Drop non-finite and out-of-range (`|s| > 1`) samples |
//! | 2 | RMS over the remaining samples |
//! | 3 | RMS below [`MIN_RMS`] → [`SILENCE_FLOOR_DB`] |
//! | 4 | `20 · log10(rms)` (dBFS, always ≤ 0) |
//! | 5 | `+ REFERENCE_DB + offset_db` (approximate dB SPL) |
//! | 6 | Clamp to `[MIN_LEVEL_DB, MAX_LEVEL_DB]`, round |
//!
//! # Example
//!
//! ```rust
//! use noise_meter::audio::{SignalProcessor, MAX_LEVEL_DB, MIN_LEVEL_DB, SILENCE_FLOOR_DB};
//!
//! let mut dsp = SignalProcessor::new();
//! assert_eq!(dsp.calculate_level(&[]), SILENCE_FLOOR_DB);
//!
//! let tone: Vec<f32> = (0..4096).map(|i| (i as f32 * 0.05).sin() * 0.1).collect();
//! let db = dsp.calculate_level(&tone);
//! assert!((MIN_LEVEL_DB..=MAX_LEVEL_DB).contains(&db));
//! ```

use crate::audio::smoothing::MeasurementBuffer;

/// Added to dBFS to approximate the dB SPL scale (94 dB SPL ≙ 1 Pa).
pub const REFERENCE_DB: f32 = 94.0;

/// Calibration offset in effect until a calibration succeeds.
pub const DEFAULT_CALIBRATION_OFFSET_DB: f32 = 15.0;

/// "No signal" placeholder returned for silent or unusable buffers.
pub const SILENCE_FLOOR_DB: f32 = 40.0;

/// Lower bound of every surfaced reading.
pub const MIN_LEVEL_DB: f32 = 30.0;

/// Upper bound of every surfaced reading.
pub const MAX_LEVEL_DB: f32 = 120.0;

/// RMS amplitude treated as digital silence.
pub const MIN_RMS: f32 = 1e-5;

// ---------------------------------------------------------------------------
// RMS helpers
// ---------------------------------------------------------------------------

/// RMS of the finite samples within `[-1.0, 1.0]`, or `None` when there are
/// none.
pub fn valid_rms(samples: &[f32]) -> Option<f32> {
    let (sum_sq, count) = samples
        .iter()
        .filter(|s| s.is_finite() && s.abs() <= 1.0)
        .fold((0.0_f64, 0_usize), |(acc, n), &s| {
            (acc + f64::from(s) * f64::from(s), n + 1)
        });

    if count == 0 {
        return None;
    }
    Some((sum_sq / count as f64).sqrt() as f32)
}

/// Full-scale decibels for an RMS amplitude, or `None` below [`MIN_RMS`].
pub fn dbfs(rms: f32) -> Option<f32> {
    if !rms.is_finite() || rms < MIN_RMS {
        return None;
    }
    Some(20.0 * rms.log10())
}

// ---------------------------------------------------------------------------
// CalibrationState
// ---------------------------------------------------------------------------

/// Correction applied on top of the reference offset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// Signed correction in dB.
    pub offset_db: f32,
    /// `true` once a calibration has completed in this process.
    pub auto_calibrated: bool,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            offset_db: DEFAULT_CALIBRATION_OFFSET_DB,
            auto_calibrated: false,
        }
    }
}

// ---------------------------------------------------------------------------
// SignalProcessor
// ---------------------------------------------------------------------------

/// Converts time-domain buffers into calibrated, smoothed decibel readings.
///
/// One instance is shared (behind a mutex) by the measurement controller and
/// the calibration procedure; independent instances never affect each other.
#[derive(Debug, Clone, Default)]
pub struct SignalProcessor {
    calibration: CalibrationState,
    smoothing: MeasurementBuffer,
}

impl SignalProcessor {
    /// Processor with the default calibration offset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Processor starting from a previously stored offset.
    ///
    /// A restored offset does not count as a calibration in this process.
    pub fn with_offset(offset_db: f32) -> Self {
        let mut processor = Self::default();
        if offset_db.is_finite() {
            processor.calibration.offset_db = offset_db;
        }
        processor
    }

    /// Calibrated level of `buffer`, rounded and clamped to
    /// `[MIN_LEVEL_DB, MAX_LEVEL_DB]`.
    ///
    /// Empty, silent and garbage buffers yield [`SILENCE_FLOOR_DB`].
    pub fn calculate_level(&self, buffer: &[f32]) -> f32 {
        let Some(full_scale) = valid_rms(buffer).and_then(dbfs) else {
            return SILENCE_FLOOR_DB;
        };

        let level = full_scale + REFERENCE_DB + self.calibration.offset_db;
        if !level.is_finite() {
            return SILENCE_FLOOR_DB;
        }
        level.clamp(MIN_LEVEL_DB, MAX_LEVEL_DB).round()
    }

    /// Uncalibrated level of `buffer`: dBFS plus the reference offset, with
    /// neither clamping nor rounding.
    ///
    /// Returns `None` when the buffer carries no usable signal.
    pub fn raw_level(&self, buffer: &[f32]) -> Option<f32> {
        valid_rms(buffer)
            .and_then(dbfs)
            .map(|full_scale| full_scale + REFERENCE_DB)
    }

    /// Feed a reading into the smoothing window and return the smoothed
    /// value (`0.0` for non-positive input).
    pub fn smooth(&mut self, value: f32) -> f32 {
        self.smoothing.push(value)
    }

    /// Forget the smoothing history (start of a new session).
    pub fn reset_smoothing(&mut self) {
        self.smoothing.clear();
    }

    /// Commit a calibration result.
    ///
    /// Non-finite offsets are rejected so a broken calibration can never
    /// replace a working value.
    pub fn set_calibration_offset(&mut self, offset_db: f32) -> bool {
        if !offset_db.is_finite() {
            log::warn!("level: rejected non-finite calibration offset");
            return false;
        }
        self.calibration.offset_db = offset_db;
        self.calibration.auto_calibrated = true;
        true
    }

    pub fn calibration_offset(&self) -> f32 {
        self.calibration.offset_db
    }

    pub fn is_auto_calibrated(&self) -> bool {
        self.calibration.auto_calibrated
    }

    pub fn calibration(&self) -> CalibrationState {
        self.calibration
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(amplitude: f32) -> Vec<f32> {
        vec![amplitude; 4096]
    }

    fn in_range(db: f32) -> bool {
        db.is_finite() && (MIN_LEVEL_DB..=MAX_LEVEL_DB).contains(&db)
    }

    #[test]
    fn degenerate_buffers_yield_floor() {
        let dsp = SignalProcessor::new();
        let cases: Vec<Vec<f32>> = vec![
            vec![],
            vec![0.0; 4096],
            vec![f32::NAN; 128],
            vec![f32::INFINITY, f32::NEG_INFINITY],
            vec![3.0, -7.5, 1.5],
        ];
        for buffer in cases {
            assert_eq!(dsp.calculate_level(&buffer), SILENCE_FLOOR_DB);
        }
    }

    #[test]
    fn garbage_samples_are_filtered_not_fatal() {
        let dsp = SignalProcessor::new();
        let mut buffer = constant(0.1);
        buffer.extend([f32::NAN, 42.0, f32::NEG_INFINITY]);
        assert_eq!(dsp.calculate_level(&buffer), dsp.calculate_level(&constant(0.1)));
    }

    #[test]
    fn level_follows_reference_pipeline() {
        // rms 0.01 → -40 dBFS → -40 + 94 + 15 = 69
        let dsp = SignalProcessor::new();
        assert_eq!(dsp.calculate_level(&constant(0.01)), 69.0);
    }

    #[test]
    fn output_is_clamped() {
        let mut dsp = SignalProcessor::new();
        assert_eq!(dsp.calculate_level(&constant(1.0)), 109.0);

        dsp.set_calibration_offset(60.0);
        assert_eq!(dsp.calculate_level(&constant(1.0)), MAX_LEVEL_DB);

        dsp.set_calibration_offset(-80.0);
        assert_eq!(dsp.calculate_level(&constant(0.001)), MIN_LEVEL_DB);
    }

    #[test]
    fn sweep_stays_in_range() {
        let dsp = SignalProcessor::new();
        let mut amplitude = 1e-7_f32;
        while amplitude <= 1.0 {
            assert!(in_range(dsp.calculate_level(&constant(amplitude))));
            amplitude *= 1.7;
        }
    }

    #[test]
    fn louder_never_reads_lower() {
        let dsp = SignalProcessor::new();
        let amplitudes = [1e-4_f32, 3e-4, 1e-3, 0.004, 0.02, 0.08, 0.3, 0.9];
        let levels: Vec<f32> = amplitudes
            .iter()
            .map(|&a| dsp.calculate_level(&constant(a)))
            .collect();
        assert!(levels.windows(2).all(|w| w[0] <= w[1]), "{levels:?}");
    }

    #[test]
    fn raw_level_ignores_calibration() {
        let mut dsp = SignalProcessor::new();
        let before = dsp.raw_level(&constant(0.01)).unwrap();
        dsp.set_calibration_offset(-12.0);
        let after = dsp.raw_level(&constant(0.01)).unwrap();
        assert!((before - 54.0).abs() < 1e-3);
        assert_eq!(before, after);
    }

    #[test]
    fn raw_level_of_silence_is_none() {
        let dsp = SignalProcessor::new();
        assert!(dsp.raw_level(&[]).is_none());
        assert!(dsp.raw_level(&constant(0.0)).is_none());
    }

    #[test]
    fn set_offset_marks_calibrated() {
        let mut dsp = SignalProcessor::new();
        assert_eq!(dsp.calibration_offset(), DEFAULT_CALIBRATION_OFFSET_DB);
        assert!(!dsp.is_auto_calibrated());

        assert!(dsp.set_calibration_offset(-3.5));
        assert_eq!(dsp.calibration_offset(), -3.5);
        assert!(dsp.is_auto_calibrated());
    }

    #[test]
    fn non_finite_offset_is_rejected() {
        let mut dsp = SignalProcessor::with_offset(7.0);
        assert!(!dsp.set_calibration_offset(f32::NAN));
        assert_eq!(dsp.calibration_offset(), 7.0);
        assert!(!dsp.is_auto_calibrated());
    }

    #[test]
    fn smoothing_resets_per_session() {
        let mut dsp = SignalProcessor::new();
        dsp.smooth(80.0);
        dsp.reset_smoothing();
        assert_eq!(dsp.smooth(50.0), 50.0);
    }
}
