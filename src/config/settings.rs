//! Application settings structs, defaults and TOML persistence.
//!
//! Every section implements `Serialize`, `Deserialize` and `Default`, and is
//! `#[serde(default)]` so a hand-edited `settings.toml` may omit any key.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::audio::{CaptureConstraints, DEFAULT_CALIBRATION_OFFSET_DB, DEFAULT_FFT_SIZE};
use crate::meter::{CalibrationOptions, DEFAULT_FRAME_RATE, DEFAULT_TARGET_DB};

// ---------------------------------------------------------------------------
// MeterConfig
// ---------------------------------------------------------------------------

/// Settings for the measurement loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// Samples per analysis window.
    pub fft_size: usize,
    /// Readings per second when running headless.
    pub frame_rate: u32,
    /// A session fails when no audio arrives within this many milliseconds.
    pub first_sample_timeout_ms: u64,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            frame_rate: DEFAULT_FRAME_RATE,
            first_sample_timeout_ms: 5_000,
        }
    }
}

// ---------------------------------------------------------------------------
// CaptureConfig
// ---------------------------------------------------------------------------

/// Microphone selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Input device name; `None` means the system default.
    pub device: Option<String>,
    /// Samples kept in the capture ring (must hold at least one window).
    pub ring_capacity: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            ring_capacity: CaptureConstraints::unprocessed().ring_capacity,
        }
    }
}

impl CaptureConfig {
    /// Raw-capture constraints for the configured device.
    pub fn constraints(&self) -> CaptureConstraints {
        let mut constraints = CaptureConstraints::unprocessed().with_device(self.device.clone());
        constraints.ring_capacity = self.ring_capacity.max(1);
        constraints
    }
}

// ---------------------------------------------------------------------------
// CalibrationConfig
// ---------------------------------------------------------------------------

/// Calibration procedure parameters and the last committed offset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Level the room's ambient noise is mapped to.
    pub target_db: f32,
    pub samples: usize,
    pub interval_ms: u64,
    pub settle_ms: u64,
    /// Offset saved by `noise-meter calibrate --save`.  `None` keeps the
    /// built-in default.
    pub offset_db: Option<f32>,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            target_db: DEFAULT_TARGET_DB,
            samples: 5,
            interval_ms: 250,
            settle_ms: 500,
            offset_db: None,
        }
    }
}

impl CalibrationConfig {
    /// Offset to start with: the saved one, or the default.
    pub fn effective_offset(&self) -> f32 {
        self.offset_db
            .filter(|o| o.is_finite())
            .unwrap_or(DEFAULT_CALIBRATION_OFFSET_DB)
    }
}

// ---------------------------------------------------------------------------
// StoreConfig
// ---------------------------------------------------------------------------

/// Remote measurement store (a PostgREST-style endpoint).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`.  Empty disables saving.
    pub base_url: String,
    /// Key sent as both `apikey` and bearer token.
    pub api_key: Option<String>,
    /// Table receiving the records.
    pub table: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            table: "noise_measurements".into(),
            timeout_secs: 10,
        }
    }
}

impl StoreConfig {
    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use noise_meter::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub meter: MeterConfig,
    pub capture: CaptureConfig,
    pub calibration: CalibrationConfig,
    pub store: StoreConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet,
    /// so callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("config: {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path.
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        log::info!("config: saved {}", path.display());
        Ok(())
    }

    /// Calibration options built from the calibration, meter and capture
    /// sections.
    pub fn calibration_options(&self) -> CalibrationOptions {
        CalibrationOptions {
            target_db: self.calibration.target_db,
            samples: self.calibration.samples,
            interval: Duration::from_millis(self.calibration.interval_ms),
            settle: Duration::from_millis(self.calibration.settle_ms),
            fft_size: self.meter.fft_size,
            constraints: self.capture.constraints(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
