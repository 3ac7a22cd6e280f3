//! Configuration for the noise meter.
//!
//! `AppConfig` (top-level settings) with one section per subsystem,
//! `AppPaths` for cross-platform directories, and TOML persistence via
//! `AppConfig::load` / `AppConfig::save`.

pub mod paths;
pub mod settings;

pub use paths::AppPaths;
pub use settings::{AppConfig, CalibrationConfig, CaptureConfig, MeterConfig, StoreConfig};
