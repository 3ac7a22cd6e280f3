//! Measurement sessions: the controller, its state machine, frame pacing and
//! the calibration procedure.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use noise_meter::audio::{new_shared_devices, CpalBackend};
//! use noise_meter::meter::{MeasurementController, MeterOptions};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let devices = new_shared_devices(Arc::new(CpalBackend::new()));
//! let mut meter = MeasurementController::new(devices, MeterOptions::default());
//!
//! meter.start(|db: f32| println!("{db:.0} dB")).await?;
//! tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//! meter.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod calibration;
pub mod clock;
pub mod controller;
pub mod state;

pub use calibration::{
    CalibrationError, CalibrationOptions, CalibrationOutcome, Calibrator, DEFAULT_TARGET_DB,
};
pub use clock::{DisplayClock, FrameClock, FrameTrigger, IntervalClock, DEFAULT_FRAME_RATE};
pub use controller::{LevelSink, MeasurementController, MeterError, MeterOptions};
pub use state::{
    new_shared_processor, new_shared_session, AudioSession, SessionState, SharedProcessor,
    SharedSession,
};
