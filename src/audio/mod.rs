//! Audio side of the noise meter: microphone acquisition and level maths.
//!
//! # Pipeline
//!
//! ```text
//! Microphone → cpal callback → downmix_to_mono → SampleTap (ring)
//!           → Analyser::read_time_domain (4096 samples / frame)
//!           → SignalProcessor::calculate_level → SignalProcessor::smooth
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use noise_meter::audio::{new_shared_devices, CaptureConstraints, CpalBackend, SignalProcessor};
//!
//! # async fn example() {
//! let devices = new_shared_devices(Arc::new(CpalBackend::new()));
//! let context = devices
//!     .lock()
//!     .await
//!     .initialize(&CaptureConstraints::unprocessed())
//!     .await
//!     .unwrap();
//!
//! let analyser = context.create_analyser(4096).unwrap();
//! let mut samples = Vec::new();
//! analyser.read_time_domain(&mut samples).unwrap();
//! println!("{} dB", SignalProcessor::new().calculate_level(&samples));
//!
//! devices.lock().await.release();
//! # }
//! ```

pub mod analyser;
pub mod buffer;
pub mod capture;
pub mod device;
pub mod level;
pub mod smoothing;

#[cfg(test)]
pub mod mock;

pub use analyser::{Analyser, ReadError, DEFAULT_FFT_SIZE};
pub use buffer::{new_tap, SampleRing, SampleTap};
pub use capture::{downmix_to_mono, CpalBackend};
pub use device::{
    new_shared_devices, AudioBackend, CaptureConstraints, DeviceError, DeviceManager,
    InputStream, ProcessingContext, SharedDevices,
};
pub use level::{
    CalibrationState, SignalProcessor, DEFAULT_CALIBRATION_OFFSET_DB, MAX_LEVEL_DB, MIN_LEVEL_DB,
    REFERENCE_DB, SILENCE_FLOOR_DB,
};
pub use smoothing::{MeasurementBuffer, SMOOTHING_WINDOW};
