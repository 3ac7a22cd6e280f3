//! Ambient noise meter: microphone capture, calibrated dB readings,
//! measurement sessions, reports and remote persistence.

pub mod audio;
pub mod config;
pub mod meter;
pub mod report;
pub mod store;
