//! Microphone capture via `cpal`.
//!
//! [`CpalBackend`] implements [`AudioBackend`] on top of the cpal
//! host/device/stream lifecycle.  `cpal::Stream` is not `Send` on every
//! platform, so each opened stream lives on its own `noise-capture` thread:
//!
//! ```text
//! open()
//!   └─ spawn "noise-capture" thread
//!         ├─ pick device, build + play input stream
//!         ├─ report sample rate (or error) back to open()
//!         └─ park on the stop channel; dropping the sender ends the thread
//!
//! cpal callback (audio thread)
//!   └─ downmix to mono → push into the SampleTap ring
//! ```
//!
//! A stream error reporting the device as gone clears the live flag, which the
//! analyser turns into [`ReadError::StreamEnded`](crate::audio::ReadError).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::audio::buffer::{new_tap, SampleTap};
use crate::audio::device::{AudioBackend, CaptureConstraints, DeviceError, InputStream};

// ---------------------------------------------------------------------------
// Sample conversion
// ---------------------------------------------------------------------------

/// Average interleaved frames down to one channel.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

fn i16_to_f32(s: i16) -> f32 {
    f32::from(s) / 32_768.0
}

fn u16_to_f32(s: u16) -> f32 {
    (f32::from(s) - 32_768.0) / 32_768.0
}

/// Map a cpal build error to a [`DeviceError`].
///
/// Platforms report a refused microphone permission as a backend-specific
/// error, so the message text is the only way to recognise it.
fn build_error(err: cpal::BuildStreamError) -> DeviceError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DeviceError::NoDevice,
        cpal::BuildStreamError::StreamConfigNotSupported => {
            DeviceError::Unsupported("stream configuration not supported by device".into())
        }
        other => {
            let message = other.to_string();
            let lower = message.to_lowercase();
            if lower.contains("permission") || lower.contains("denied") {
                DeviceError::PermissionDenied(message)
            } else {
                DeviceError::Stream(message)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// CpalBackend
// ---------------------------------------------------------------------------

/// Production [`AudioBackend`] using the default cpal host.
#[derive(Debug, Clone, Default)]
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }

    /// Names of the input devices on the default host.
    pub fn input_device_names() -> Vec<String> {
        let host = cpal::default_host();
        match host.input_devices() {
            Ok(devices) => devices.filter_map(|d| d.name().ok()).collect(),
            Err(e) => {
                log::warn!("capture: cannot enumerate input devices: {e}");
                Vec::new()
            }
        }
    }
}

impl AudioBackend for CpalBackend {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputStream>, DeviceError> {
        if constraints.wants_processing() {
            return Err(DeviceError::Unsupported(
                "cpal delivers raw input only; echo cancellation, noise suppression and \
                 auto-gain are not available"
                    .into(),
            ));
        }

        let tap = new_tap(constraints.ring_capacity);
        let live = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, DeviceError>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let device_name = constraints.device_name.clone();
        let thread_tap = tap.clone();
        let thread_live = Arc::clone(&live);

        std::thread::Builder::new()
            .name("noise-capture".into())
            .spawn(move || {
                match build_stream(device_name.as_deref(), thread_tap, Arc::clone(&thread_live)) {
                    Ok((stream, sample_rate)) => {
                        let _ = ready_tx.send(Ok(sample_rate));
                        // Blocks until the owning CpalStream stops or drops.
                        let _ = stop_rx.recv();
                        drop(stream);
                        thread_live.store(false, Ordering::Release);
                        log::debug!("capture: stream closed");
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .map_err(|e| DeviceError::Internal(format!("cannot spawn capture thread: {e}")))?;

        let sample_rate = ready_rx
            .recv()
            .map_err(|_| DeviceError::Internal("capture thread exited during setup".into()))??;

        Ok(Box::new(CpalStream {
            sample_rate,
            tap,
            live,
            stop_tx: Some(stop_tx),
        }))
    }
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<cpal::Device, DeviceError> {
    match name {
        None => host.default_input_device().ok_or(DeviceError::NoDevice),
        Some(wanted) => host
            .input_devices()
            .map_err(|e| DeviceError::Stream(e.to_string()))?
            .find(|d| d.name().map(|n| n == wanted).unwrap_or(false))
            .ok_or_else(|| DeviceError::DeviceNotFound(wanted.to_string())),
    }
}

/// Build and start an input stream writing mono samples into `tap`.
fn build_stream(
    device_name: Option<&str>,
    tap: SampleTap,
    live: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), DeviceError> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name)?;

    let supported = device
        .default_input_config()
        .map_err(|e| DeviceError::Unsupported(e.to_string()))?;

    let sample_format = supported.sample_format();
    let channels = supported.channels();
    let sample_rate = supported.sample_rate().0;
    let config: cpal::StreamConfig = supported.into();

    let err_live = Arc::clone(&live);
    let on_error = move |err: cpal::StreamError| {
        log::error!("capture: cpal stream error: {err}");
        if matches!(err, cpal::StreamError::DeviceNotAvailable) {
            err_live.store(false, Ordering::Release);
        }
    };

    let push = move |mono: Vec<f32>| {
        // A panic elsewhere leaves the ring consistent; keep capturing.
        tap.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_slice(&mono);
    };

    let stream = match sample_format {
        cpal::SampleFormat::F32 => device.build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                push(downmix_to_mono(data, channels));
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().copied().map(i16_to_f32).collect();
                push(downmix_to_mono(&converted, channels));
            },
            on_error,
            None,
        ),
        cpal::SampleFormat::U16 => device.build_input_stream(
            &config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                let converted: Vec<f32> = data.iter().copied().map(u16_to_f32).collect();
                push(downmix_to_mono(&converted, channels));
            },
            on_error,
            None,
        ),
        other => {
            return Err(DeviceError::Unsupported(format!(
                "sample format {other:?}"
            )))
        }
    }
    .map_err(build_error)?;

    stream
        .play()
        .map_err(|e| DeviceError::Stream(e.to_string()))?;

    log::info!("capture: input stream started ({sample_rate} Hz, {channels} ch, {sample_format:?})");
    Ok((stream, sample_rate))
}

// ---------------------------------------------------------------------------
// CpalStream
// ---------------------------------------------------------------------------

/// Handle to a stream owned by a capture thread.  Dropping it stops capture.
struct CpalStream {
    sample_rate: u32,
    tap: SampleTap,
    live: Arc<AtomicBool>,
    stop_tx: Option<mpsc::Sender<()>>,
}

impl InputStream for CpalStream {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn live_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.live)
    }

    fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
            self.live.store(false, Ordering::Release);
        }
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        self.stop();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downmix_mono_is_identity() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_averages_frames() {
        let out = downmix_to_mono(&[1.0, -1.0, 0.5, 0.5], 2);
        assert_eq!(out.len(), 2);
        assert!(out[0].abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix_to_mono(&[1.0, 2.0], 0).is_empty());
    }

    #[test]
    fn integer_samples_map_to_unit_range() {
        assert_eq!(i16_to_f32(i16::MIN), -1.0);
        assert!(i16_to_f32(i16::MAX) < 1.0);
        assert_eq!(u16_to_f32(32_768), 0.0);
        assert_eq!(u16_to_f32(0), -1.0);
    }

    #[test]
    fn processing_constraints_are_refused() {
        let mut constraints = CaptureConstraints::unprocessed();
        constraints.echo_cancellation = true;
        let err = CpalBackend::new().open(&constraints).err().unwrap();
        assert!(matches!(err, DeviceError::Unsupported(_)));
    }

    #[test]
    fn permission_errors_are_recognised() {
        let err = build_error(cpal::BuildStreamError::BackendSpecific {
            err: cpal::BackendSpecificError {
                description: "Permission denied by user".into(),
            },
        });
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
        assert_eq!(
            build_error(cpal::BuildStreamError::DeviceNotAvailable),
            DeviceError::NoDevice
        );
    }
}
