//! End-to-end session tests through the public API.
//!
//! A scripted backend stands in for the microphone so the full path
//! (device manager → analyser → processor → controller → store) runs
//! without audio hardware.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use noise_meter::audio::{
    new_shared_devices, new_tap, AudioBackend, CaptureConstraints, DeviceError, InputStream,
    SampleTap, SignalProcessor, REFERENCE_DB,
};
use noise_meter::config::AppConfig;
use noise_meter::meter::{
    new_shared_processor, DisplayClock, MeasurementController, MeterError, MeterOptions,
    SessionState,
};
use noise_meter::report::{LegalStatus, NoiseCategory, NoiseContext};
use noise_meter::store::{RestStore, StoreError};
use tokio::sync::mpsc;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Scripted backend
// =============================================================================

#[derive(Clone, Default)]
struct ScriptedMic {
    current: Arc<Mutex<Option<(SampleTap, Arc<AtomicBool>)>>>,
    open_streams: Arc<AtomicUsize>,
}

impl ScriptedMic {
    fn play(&self, db: f32, len: usize) {
        let amplitude = 10f32.powf((db - REFERENCE_DB) / 20.0);
        if let Some((tap, _)) = self.current.lock().unwrap().as_ref() {
            tap.lock().unwrap().push_slice(&vec![amplitude; len]);
        }
    }

    fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }
}

struct ScriptedStream {
    tap: SampleTap,
    live: Arc<AtomicBool>,
    open_streams: Arc<AtomicUsize>,
    stopped: bool,
}

impl AudioBackend for ScriptedMic {
    fn open(&self, constraints: &CaptureConstraints) -> Result<Box<dyn InputStream>, DeviceError> {
        let tap = new_tap(constraints.ring_capacity);
        let live = Arc::new(AtomicBool::new(true));
        *self.current.lock().unwrap() = Some((tap.clone(), live.clone()));
        self.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            tap,
            live,
            open_streams: self.open_streams.clone(),
            stopped: false,
        }))
    }
}

impl InputStream for ScriptedStream {
    fn sample_rate(&self) -> u32 {
        44_100
    }

    fn tap(&self) -> SampleTap {
        self.tap.clone()
    }

    fn live_flag(&self) -> Arc<AtomicBool> {
        self.live.clone()
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live.store(false, Ordering::SeqCst);
            self.open_streams.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn meter(mic: &ScriptedMic) -> MeasurementController {
    let devices = new_shared_devices(Arc::new(mic.clone()));
    let processor = new_shared_processor(SignalProcessor::with_offset(0.0));
    MeasurementController::with_processor(devices, processor, MeterOptions::default())
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn measure_report_and_save() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/noise_measurements"))
        .and(body_json(
            serde_json::json!({ "noise_level": 64, "duration": 0, "type": "street" }),
        ))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let mic = ScriptedMic::default();
    let mut meter = meter(&mic);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (clock, trigger) = DisplayClock::new();
    meter
        .start_with_clock(
            move |db: f32| {
                let _ = tx.send(db);
            },
            clock,
        )
        .await
        .unwrap();

    let mut readings = Vec::new();
    for db in [50.0, 52.0, 90.0] {
        mic.play(db, 4096);
        trigger.frame();
        readings.push(rx.recv().await.unwrap());
    }
    assert_eq!(readings[..2], [50.0, 51.0]);
    assert_eq!(readings[2].round(), 64.0);

    meter.stop().await;
    assert!(rx.recv().await.is_none());
    assert_eq!(mic.open_streams(), 0);

    // Industrial limits (75 / 70 dB) hold by day and by night.
    let report = meter.report(NoiseContext::Industrial).unwrap();
    assert_eq!(report.category, NoiseCategory::Noisy);
    assert_eq!(report.legal_status, LegalStatus::Compliant);

    let mut config = AppConfig::default();
    config.store.base_url = server.uri();
    let store = RestStore::from_config(&config.store).unwrap();
    let record = meter.save(&store, "street").await.unwrap();
    assert_eq!(record.noise_level, 64);
}

#[tokio::test]
async fn store_failure_leaves_session_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let mic = ScriptedMic::default();
    let mut meter = meter(&mic);
    let (clock, trigger) = DisplayClock::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    meter
        .start_with_clock(
            move |db: f32| {
                let _ = tx.send(db);
            },
            clock,
        )
        .await
        .unwrap();
    mic.play(60.0, 4096);
    trigger.frame();
    rx.recv().await.unwrap();
    meter.stop().await;

    let mut config = AppConfig::default();
    config.store.base_url = server.uri();
    let store = RestStore::from_config(&config.store).unwrap();

    let before = meter.session();
    let err = meter.save(&store, "office").await.unwrap_err();
    assert!(matches!(
        err,
        MeterError::Store(StoreError::Rejected { status: 500, .. })
    ));
    let after = meter.session();
    assert_eq!(before.last_level, after.last_level);
    assert_eq!(after.state, SessionState::Idle);
}

#[tokio::test]
async fn save_without_reading_is_refused() {
    let mic = ScriptedMic::default();
    let meter = meter(&mic);
    let mut config = AppConfig::default();
    config.store.base_url = "http://127.0.0.1:9".into();
    let store = RestStore::from_config(&config.store).unwrap();

    assert!(matches!(
        meter.save(&store, "street").await,
        Err(MeterError::NoReading)
    ));
}

#[tokio::test(start_paused = true)]
async fn calibrate_then_measure_at_target() {
    let mic = ScriptedMic::default();
    let mut meter = meter(&mic);

    // Calibration opens its own stream; feed it ambient noise once it exists.
    let feeder = {
        let mic = mic.clone();
        tokio::spawn(async move {
            loop {
                mic.play(57.0, 1024);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };
    let outcome = meter.calibrate().await.unwrap();
    feeder.abort();
    assert!((outcome.offset_db - (42.0 - 57.0)).abs() < 0.05);
    assert_eq!(mic.open_streams(), 0);

    let (clock, trigger) = DisplayClock::new();
    let (tx, mut rx) = mpsc::unbounded_channel();
    meter
        .start_with_clock(
            move |db: f32| {
                let _ = tx.send(db);
            },
            clock,
        )
        .await
        .unwrap();
    mic.play(57.0, 4096);
    trigger.frame();
    assert_eq!(rx.recv().await.unwrap(), 42.0);

    meter.stop().await;
    assert_eq!(mic.open_streams(), 0);
}

#[tokio::test]
async fn repeated_sessions_do_not_leak() {
    let mic = ScriptedMic::default();
    let mut meter = meter(&mic);

    for _ in 0..10 {
        let (clock, _trigger) = DisplayClock::new();
        meter.start_with_clock(|_db: f32| {}, clock).await.unwrap();
        assert_eq!(mic.open_streams(), 1);
        meter.stop().await;
        assert_eq!(mic.open_streams(), 0);
    }
}
