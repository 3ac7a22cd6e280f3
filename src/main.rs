//! Command-line entry point for the noise meter.
//!
//! # Commands
//!
//! * `check`: report whether a microphone can be opened and list inputs.
//! * `calibrate [--save]`: map the room's ambient level to the calibration
//!   target; `--save` stores the offset in `settings.toml`.
//! * `measure`: live readings until `--seconds` elapse or Ctrl-C, then a
//!   report; optionally saved remotely (`--save-as`) or to disk
//!   (`--save-report`).
//!
//! # Startup sequence
//!
//! 1. Initialise logging (`RUST_LOG` overrides the `info` default).
//! 2. Load [`AppConfig`] (defaults on first run).
//! 3. Build the tokio runtime and the shared device manager.
//! 4. Dispatch the subcommand.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::time::Instant;

use noise_meter::{
    audio::{new_shared_devices, CpalBackend, SharedDevices, SignalProcessor},
    config::{AppConfig, AppPaths},
    meter::{new_shared_processor, MeasurementController, MeterOptions, SessionState},
    report::{NoiseContext, NoiseReport},
    store::RestStore,
};

// ---------------------------------------------------------------------------
// CLI schema
// ---------------------------------------------------------------------------

#[derive(Debug, Parser)]
#[command(name = "noise-meter", version, about = "Ambient noise level meter")]
struct Cli {
    /// Settings file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check microphone availability and list input devices.
    Check,

    /// Calibrate against the room's ambient noise.
    Calibrate {
        /// Store the new offset in the settings file.
        #[arg(long)]
        save: bool,
    },

    /// Measure the noise level.
    Measure {
        /// Stop after this many seconds (default: run until Ctrl-C).
        #[arg(long)]
        seconds: Option<u64>,

        /// Place the measurement was taken in (selects the legal limits).
        #[arg(long, default_value = "residential")]
        context: NoiseContext,

        /// Save the result to the configured store under this type label.
        #[arg(long, value_name = "TYPE")]
        save_as: Option<String>,

        /// Write the report as JSON to the reports directory.
        #[arg(long)]
        save_report: bool,
    },
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // 2. Configuration
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| AppPaths::new().settings_file);
    let config = AppConfig::load_from(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    // 3. Runtime + devices
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(async move {
        let devices = new_shared_devices(Arc::new(CpalBackend::new()));

        // 4. Dispatch
        match cli.command {
            Command::Check => check(&devices).await,
            Command::Calibrate { save } => calibrate(devices, config, &config_path, save).await,
            Command::Measure {
                seconds,
                context,
                save_as,
                save_report,
            } => measure(devices, &config, seconds, context, save_as, save_report).await,
        }
    })
}

fn controller(devices: SharedDevices, config: &AppConfig) -> MeasurementController {
    let processor =
        new_shared_processor(SignalProcessor::with_offset(config.calibration.effective_offset()));
    MeasurementController::with_processor(devices, processor, MeterOptions::from_config(config))
        .with_calibration(config.calibration_options())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

async fn check(devices: &SharedDevices) -> Result<()> {
    let names = CpalBackend::input_device_names();
    if names.is_empty() {
        println!("No input devices found.");
    } else {
        println!("Input devices:");
        for name in names {
            println!("  {name}");
        }
    }

    let mut devices = devices.lock().await;
    if devices.check_availability().await {
        println!("Microphone: available");
        Ok(())
    } else {
        let reason = devices.error().unwrap_or("unknown error").to_string();
        bail!("microphone unavailable: {reason}")
    }
}

async fn calibrate(
    devices: SharedDevices,
    mut config: AppConfig,
    config_path: &std::path::Path,
    save: bool,
) -> Result<()> {
    let mut meter = controller(devices, &config);
    println!(
        "Calibrating: keep the room at its usual ambient level for a few seconds…"
    );

    let outcome = meter.calibrate().await.context("calibration failed")?;
    println!(
        "Ambient {:.1} dB raw → offset {:+.1} dB (target {:.0} dB)",
        outcome.average_raw_db, outcome.offset_db, config.calibration.target_db
    );

    if save {
        config.calibration.offset_db = Some(outcome.offset_db);
        config.save_to(config_path)?;
        println!("Saved to {}", config_path.display());
    }
    Ok(())
}

async fn measure(
    devices: SharedDevices,
    config: &AppConfig,
    seconds: Option<u64>,
    context: NoiseContext,
    save_as: Option<String>,
    save_report: bool,
) -> Result<()> {
    // Fail before measuring rather than after.
    let store = match &save_as {
        Some(_) => Some(RestStore::from_config(&config.store)?),
        None => None,
    };

    let mut meter = controller(devices, config);

    // Redraw about four times a second.
    let redraw_every = u64::from(config.meter.frame_rate / 4).max(1);
    let mut frame = 0u64;
    meter
        .start(move |db: f32| {
            if frame % redraw_every == 0 {
                print!("\r{db:6.1} dB");
                let _ = std::io::stdout().flush();
            }
            frame += 1;
        })
        .await
        .context("could not start measuring")?;

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut poll = tokio::time::interval(Duration::from_millis(200));

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = poll.tick() => {
                if meter.state() == SessionState::Error {
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    break;
                }
            }
        }
    }
    println!();

    let session = meter.session();
    meter.stop().await;
    if session.state == SessionState::Error {
        bail!(
            "measurement failed: {}",
            session.error_message.unwrap_or_default()
        );
    }

    let report = meter
        .report(context)
        .context("no reading was taken")?;
    print_report(&report);

    if save_report {
        let path = write_report(&report)?;
        println!("Report written to {}", path.display());
    }

    if let (Some(store), Some(kind)) = (store, save_as) {
        let record = meter.save(&store, &kind).await?;
        println!(
            "Saved {} dB over {} s as '{}'",
            record.noise_level, record.duration, record.kind
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_report(report: &NoiseReport) {
    println!("Level:     {:.0} dB ({})", report.decibels, report.category);
    println!(
        "Limit:     {:.0} dB ({} {:?})",
        report.limit_db, report.context, report.period
    );
    println!("Legal:     {:?}", report.legal_status);
    println!(
        "Exposure:  {:?} ({:.0}% of daily dose)",
        report.exposure.risk,
        report.exposure.dose * 100.0
    );
    for rec in &report.recommendations {
        println!("  - {rec}");
    }
    println!("{}", report.conclusion);
}

fn write_report(report: &NoiseReport) -> Result<PathBuf> {
    let dir = AppPaths::new().reports_dir;
    std::fs::create_dir_all(&dir)?;
    let path = dir.join(format!(
        "report-{}.json",
        report.generated_at.format("%Y%m%d-%H%M%S")
    ));
    std::fs::write(&path, serde_json::to_string_pretty(report)?)?;
    Ok(path)
}
