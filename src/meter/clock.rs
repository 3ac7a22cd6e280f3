//! Frame scheduling for the measurement loop.
//!
//! The loop does one read-compute-emit cycle per frame and yields to the
//! runtime in between.  What a "frame" is belongs to the host:
//!
//! * [`IntervalClock`]: a fixed-rate tokio interval (headless use, CLI).
//! * [`DisplayClock`]: frames are triggered by the host's render loop
//!   through a [`FrameTrigger`], one per repaint.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::{Interval, MissedTickBehavior};

/// Default frame rate of [`IntervalClock`].
pub const DEFAULT_FRAME_RATE: u32 = 60;

/// Source of frame boundaries.
#[async_trait]
pub trait FrameClock: Send {
    /// Resolve at the start of the next frame.
    async fn next_frame(&mut self);
}

// ---------------------------------------------------------------------------
// IntervalClock
// ---------------------------------------------------------------------------

/// Fixed-rate frames.  Late frames are skipped rather than bunched up.
pub struct IntervalClock {
    interval: Interval,
}

impl IntervalClock {
    /// Must be called from within a tokio runtime.
    pub fn new(frames_per_sec: u32) -> Self {
        let period = Duration::from_secs_f64(1.0 / f64::from(frames_per_sec.max(1)));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self { interval }
    }
}

#[async_trait]
impl FrameClock for IntervalClock {
    async fn next_frame(&mut self) {
        self.interval.tick().await;
    }
}

// ---------------------------------------------------------------------------
// DisplayClock
// ---------------------------------------------------------------------------

/// Frames driven by an external render loop.
pub struct DisplayClock {
    frames: mpsc::UnboundedReceiver<()>,
}

/// Host-side handle of a [`DisplayClock`]; call [`FrameTrigger::frame`] once
/// per repaint.
#[derive(Clone)]
pub struct FrameTrigger {
    tx: mpsc::UnboundedSender<()>,
}

impl DisplayClock {
    pub fn new() -> (Self, FrameTrigger) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { frames: rx }, FrameTrigger { tx })
    }
}

impl FrameTrigger {
    /// Signal a frame.  Returns `false` once the loop has gone away.
    pub fn frame(&self) -> bool {
        self.tx.send(()).is_ok()
    }
}

#[async_trait]
impl FrameClock for DisplayClock {
    async fn next_frame(&mut self) {
        if self.frames.recv().await.is_none() {
            // Host is gone: no more frames, ever.  The loop is torn down by
            // stop() or drop instead of spinning here.
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
