//! Acoustic check: a short standalone capture that reports input level.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

use log::info;

use super::{AudioDevices, CaptureConstraints, CapturePipeline};
use crate::error::Result;

const SILENCE_RMS: f32 = 0.01;
const CLIPPING_PEAK: f32 = 0.99;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LevelVerdict {
    Silent,
    Ok,
    Clipping,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LevelReport {
    pub rms: f32,
    pub peak: f32,
    pub samples: usize,
    pub verdict: LevelVerdict,
    pub cancelled: bool,
}

impl LevelReport {
    pub fn summary(&self) -> String {
        let verdict = match self.verdict {
            LevelVerdict::Silent => "no signal, check the microphone",
            LevelVerdict::Ok => "level looks good",
            LevelVerdict::Clipping => "too loud, move back from the microphone",
        };
        format!(
            "rms {:.3}, peak {:.3} over {} samples: {}",
            self.rms, self.peak, self.samples, verdict
        )
    }
}

/// Running RMS/peak accumulator.
#[derive(Debug, Default)]
pub struct LevelMeter {
    sum_sq: f64,
    peak: f32,
    count: usize,
}

impl LevelMeter {
    pub fn push(&mut self, samples: &[f32]) {
        for &s in samples {
            self.sum_sq += (s as f64).powi(2);
            self.peak = self.peak.max(s.abs());
        }
        self.count += samples.len();
    }

    pub fn report(&self, cancelled: bool) -> LevelReport {
        let rms = if self.count == 0 {
            0.0
        } else {
            (self.sum_sq / self.count as f64).sqrt() as f32
        };
        let verdict = if self.peak >= CLIPPING_PEAK {
            LevelVerdict::Clipping
        } else if rms < SILENCE_RMS {
            LevelVerdict::Silent
        } else {
            LevelVerdict::Ok
        };
        LevelReport {
            rms,
            peak: self.peak,
            samples: self.count,
            verdict,
            cancelled,
        }
    }
}

/// Capture for `window` (or until `cancel` is raised) and measure the level.
/// The microphone is released before this returns on every path.
pub fn run_level_check(
    devices: &mut dyn AudioDevices,
    constraints: CaptureConstraints,
    window: Duration,
    cancel: &AtomicBool,
) -> Result<LevelReport> {
    let (tx, rx) = mpsc::channel::<Vec<f32>>();
    let mut pipeline = CapturePipeline::acquire(devices, constraints, Arc::new(|_| {}))?;
    pipeline.start(Box::new(move |frame| {
        let _ = tx.send(frame.samples().to_vec());
    }))?;

    let mut meter = LevelMeter::default();
    let deadline = Instant::now() + window;
    let mut cancelled = false;
    loop {
        if cancel.load(Ordering::SeqCst) {
            cancelled = true;
            break;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match rx.recv_timeout(remaining.min(Duration::from_millis(50))) {
            Ok(block) => meter.push(&block),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
    pipeline.stop();

    // Blocks that landed between the last poll and the stop still count.
    while let Ok(block) = rx.try_recv() {
        meter.push(&block);
    }

    let report = meter.report(cancelled);
    info!("[Check] {}", report.summary());
    Ok(report)
}
