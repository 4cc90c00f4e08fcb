//! Capture pipeline: microphone -> fixed-size blocks -> frame sink.

use log::{debug, info};

use super::{
    AudioDevices, AudioFrame, CaptureConstraints, DeviceNotifier, InputDevice,
};
use crate::error::Result;

pub type FrameSink = Box<dyn FnMut(AudioFrame) + Send>;

/// Cuts an arbitrary-sized sample stream into equal blocks, numbered in order.
///
/// Device callbacks rarely line up with the block size; the remainder is held
/// until the next push so no sample is skipped or repeated.
#[derive(Debug)]
pub struct FrameAssembler {
    block_samples: usize,
    sample_rate: u32,
    pending: Vec<f32>,
    next_sequence: u64,
}

impl FrameAssembler {
    pub fn new(block_samples: usize, sample_rate: u32) -> Self {
        let block_samples = block_samples.max(1);
        Self {
            block_samples,
            sample_rate,
            pending: Vec::with_capacity(block_samples * 2),
            next_sequence: 0,
        }
    }

    pub fn push(&mut self, samples: &[f32], emit: &mut dyn FnMut(AudioFrame)) {
        self.pending.extend_from_slice(samples);
        while self.pending.len() >= self.block_samples {
            let block: Vec<f32> = self.pending.drain(..self.block_samples).collect();
            let frame = AudioFrame::new(self.sample_rate, 1, self.next_sequence, block);
            self.next_sequence += 1;
            emit(frame);
        }
    }

    /// Samples held back waiting for a full block.
    pub fn buffered(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CaptureState {
    Acquired,
    Running,
    Stopped,
}

/// Owns the input device handle for one session.
pub struct CapturePipeline {
    device: Option<Box<dyn InputDevice>>,
    constraints: CaptureConstraints,
    state: CaptureState,
}

impl CapturePipeline {
    /// Acquire the input device. Fails with `DeviceUnavailable` when the
    /// platform refuses or no device exists.
    pub fn acquire(
        devices: &mut dyn AudioDevices,
        constraints: CaptureConstraints,
        notifier: DeviceNotifier,
    ) -> Result<Self> {
        let device = devices.open_input(&constraints, notifier)?;
        info!(
            "[Capture] Input acquired ({} Hz, {} samples/block)",
            constraints.sample_rate, constraints.block_samples
        );
        Ok(Self {
            device: Some(device),
            constraints,
            state: CaptureState::Acquired,
        })
    }

    /// Begin delivering blocks to `sink`. Starting twice is a no-op.
    pub fn start(&mut self, mut sink: FrameSink) -> Result<()> {
        if self.state != CaptureState::Acquired {
            return Ok(());
        }
        let Some(device) = self.device.as_mut() else {
            return Ok(());
        };

        let mut assembler =
            FrameAssembler::new(self.constraints.block_samples, self.constraints.sample_rate);
        device.start(Box::new(move |samples: &[f32]| {
            assembler.push(samples, &mut |frame| sink(frame));
        }))?;

        self.state = CaptureState::Running;
        debug!("[Capture] Streaming");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.state == CaptureState::Running
    }

    /// Release the device. Idempotent; never fails.
    pub fn stop(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.stop();
            info!("[Capture] Input released");
        }
        self.state = CaptureState::Stopped;
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}
