//! Audio side of the voice link: codec, capture, scheduled playback and the
//! device seams they run on.
//!
//! Device access sits behind [`AudioDevices`] so the session can be driven by
//! the cpal backend in production and by in-memory fakes in tests.

pub mod capture;
pub mod codec;
pub mod cpal_backend;
pub mod level_check;
pub mod playback;
pub mod resample;

use std::sync::Arc;

use crate::error::Result;

pub use capture::{CapturePipeline, FrameAssembler};
pub use codec::{decode_from_wire, encode_for_wire, DecodedAudio};
pub use playback::{PlaybackBuffer, PlaybackScheduler};

/// Capture rate fixed by the wire contract.
pub const INPUT_SAMPLE_RATE: u32 = 16000;
/// Rate of synthesized speech coming back from the agent.
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;
/// Both directions are mono on the wire.
pub const WIRE_CHANNELS: usize = 1;
/// MIME type announced for outbound microphone chunks.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Immutable block of linear samples.
#[derive(Clone, Debug)]
pub struct AudioFrame {
    pub sample_rate: u32,
    pub channels: usize,
    /// Position of this block in its stream, starting at zero.
    pub sequence: u64,
    samples: Arc<[f32]>,
}

impl AudioFrame {
    pub fn new(
        sample_rate: u32,
        channels: usize,
        sequence: u64,
        samples: impl Into<Arc<[f32]>>,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            sequence,
            samples: samples.into(),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0.0;
        }
        (self.samples.len() / self.channels) as f64 / self.sample_rate as f64
    }

    /// Wire payload for this frame (base64 PCM16).
    pub fn encode(&self) -> String {
        encode_for_wire(&self.samples)
    }
}

/// Requested input processing. Noise suppression, echo cancellation and gain
/// control are requested from the platform where it offers them.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureConstraints {
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub auto_gain_control: bool,
    pub sample_rate: u32,
    /// Samples per delivered block.
    pub block_samples: usize,
    /// Optional substring of the preferred input device name.
    pub device_name: Option<String>,
}

impl CaptureConstraints {
    pub fn voice(block_ms: u32) -> Self {
        Self {
            noise_suppression: true,
            echo_cancellation: true,
            auto_gain_control: true,
            sample_rate: INPUT_SAMPLE_RATE,
            block_samples: (INPUT_SAMPLE_RATE as usize * block_ms.max(1) as usize) / 1000,
            device_name: None,
        }
    }
}

impl Default for CaptureConstraints {
    fn default() -> Self {
        Self::voice(32)
    }
}

/// Identifier of a buffer handed to the output device.
pub type VoiceId = u64;

/// Notices raised from device threads.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceNotice {
    /// A scheduled buffer played to its end.
    VoiceFinished(VoiceId),
    /// The backend reported a stream error.
    Fault(String),
}

pub type DeviceNotifier = Arc<dyn Fn(DeviceNotice) + Send + Sync>;

/// Receives mono samples at the constrained rate, in capture order.
pub type SampleSink = Box<dyn FnMut(&[f32]) + Send>;

/// Opened microphone. Dropping or `stop()` releases it.
pub trait InputDevice {
    fn start(&mut self, sink: SampleSink) -> Result<()>;

    /// Release the device. Safe to call repeatedly.
    fn stop(&mut self);
}

/// Opened speaker with its own playback clock.
pub trait OutputDevice {
    /// Current playback clock time in seconds.
    fn now(&self) -> f64;

    /// Start `samples` (mono, `sample_rate`) at clock time `start_at`.
    fn play(&mut self, voice: VoiceId, samples: Arc<[f32]>, sample_rate: u32, start_at: f64);

    /// Silence one voice immediately. Unknown or finished voices are ignored.
    fn stop_voice(&mut self, voice: VoiceId);

    /// Release the device. Safe to call repeatedly.
    fn close(&mut self);
}

/// Source of device handles.
pub trait AudioDevices {
    fn open_input(
        &mut self,
        constraints: &CaptureConstraints,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn InputDevice>>;

    fn open_output(&mut self, notifier: DeviceNotifier) -> Result<Box<dyn OutputDevice>>;
}
