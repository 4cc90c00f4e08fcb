//! cpal implementation of the device seam.
//!
//! Capture downmixes to mono and resamples to the wire rate inside the input
//! callback. Playback runs a small mixer on the output callback whose
//! rendered-frame counter is the playback clock.

use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{info, warn};

use super::resample::{downmix, resample_linear, StreamResampler};
use super::{
    AudioDevices, CaptureConstraints, DeviceNotice, DeviceNotifier, InputDevice, OutputDevice,
    SampleSink, VoiceId,
};
use crate::error::{LinkError, Result};

fn unavailable(err: impl std::fmt::Display) -> LinkError {
    LinkError::DeviceUnavailable(err.to_string())
}

fn host() -> cpal::Host {
    // WASAPI explicitly on Windows for better compatibility
    #[cfg(target_os = "windows")]
    let host = cpal::host_from_id(cpal::HostId::Wasapi).unwrap_or(cpal::default_host());
    #[cfg(not(target_os = "windows"))]
    let host = cpal::default_host();
    host
}

fn name_matches(device: &cpal::Device, wanted: &str) -> bool {
    device
        .name()
        .map(|n| n.to_lowercase().contains(&wanted.to_lowercase()))
        .unwrap_or(false)
}

/// Default host devices, optionally filtered by a name substring.
#[derive(Clone, Debug, Default)]
pub struct CpalDevices {
    pub input_name: Option<String>,
    pub output_name: Option<String>,
}

impl CpalDevices {
    pub fn new(input_name: Option<String>, output_name: Option<String>) -> Self {
        Self {
            input_name,
            output_name,
        }
    }

    fn pick_input(&self, constraints: &CaptureConstraints) -> Result<cpal::Device> {
        let host = host();
        let wanted = constraints.device_name.as_ref().or(self.input_name.as_ref());
        if let Some(wanted) = wanted {
            let found = host
                .input_devices()
                .map_err(unavailable)?
                .find(|d| name_matches(d, wanted));
            if let Some(device) = found {
                return Ok(device);
            }
            warn!("[Capture] No input matching '{}', using default", wanted);
        }
        host.default_input_device()
            .ok_or_else(|| unavailable("No microphone available. Please connect a microphone."))
    }

    fn pick_output(&self) -> Result<cpal::Device> {
        let host = host();
        if let Some(wanted) = &self.output_name {
            let found = host
                .output_devices()
                .map_err(unavailable)?
                .find(|d| name_matches(d, wanted));
            if let Some(device) = found {
                return Ok(device);
            }
            warn!("[Playback] No output matching '{}', using default", wanted);
        }
        host.default_output_device()
            .ok_or_else(|| unavailable("No audio output device available"))
    }
}

impl AudioDevices for CpalDevices {
    fn open_input(
        &mut self,
        constraints: &CaptureConstraints,
        notifier: DeviceNotifier,
    ) -> Result<Box<dyn InputDevice>> {
        let device = self.pick_input(constraints)?;
        let config = device.default_input_config().map_err(unavailable)?;
        info!(
            "[Capture] Using {:?} ({} ch @ {} Hz)",
            device.name().unwrap_or_default(),
            config.channels(),
            u32::from(config.sample_rate())
        );
        if constraints.noise_suppression || constraints.echo_cancellation {
            // cpal exposes raw streams; platform voice processing applies only
            // where the OS enables it for the default communications device.
            info!("[Capture] Voice processing requested from the platform");
        }
        Ok(Box::new(CpalInput {
            device,
            config,
            target_rate: constraints.sample_rate,
            notifier,
            stream: None,
        }))
    }

    fn open_output(&mut self, notifier: DeviceNotifier) -> Result<Box<dyn OutputDevice>> {
        let device = self.pick_output()?;
        let config = device.default_output_config().map_err(unavailable)?;
        let rate = u32::from(config.sample_rate());
        let channels = config.channels() as usize;
        info!(
            "[Playback] Using {:?} ({} ch @ {} Hz)",
            device.name().unwrap_or_default(),
            channels,
            rate
        );

        let mixer = Arc::new(Mutex::new(Mixer::new(rate)));
        let stream = build_output_stream(&device, &config, mixer.clone(), notifier)?;
        stream.play().map_err(unavailable)?;

        Ok(Box::new(CpalOutput {
            stream: Some(stream),
            mixer,
            rate,
        }))
    }
}

struct CpalInput {
    device: cpal::Device,
    config: cpal::SupportedStreamConfig,
    target_rate: u32,
    notifier: DeviceNotifier,
    stream: Option<cpal::Stream>,
}

impl InputDevice for CpalInput {
    fn start(&mut self, mut sink: SampleSink) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let channels = self.config.channels() as usize;
        let mut resampler =
            StreamResampler::new(u32::from(self.config.sample_rate()), self.target_rate);
        let notifier = self.notifier.clone();
        let err_fn = move |err: cpal::StreamError| {
            notifier(DeviceNotice::Fault(format!("input stream: {}", err)));
        };
        let stream_config: cpal::StreamConfig = self.config.clone().into();

        let stream = match self.config.sample_format() {
            cpal::SampleFormat::F32 => self.device.build_input_stream(
                &stream_config,
                move |data: &[f32], _: &_| {
                    let mono = downmix(data, channels);
                    sink(&resampler.process(&mono));
                },
                err_fn,
                None,
            ),
            cpal::SampleFormat::I16 => self.device.build_input_stream(
                &stream_config,
                move |data: &[i16], _: &_| {
                    let as_float: Vec<f32> = data.iter().map(|&s| s as f32 / 32768.0).collect();
                    let mono = downmix(&as_float, channels);
                    sink(&resampler.process(&mono));
                },
                err_fn,
                None,
            ),
            other => return Err(unavailable(format!("Unsupported input format {:?}", other))),
        }
        .map_err(unavailable)?;

        stream.play().map_err(unavailable)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CpalOutput {
    stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<Mixer>>,
    rate: u32,
}

impl OutputDevice for CpalOutput {
    fn now(&self) -> f64 {
        match self.mixer.lock() {
            Ok(mixer) => mixer.now(),
            Err(_) => 0.0,
        }
    }

    fn play(&mut self, voice: VoiceId, samples: Arc<[f32]>, sample_rate: u32, start_at: f64) {
        let resampled = resample_linear(&samples, sample_rate, self.rate);
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.add(voice, resampled, start_at);
        }
    }

    fn stop_voice(&mut self, voice: VoiceId) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.remove(voice);
        }
    }

    fn close(&mut self) {
        if let Ok(mut mixer) = self.mixer.lock() {
            mixer.clear();
        }
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        self.close();
    }
}

fn build_output_stream(
    device: &cpal::Device,
    config: &cpal::SupportedStreamConfig,
    mixer: Arc<Mutex<Mixer>>,
    notifier: DeviceNotifier,
) -> Result<cpal::Stream> {
    let channels = config.channels() as usize;
    let stream_config: cpal::StreamConfig = config.clone().into();
    let fault = notifier.clone();
    let err_fn = move |err: cpal::StreamError| {
        fault(DeviceNotice::Fault(format!("output stream: {}", err)));
    };

    let mut scratch: Vec<f32> = Vec::new();
    let mut finished: Vec<VoiceId> = Vec::new();

    let stream = match config.sample_format() {
        cpal::SampleFormat::F32 => device.build_output_stream(
            &stream_config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                render_into(&mixer, frames, &mut scratch, &mut finished);
                for (frame, &sample) in data.chunks_mut(channels).zip(&scratch) {
                    frame.fill(sample);
                }
                for voice in finished.drain(..) {
                    notifier(DeviceNotice::VoiceFinished(voice));
                }
            },
            err_fn,
            None,
        ),
        cpal::SampleFormat::I16 => device.build_output_stream(
            &stream_config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let frames = data.len() / channels.max(1);
                render_into(&mixer, frames, &mut scratch, &mut finished);
                for (frame, &sample) in data.chunks_mut(channels).zip(&scratch) {
                    frame.fill((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16);
                }
                for voice in finished.drain(..) {
                    notifier(DeviceNotice::VoiceFinished(voice));
                }
            },
            err_fn,
            None,
        ),
        other => return Err(unavailable(format!("Unsupported output format {:?}", other))),
    }
    .map_err(unavailable)?;

    Ok(stream)
}

fn render_into(
    mixer: &Arc<Mutex<Mixer>>,
    frames: usize,
    scratch: &mut Vec<f32>,
    finished: &mut Vec<VoiceId>,
) {
    scratch.clear();
    scratch.resize(frames, 0.0);
    // A poisoned lock yields one callback of silence rather than a panic on
    // the audio thread.
    if let Ok(mut mixer) = mixer.lock() {
        mixer.render(scratch, finished);
    }
}

#[derive(Debug)]
struct Voice {
    id: VoiceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled voices onto the output timeline.
#[derive(Debug)]
pub(crate) struct Mixer {
    rate: u32,
    frames_rendered: u64,
    last_end_frame: u64,
    voices: Vec<Voice>,
}

impl Mixer {
    pub(crate) fn new(rate: u32) -> Self {
        Self {
            rate,
            frames_rendered: 0,
            last_end_frame: 0,
            voices: Vec::new(),
        }
    }

    pub(crate) fn now(&self) -> f64 {
        self.frames_rendered as f64 / self.rate as f64
    }

    pub(crate) fn add(&mut self, id: VoiceId, samples: Vec<f32>, start_at: f64) {
        let mut start_frame = (start_at * self.rate as f64).round().max(0.0) as u64;
        // Rounding at non-multiple device rates can open a one-frame seam
        // between consecutive buffers; close it.
        if start_frame.abs_diff(self.last_end_frame) <= 1
            && self.last_end_frame >= self.frames_rendered
        {
            start_frame = self.last_end_frame;
        }
        let start_frame = start_frame.max(self.frames_rendered);
        let voice = Voice {
            id,
            start_frame,
            samples,
        };
        self.last_end_frame = voice.end_frame();
        self.voices.push(voice);
    }

    pub(crate) fn remove(&mut self, id: VoiceId) {
        self.voices.retain(|v| v.id != id);
    }

    pub(crate) fn clear(&mut self) {
        self.voices.clear();
        self.last_end_frame = self.frames_rendered;
    }

    /// Mix the next `out.len()` frames and advance the clock.
    pub(crate) fn render(&mut self, out: &mut [f32], finished: &mut Vec<VoiceId>) {
        let window_start = self.frames_rendered;
        let window_end = window_start + out.len() as u64;

        for voice in &self.voices {
            let from = voice.start_frame.max(window_start);
            let to = voice.end_frame().min(window_end);
            for t in from..to {
                out[(t - window_start) as usize] += voice.samples[(t - voice.start_frame) as usize];
            }
        }

        self.frames_rendered = window_end;
        self.voices.retain(|v| {
            let done = v.end_frame() <= window_end;
            if done {
                finished.push(v.id);
            }
            !done
        });
    }
}
