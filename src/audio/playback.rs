//! Gapless playback scheduling on a single virtual clock, with barge-in.
//!
//! Every buffer starts at `max(cursor, now)` and pushes the cursor forward by
//! its duration, so bursts and jitter on the inbound side still come out
//! back-to-back with no gap and no overlap. `interrupt()` silences everything
//! that is scheduled or sounding and bumps a generation counter; buffers
//! prepared before the bump are refused at enqueue time.

use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, info};

use super::{AudioDevices, DeviceNotifier, OutputDevice, VoiceId};
use crate::error::Result;

/// Decoded speech waiting to be scheduled.
#[derive(Clone, Debug)]
pub struct PlaybackBuffer {
    generation: u64,
    samples: Arc<[f32]>,
    sample_rate: u32,
}

impl PlaybackBuffer {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct ScheduledVoice {
    start: f64,
    duration: f64,
}

pub struct PlaybackScheduler {
    output: Option<Box<dyn OutputDevice>>,
    next_start: f64,
    pending: BTreeMap<VoiceId, ScheduledVoice>,
    next_voice: VoiceId,
    generation: u64,
}

impl PlaybackScheduler {
    /// Open the output device and start the cursor at its current time.
    pub fn acquire(devices: &mut dyn AudioDevices, notifier: DeviceNotifier) -> Result<Self> {
        let output = devices.open_output(notifier)?;
        let next_start = output.now();
        info!("[Playback] Output acquired (clock at {:.3}s)", next_start);
        Ok(Self {
            output: Some(output),
            next_start,
            pending: BTreeMap::new(),
            next_voice: 1,
            generation: 0,
        })
    }

    /// Wrap decoded samples, stamping the current interrupt generation.
    pub fn prepare(&self, samples: Vec<f32>, sample_rate: u32) -> PlaybackBuffer {
        PlaybackBuffer {
            generation: self.generation,
            samples: samples.into(),
            sample_rate,
        }
    }

    /// Schedule `buffer` right after whatever is already queued.
    ///
    /// Returns the clock time the buffer will start at, or `None` when it was
    /// refused (stale generation, empty buffer, or output already closed).
    pub fn enqueue(&mut self, buffer: PlaybackBuffer) -> Option<f64> {
        if buffer.generation != self.generation {
            debug!(
                "[Playback] Dropping buffer from generation {} (current {})",
                buffer.generation, self.generation
            );
            return None;
        }
        if buffer.samples.is_empty() {
            return None;
        }
        let output = self.output.as_mut()?;

        let duration = buffer.duration_secs();
        let start = self.next_start.max(output.now());
        let voice = self.next_voice;
        self.next_voice += 1;

        output.play(voice, buffer.samples, buffer.sample_rate, start);
        self.pending.insert(voice, ScheduledVoice { start, duration });
        self.next_start = start + duration;
        Some(start)
    }

    /// Barge-in: stop every scheduled or sounding buffer right now.
    pub fn interrupt(&mut self) {
        self.generation += 1;
        let Some(output) = self.output.as_mut() else {
            self.pending.clear();
            return;
        };

        let flushed = self.pending.len();
        for voice in std::mem::take(&mut self.pending).into_keys() {
            output.stop_voice(voice);
        }
        self.next_start = output.now();
        if flushed > 0 {
            info!("[Playback] Interrupted, flushed {} buffer(s)", flushed);
        }
    }

    /// A buffer played to its end on its own.
    pub fn on_finished(&mut self, voice: VoiceId) {
        self.pending.remove(&voice);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn next_start(&self) -> f64 {
        self.next_start
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Flush and release the output device. Idempotent.
    pub fn close(&mut self) {
        self.interrupt();
        if let Some(mut output) = self.output.take() {
            output.close();
            info!("[Playback] Output released");
        }
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::FakeDevices;

    fn scheduler(devices: &mut FakeDevices) -> PlaybackScheduler {
        PlaybackScheduler::acquire(devices, Arc::new(|_| {})).unwrap()
    }

    fn buffer(s: &PlaybackScheduler, secs: f64) -> PlaybackBuffer {
        s.prepare(vec![0.1; (secs * 24000.0).round() as usize], 24000)
    }

    #[test]
    fn consecutive_buffers_are_gapless() {
        let mut devices = FakeDevices::new();
        devices.set_clock(2.0);
        let mut s = scheduler(&mut devices);

        let durations = [0.04, 0.1, 0.02, 0.25, 0.1];
        let mut starts = Vec::new();
        for d in durations {
            let b = buffer(&s, d);
            starts.push((s.enqueue(b).unwrap(), d));
        }

        assert_eq!(starts[0].0, 2.0);
        for pair in starts.windows(2) {
            let (prev_start, prev_dur) = pair[0];
            let (start, _) = pair[1];
            assert!(start >= prev_start);
            assert!((start - (prev_start + prev_dur)).abs() < 1e-12);
        }
        assert_eq!(s.pending_len(), durations.len());
    }

    #[test]
    fn late_buffers_start_at_clock_not_in_the_past() {
        let mut devices = FakeDevices::new();
        let mut s = scheduler(&mut devices);
        let b = buffer(&s, 0.1);
        assert_eq!(s.enqueue(b), Some(0.0));

        // The queue drained and the clock moved past the cursor.
        devices.set_clock(5.0);
        let b = buffer(&s, 0.1);
        assert_eq!(s.enqueue(b), Some(5.0));
        assert!((s.next_start() - 5.1).abs() < 1e-12);
    }

    #[test]
    fn interrupt_flushes_everything_and_resets_cursor() {
        let mut devices = FakeDevices::new();
        let mut s = scheduler(&mut devices);
        for _ in 0..3 {
            let b = buffer(&s, 0.5);
            s.enqueue(b);
        }
        devices.set_clock(0.7);
        s.interrupt();

        assert_eq!(s.pending_len(), 0);
        assert_eq!(s.next_start(), 0.7);
        let mut stopped = devices.stopped_voices();
        stopped.sort();
        assert_eq!(stopped, vec![1, 2, 3]);
    }

    #[test]
    fn buffers_prepared_before_interrupt_are_refused() {
        let mut devices = FakeDevices::new();
        let mut s = scheduler(&mut devices);
        let stale = buffer(&s, 0.1);
        s.interrupt();
        assert_eq!(s.enqueue(stale), None);
        assert_eq!(s.pending_len(), 0);

        let fresh = buffer(&s, 0.1);
        assert!(s.enqueue(fresh).is_some());
    }

    #[test]
    fn interrupt_with_nothing_pending_is_harmless() {
        let mut devices = FakeDevices::new();
        let mut s = scheduler(&mut devices);
        s.interrupt();
        s.interrupt();
        assert_eq!(s.pending_len(), 0);
        assert_eq!(s.generation(), 2);
    }

    #[test]
    fn finished_voices_leave_the_pending_set() {
        let mut devices = FakeDevices::new();
        let mut s = scheduler(&mut devices);
        let b = buffer(&s, 0.1);
        s.enqueue(b);
        let b = buffer(&s, 0.1);
        s.enqueue(b);
        s.on_finished(1);
        assert_eq!(s.pending_len(), 1);
        // Stopping a finished voice on interrupt is tolerated.
        s.on_finished(1);
        s.interrupt();
        assert_eq!(devices.stopped_voices(), vec![2]);
    }

    #[test]
    fn close_releases_output_once() {
        let mut devices = FakeDevices::new();
        let mut s = scheduler(&mut devices);
        assert_eq!(devices.live_handles(), 1);
        s.close();
        s.close();
        assert_eq!(devices.live_handles(), 0);
        let b = buffer(&s, 0.1);
        assert_eq!(s.enqueue(b), None);
    }
}
