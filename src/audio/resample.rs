//! Linear resampling and downmixing between device and wire formats.

/// Linear interpolation resampler. Good enough for speech.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let new_len = (samples.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_pos = i as f64 * ratio;
        let src_idx = src_pos as usize;
        let frac = (src_pos - src_idx as f64) as f32;

        let s1 = samples.get(src_idx).copied().unwrap_or(0.0);
        let s2 = samples.get(src_idx + 1).copied().unwrap_or(s1);

        output.push(s1 * (1.0 - frac) + s2 * frac);
    }

    output
}

/// Average interleaved frames down to mono.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming resampler that keeps its phase across callback-sized chunks,
/// so consecutive device buffers join without clicks or dropped samples.
#[derive(Debug)]
pub struct StreamResampler {
    ratio: f64,
    position: f64,
    last: Option<f32>,
}

impl StreamResampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            ratio: from_rate as f64 / to_rate.max(1) as f64,
            position: 0.0,
            last: None,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        (self.ratio - 1.0).abs() < f64::EPSILON
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if self.is_passthrough() || input.is_empty() {
            return input.to_vec();
        }

        // Index -1 refers to the tail sample of the previous chunk.
        let sample_at = |idx: isize, last: Option<f32>| -> f32 {
            if idx < 0 {
                last.unwrap_or(input[0])
            } else {
                input[idx as usize]
            }
        };

        let mut output = Vec::with_capacity((input.len() as f64 / self.ratio) as usize + 1);
        let limit = input.len() as f64 - 1.0;
        while self.position < limit {
            let base = self.position.floor();
            let frac = (self.position - base) as f32;
            let i0 = base as isize;
            let s0 = sample_at(i0, self.last);
            let s1 = sample_at(i0 + 1, self.last);
            output.push(s0 + (s1 - s0) * frac);
            self.position += self.ratio;
        }

        self.position -= input.len() as f64;
        self.last = input.last().copied();
        output
    }
}
