//! Deterministic synthetic signals for tests
//!
//! Every generator is seeded and quantised through the s16 PCM codec, so a
//! signal indexed as a reference track and the same signal streamed as PCM
//! frames carry identical samples.

use crate::audio::{decode_pcm_s16le, encode_pcm_s16le, AudioWindow};
use std::f64::consts::PI;

/// xorshift64*, good enough for test fixtures and stable across platforms
struct Rng(u64);

impl Rng {
    fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9E37_79B9_7F4A_7C15) | 1)
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.0;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.0 = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform in [0, 1)
    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }
}

/// A sequence of short plucked notes, each made of three random partials
/// with a fast attack and exponential decay, over a faint noise bed
pub fn melody(seed: u64, seconds: f64, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate as f64;
    let total = (seconds * sr).round() as usize;
    let mut rng = Rng::new(seed);
    let mut samples = vec![0.0f64; total];

    let attack = (0.005 * sr) as usize;
    let decay = 0.08 * sr;

    let mut start = 0usize;
    while start < total {
        let len = (rng.range(0.10, 0.25) * sr) as usize;
        let partials: Vec<(f64, f64)> = (0..3)
            .map(|_| (rng.range(150.0, 3500.0), rng.range(0.2, 0.3)))
            .collect();

        for (i, slot) in samples[start..(start + len).min(total)].iter_mut().enumerate() {
            let envelope = if i < attack {
                i as f64 / attack as f64
            } else {
                (-((i - attack) as f64) / decay).exp()
            };
            let t = (start + i) as f64 / sr;
            *slot += envelope
                * partials
                    .iter()
                    .map(|(freq, amp)| amp * (2.0 * PI * freq * t).sin())
                    .sum::<f64>();
        }
        start += len;
    }

    for slot in samples.iter_mut() {
        *slot += rng.range(-0.005, 0.005);
    }

    quantize(samples)
}

/// Uniform white noise at moderate level
pub fn white_noise(seed: u64, seconds: f64, sample_rate: u32) -> Vec<f32> {
    let total = (seconds * sample_rate as f64).round() as usize;
    let mut rng = Rng::new(seed);
    quantize((0..total).map(|_| rng.range(-0.5, 0.5)).collect())
}

/// Wrap samples as window 0 of session 0
pub fn window(samples: Vec<f32>, sample_rate: u32) -> AudioWindow {
    AudioWindow {
        session_id: 0,
        index: 0,
        start_sample: 0,
        sample_rate,
        samples,
    }
}

fn quantize(samples: Vec<f64>) -> Vec<f32> {
    let raw: Vec<f32> = samples.into_iter().map(|s| s as f32).collect();
    decode_pcm_s16le(&encode_pcm_s16le(&raw)).unwrap_or_default()
}
