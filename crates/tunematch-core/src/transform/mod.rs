//! Short-time spectrum
//!
//! Hann-windowed FFT magnitudes over full frames only, so a frame's
//! spectrum depends on its own samples and nothing else.

use crate::config::EngineConfig;
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::f32::consts::PI;
use std::sync::Arc;

/// Spectrogram representation
#[derive(Debug, Clone)]
pub struct Spectrogram {
    /// Magnitude values [time_frame][frequency_bin]
    pub magnitudes: Vec<Vec<f32>>,
    /// Number of time frames
    pub num_frames: usize,
    /// Number of frequency bins
    pub num_bins: usize,
}

/// Reusable STFT front end; the FFT plan is built once per configuration
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    frame_size: usize,
    hop_size: usize,
}

impl SpectrumAnalyzer {
    pub fn new(config: &EngineConfig) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(config.frame_size);

        Self {
            fft,
            window: create_hann_window(config.frame_size),
            frame_size: config.frame_size,
            hop_size: config.hop_size,
        }
    }

    /// Number of full frames that fit in `num_samples`
    pub fn num_frames(&self, num_samples: usize) -> usize {
        if num_samples < self.frame_size {
            0
        } else {
            (num_samples - self.frame_size) / self.hop_size + 1
        }
    }

    /// Compute magnitude spectrogram
    pub fn compute(&self, samples: &[f32]) -> Spectrogram {
        let num_frames = self.num_frames(samples.len());
        let num_bins = self.frame_size / 2;

        let mut magnitudes = Vec::with_capacity(num_frames);
        let mut buffer = vec![Complex::new(0.0f32, 0.0); self.frame_size];
        let mut scratch = vec![Complex::new(0.0f32, 0.0); self.fft.get_inplace_scratch_len()];

        for frame_idx in 0..num_frames {
            let start = frame_idx * self.hop_size;
            let frame = &samples[start..start + self.frame_size];

            for (slot, (&s, &w)) in buffer.iter_mut().zip(frame.iter().zip(&self.window)) {
                *slot = Complex::new(s * w, 0.0);
            }

            self.fft.process_with_scratch(&mut buffer, &mut scratch);

            magnitudes.push(buffer[..num_bins].iter().map(|c| c.norm()).collect());
        }

        Spectrogram {
            magnitudes,
            num_frames,
            num_bins,
        }
    }
}

/// Map a frequency in Hz to the nearest FFT bin
pub fn freq_to_bin(freq: f32, config: &EngineConfig) -> usize {
    (freq * config.frame_size as f32 / config.sample_rate as f32).round() as usize
}

/// Create Hann window
fn create_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| {
            let x = i as f32 / (size - 1) as f32;
            0.5 * (1.0 - (2.0 * PI * x).cos())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hann_window() {
        let window = create_hann_window(512);
        assert_eq!(window.len(), 512);
        assert!((window[0] - 0.0).abs() < 0.001);
        assert!((window[256] - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_frame_count() {
        let config = EngineConfig::default();
        let analyzer = SpectrumAnalyzer::new(&config);
        assert_eq!(analyzer.num_frames(1023), 0);
        assert_eq!(analyzer.num_frames(1024), 1);
        // 3 s window at 8 kHz
        assert_eq!(analyzer.num_frames(24_000), 92);
    }

    #[test]
    fn test_tone_peaks_at_expected_bin() {
        let config = EngineConfig::default();
        let analyzer = SpectrumAnalyzer::new(&config);
        let samples: Vec<f32> = (0..4096)
            .map(|i| (2.0 * PI * 1000.0 * i as f32 / config.sample_rate as f32).sin())
            .collect();

        let spectrogram = analyzer.compute(&samples);
        let frame = &spectrogram.magnitudes[0];
        let peak_bin = frame
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(bin, _)| bin)
            .unwrap();

        assert_eq!(peak_bin, freq_to_bin(1000.0, &config));
    }
}
