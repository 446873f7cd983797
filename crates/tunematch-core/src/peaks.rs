//! Spectral peak picking using a time-frequency max filter
//!
//! A bin is a peak when it dominates a small rectangle around it and
//! clears an adaptive per-frame noise floor. Sustained tones therefore
//! yield one peak near their onset instead of one per frame.

use crate::config::EngineConfig;
use crate::transform::{freq_to_bin, Spectrogram};
use serde::{Deserialize, Serialize};

/// A local maximum of the spectrogram
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    /// Time index (frame number)
    pub frame: u32,
    /// Frequency bin index
    pub bin: u32,
    /// Magnitude value
    pub magnitude: f32,
}

impl SpectralPeak {
    pub fn new(frame: u32, bin: u32, magnitude: f32) -> Self {
        Self {
            frame,
            bin,
            magnitude,
        }
    }
}

/// Peak picker
pub struct PeakPicker {
    freq_neighborhood: usize,
    time_neighborhood: usize,
    floor_factor: f32,
    min_magnitude: f32,
    max_peaks: usize,
    min_bin: usize,
    max_bin: usize,
}

impl PeakPicker {
    pub fn new(config: &EngineConfig) -> Self {
        let last_bin = config.num_bins().saturating_sub(1);
        Self {
            freq_neighborhood: config.peak_neighborhood.max(1),
            time_neighborhood: config.peak_time_neighborhood,
            floor_factor: config.peak_floor_factor,
            min_magnitude: config.min_peak_magnitude,
            max_peaks: config.max_peaks_per_frame,
            min_bin: freq_to_bin(config.min_freq, config).max(1),
            max_bin: freq_to_bin(config.max_freq, config).min(last_bin),
        }
    }

    /// Extract peaks, ordered by (frame, bin)
    pub fn extract(&self, spectrogram: &Spectrogram) -> Vec<SpectralPeak> {
        if self.max_bin <= self.min_bin || spectrogram.num_bins <= self.max_bin {
            return Vec::new();
        }

        let mut peaks = Vec::new();
        for t in 0..spectrogram.num_frames {
            peaks.extend(self.frame_peaks(spectrogram, t));
        }
        peaks
    }

    /// Peaks of frame `t`, strongest `max_peaks` kept
    fn frame_peaks(&self, spectrogram: &Spectrogram, t: usize) -> Vec<SpectralPeak> {
        let frame = &spectrogram.magnitudes[t];
        let band = &frame[self.min_bin..=self.max_bin];
        let mean = band.iter().sum::<f32>() / band.len() as f32;
        let floor = (mean * self.floor_factor).max(self.min_magnitude);

        let mut candidates: Vec<SpectralPeak> = (self.min_bin..=self.max_bin)
            .filter(|&f| frame[f] > floor && self.is_local_max(spectrogram, t, f))
            .map(|f| SpectralPeak::new(t as u32, f as u32, frame[f]))
            .collect();

        // Strongest first, lower bin wins ties
        candidates.sort_by(|a, b| {
            b.magnitude
                .total_cmp(&a.magnitude)
                .then(a.bin.cmp(&b.bin))
        });
        candidates.truncate(self.max_peaks);
        candidates.sort_by_key(|p| p.bin);
        candidates
    }

    /// Strict maximum along frequency within its own frame, and not
    /// exceeded anywhere else in the time-frequency rectangle
    fn is_local_max(&self, spectrogram: &Spectrogram, t: usize, f: usize) -> bool {
        let value = spectrogram.magnitudes[t][f];
        let f_start = f.saturating_sub(self.freq_neighborhood);
        let f_end = (f + self.freq_neighborhood + 1).min(spectrogram.num_bins);
        let t_start = t.saturating_sub(self.time_neighborhood);
        let t_end = (t + self.time_neighborhood + 1).min(spectrogram.num_frames);

        let own_frame = &spectrogram.magnitudes[t];
        if (f_start..f_end).any(|fi| fi != f && own_frame[fi] >= value) {
            return false;
        }

        (t_start..t_end)
            .filter(|&ti| ti != t)
            .all(|ti| spectrogram.magnitudes[ti][f_start..f_end].iter().all(|&m| m <= value))
    }
}
