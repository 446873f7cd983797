//! Configuration parameters for extraction, windowing and matching
//!
//! The same values must be used when fingerprinting reference tracks and
//! when analysing live windows, otherwise hashes never collide.

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    // Audio processing
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,

    // Spectral band kept for peak picking
    pub min_freq: f32,
    pub max_freq: f32,

    // Peak picking
    pub peak_neighborhood: usize,
    pub peak_time_neighborhood: usize,
    pub peak_floor_factor: f32,
    pub min_peak_magnitude: f32,
    pub max_peaks_per_frame: usize,

    // Landmark pairing
    pub fan_out: usize,
    pub min_time_delta: u32,
    pub max_time_delta: u32,
    pub min_freq_delta: u32,
    pub max_freq_delta: u32,
    pub freq_quantization_bits: u32,

    // Windowing
    pub window_seconds: f64,
    pub window_hop_seconds: f64,
    pub min_window_seconds: f64,

    // Matching
    pub drift_tolerance_frames: i64,
    pub min_votes: u32,
    pub confidence_floor: f64,
    pub top_k: usize,
    pub max_postings_per_hash: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // 250-sample hop at 8 kHz: one second is exactly 32 frames
            sample_rate: 8000,
            frame_size: 1024,
            hop_size: 250,

            min_freq: 100.0,
            max_freq: 3800.0,

            peak_neighborhood: 3,
            peak_time_neighborhood: 2,
            peak_floor_factor: 3.0,
            min_peak_magnitude: 1e-3,
            max_peaks_per_frame: 5,

            fan_out: 5,
            min_time_delta: 2,
            max_time_delta: 48,
            min_freq_delta: 1,
            max_freq_delta: 128,
            freq_quantization_bits: 0,

            window_seconds: 3.0,
            window_hop_seconds: 1.0,
            min_window_seconds: 1.5,

            drift_tolerance_frames: 2,
            min_votes: 8,
            confidence_floor: 0.15,
            top_k: 5,
            max_postings_per_hash: 512,
        }
    }
}

impl EngineConfig {
    /// Validate configuration parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.sample_rate == 0 {
            anyhow::bail!("Sample rate must be > 0");
        }
        if self.frame_size < 16 || self.hop_size == 0 {
            anyhow::bail!("frame_size must be >= 16 and hop_size > 0");
        }
        if self.min_freq >= self.max_freq {
            anyhow::bail!("min_freq must be < max_freq");
        }
        if self.max_freq > self.sample_rate as f32 / 2.0 {
            anyhow::bail!("max_freq must not exceed the Nyquist frequency");
        }
        if self.max_peaks_per_frame == 0 || self.fan_out == 0 {
            anyhow::bail!("max_peaks_per_frame and fan_out must be > 0");
        }
        if self.min_time_delta == 0 || self.min_time_delta > self.max_time_delta {
            anyhow::bail!("time delta range must be non-empty and start above 0");
        }
        if self.max_time_delta >= (1 << 14) {
            anyhow::bail!("max_time_delta must fit in 14 bits");
        }
        if self.min_freq_delta > self.max_freq_delta {
            anyhow::bail!("min_freq_delta must be <= max_freq_delta");
        }
        if (self.num_bins() - 1) >> self.freq_quantization_bits >= (1 << 9) {
            anyhow::bail!("frequency bins must fit in 9 bits after quantization");
        }
        if self.window_seconds <= 0.0 || self.window_hop_seconds <= 0.0 {
            anyhow::bail!("window and window hop must be > 0");
        }
        if self.window_hop_seconds > self.window_seconds {
            anyhow::bail!("window hop must not exceed the window");
        }
        if self.min_window_seconds <= 0.0 || self.min_window_seconds > self.window_seconds {
            anyhow::bail!("min_window_seconds must be in (0, window_seconds]");
        }
        if self.min_window_samples() < self.frame_size {
            anyhow::bail!("min_window_seconds is shorter than one analysis frame");
        }
        if self.drift_tolerance_frames <= 0 {
            anyhow::bail!("drift_tolerance_frames must be > 0");
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            anyhow::bail!("confidence_floor must be within [0, 1]");
        }
        if self.top_k == 0 || self.max_postings_per_hash == 0 {
            anyhow::bail!("top_k and max_postings_per_hash must be > 0");
        }
        Ok(())
    }

    /// Number of FFT bins kept per frame (DC up to Nyquist, exclusive)
    pub fn num_bins(&self) -> usize {
        self.frame_size / 2
    }

    /// Duration of one analysis hop in seconds
    pub fn frame_seconds(&self) -> f64 {
        self.hop_size as f64 / self.sample_rate as f64
    }

    pub fn window_samples(&self) -> usize {
        self.seconds_to_samples(self.window_seconds)
    }

    pub fn window_hop_samples(&self) -> usize {
        self.seconds_to_samples(self.window_hop_seconds)
    }

    pub fn min_window_samples(&self) -> usize {
        self.seconds_to_samples(self.min_window_seconds)
    }

    pub fn seconds_to_samples(&self, seconds: f64) -> usize {
        (seconds * self.sample_rate as f64).round() as usize
    }

    /// Parameters that determine hash compatibility, as stored in snapshots
    pub fn extraction_params(&self) -> ExtractionParams {
        ExtractionParams {
            sample_rate: self.sample_rate,
            frame_size: self.frame_size,
            hop_size: self.hop_size,
            min_freq: self.min_freq,
            max_freq: self.max_freq,
            min_time_delta: self.min_time_delta,
            max_time_delta: self.max_time_delta,
            min_freq_delta: self.min_freq_delta,
            max_freq_delta: self.max_freq_delta,
            freq_quantization_bits: self.freq_quantization_bits,
        }
    }
}

/// Subset of [`EngineConfig`] that must agree between the live path and
/// the snapshot a session matches against: the hash layout, the peak band
/// and the landmark target zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionParams {
    pub sample_rate: u32,
    pub frame_size: usize,
    pub hop_size: usize,
    pub min_freq: f32,
    pub max_freq: f32,
    pub min_time_delta: u32,
    pub max_time_delta: u32,
    pub min_freq_delta: u32,
    pub max_freq_delta: u32,
    pub freq_quantization_bits: u32,
}
