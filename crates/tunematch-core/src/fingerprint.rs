//! Landmark generation and hashing
//!
//! Each spectral peak is paired with later peaks inside a bounded target
//! zone; the pair is quantised into a 32-bit hash anchored at the first
//! peak's frame.

use crate::audio::AudioWindow;
use crate::config::EngineConfig;
use crate::error::AudioError;
use crate::peaks::{PeakPicker, SpectralPeak};
use crate::transform::SpectrumAnalyzer;
use serde::{Deserialize, Serialize};

const FREQ_BITS: u32 = 9;
const DELTA_BITS: u32 = 14;

/// A hashed peak pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Landmark {
    /// Anchor frame within the analysed audio
    pub offset: u32,
    /// 32-bit landmark hash
    pub hash: u32,
}

impl Landmark {
    /// Pack two peaks into a landmark
    ///
    /// Layout: `f1` in bits 23..32, `f2` in bits 14..23, frame delta in bits 0..14.
    pub fn from_peaks(anchor: &SpectralPeak, target: &SpectralPeak, quantization_bits: u32) -> Self {
        let freq_mask = (1u32 << FREQ_BITS) - 1;
        let delta_mask = (1u32 << DELTA_BITS) - 1;

        let f1 = (anchor.bin >> quantization_bits) & freq_mask;
        let f2 = (target.bin >> quantization_bits) & freq_mask;
        let dt = (target.frame - anchor.frame) & delta_mask;

        Self {
            offset: anchor.frame,
            hash: (f1 << (FREQ_BITS + DELTA_BITS)) | (f2 << DELTA_BITS) | dt,
        }
    }

    /// Unpack (f1, f2, dt) from the hash
    pub fn components(&self) -> (u32, u32, u32) {
        let freq_mask = (1u32 << FREQ_BITS) - 1;
        let delta_mask = (1u32 << DELTA_BITS) - 1;
        (
            (self.hash >> (FREQ_BITS + DELTA_BITS)) & freq_mask,
            (self.hash >> DELTA_BITS) & freq_mask,
            self.hash & delta_mask,
        )
    }
}

/// Deduplicated landmarks of one window, ordered by (offset, hash)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryHashSet {
    landmarks: Vec<Landmark>,
}

impl QueryHashSet {
    pub fn from_landmarks(mut landmarks: Vec<Landmark>) -> Self {
        landmarks.sort_unstable();
        landmarks.dedup();
        Self { landmarks }
    }

    pub fn len(&self) -> usize {
        self.landmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.landmarks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Landmark> {
        self.landmarks.iter()
    }

    pub fn as_slice(&self) -> &[Landmark] {
        &self.landmarks
    }
}

/// Landmark generator
pub struct LandmarkGenerator {
    fan_out: usize,
    min_time_delta: u32,
    max_time_delta: u32,
    min_freq_delta: u32,
    max_freq_delta: u32,
    quantization_bits: u32,
}

impl LandmarkGenerator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            fan_out: config.fan_out,
            min_time_delta: config.min_time_delta,
            max_time_delta: config.max_time_delta,
            min_freq_delta: config.min_freq_delta,
            max_freq_delta: config.max_freq_delta,
            quantization_bits: config.freq_quantization_bits,
        }
    }

    /// Generate landmarks from peaks ordered by (frame, bin)
    pub fn generate(&self, peaks: &[SpectralPeak]) -> Vec<Landmark> {
        let mut landmarks = Vec::new();

        for (i, anchor) in peaks.iter().enumerate() {
            let mut paired = 0;

            for target in &peaks[i + 1..] {
                let dt = target.frame - anchor.frame;
                if dt > self.max_time_delta {
                    break;
                }
                if dt < self.min_time_delta {
                    continue;
                }

                let df = target.bin.abs_diff(anchor.bin);
                if df < self.min_freq_delta || df > self.max_freq_delta {
                    continue;
                }

                landmarks.push(Landmark::from_peaks(anchor, target, self.quantization_bits));
                paired += 1;
                if paired == self.fan_out {
                    break;
                }
            }
        }

        landmarks
    }
}

/// Audio to landmarks, shared by live windows and offline reference tracks
pub struct Extractor {
    sample_rate: u32,
    analyzer: SpectrumAnalyzer,
    picker: PeakPicker,
    generator: LandmarkGenerator,
}

impl Extractor {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            analyzer: SpectrumAnalyzer::new(config),
            picker: PeakPicker::new(config),
            generator: LandmarkGenerator::new(config),
        }
    }

    /// Fingerprint one analysis window
    ///
    /// An empty set is a valid result meaning "no evidence".
    pub fn extract(&self, window: &AudioWindow) -> Result<QueryHashSet, AudioError> {
        if window.sample_rate != self.sample_rate {
            return Err(AudioError::SampleRateMismatch {
                got: window.sample_rate,
                expected: self.sample_rate,
            });
        }

        let hashes = QueryHashSet::from_landmarks(self.landmarks(&window.samples));
        log::trace!(
            "Window {} of session {}: {} landmarks",
            window.index,
            window.session_id,
            hashes.len()
        );
        Ok(hashes)
    }

    /// Fingerprint a whole reference track (offsets relative to its start)
    pub fn fingerprint_track(&self, samples: &[f32]) -> Vec<Landmark> {
        let mut landmarks = self.landmarks(samples);
        landmarks.sort_unstable();
        landmarks.dedup();
        landmarks
    }

    fn landmarks(&self, samples: &[f32]) -> Vec<Landmark> {
        let spectrogram = self.analyzer.compute(samples);
        let peaks = self.picker.extract(&spectrogram);
        self.generator.generate(&peaks)
    }
}
