//! tunematch core - streaming audio identification
//!
//! Landmark fingerprints are extracted from short sliding windows and
//! matched against a versioned reference index by offset-histogram voting.

pub mod audio;
pub mod cache_key;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod fingerprint;
pub mod index;
pub mod matching;
pub mod peaks;
pub mod publisher;
pub mod segmentation;
pub mod session;
pub mod transform;

#[cfg(any(test, feature = "test-support"))]
pub mod synth;

pub use cache_key::{duration_bucket, CacheKey, FingerprintSummary};
pub use config::{EngineConfig, ExtractionParams};
pub use error::{AudioError, EngineError, IndexError};
pub use events::{MatchPayload, ServerEvent};
pub use fingerprint::{Extractor, Landmark, QueryHashSet};
pub use index::{FingerprintEntry, FingerprintIndex, IndexBuilder, IndexHandle, TrackInfo};
pub use matching::{MatchAggregator, MatchCandidate, MatchResult};
pub use publisher::ResultPublisher;
pub use segmentation::split_windows;
pub use session::{SessionLimits, SessionPhase, SessionState, SessionStats};

use std::collections::HashMap;

/// Outcome of identifying a complete clip
#[derive(Debug, Clone)]
pub struct ClipReport {
    /// Best result per track across all windows, strongest first; times
    /// are aligned with the start of the clip rather than of the window
    pub matches: Vec<MatchResult>,
    /// Canonical summary of the whole clip's landmarks
    pub summary: FingerprintSummary,
    pub windows: usize,
    pub duration_secs: f64,
}

/// Decode an audio file and fingerprint it as a reference track
pub fn fingerprint_file(
    audio_path: &str,
    config: &EngineConfig,
) -> anyhow::Result<(audio::AudioData, Vec<Landmark>)> {
    let audio_data = audio::decode_audio(audio_path, config.sample_rate)?;
    let landmarks = Extractor::new(config).fingerprint_track(&audio_data.samples);
    Ok((audio_data, landmarks))
}

/// Identify a finished clip of mono samples at the engine sample rate
pub fn identify_clip(samples: &[f32], config: &EngineConfig, index: &FingerprintIndex) -> ClipReport {
    let extractor = Extractor::new(config);
    let aggregator = MatchAggregator::new(config);
    let windows = split_windows(samples, config, 0);

    let duration_secs = samples.len() as f64 / config.sample_rate as f64;

    let mut best: HashMap<u32, MatchResult> = HashMap::new();
    for window in &windows {
        // Sample rate is fixed by construction
        let Ok(hashes) = extractor.extract(window) else {
            continue;
        };
        for mut result in aggregator.aggregate(window, &hashes, index) {
            result.start_time = (result.start_time - window.start_seconds()).max(0.0);
            result.end_time = result.start_time + duration_secs;
            match best.get(&result.track_id) {
                Some(prev) if prev.confidence >= result.confidence => {}
                _ => {
                    best.insert(result.track_id, result);
                }
            }
        }
    }

    let mut matches: Vec<MatchResult> = best.into_values().collect();
    matches.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(a.track_id.cmp(&b.track_id))
    });
    matches.truncate(config.top_k);

    let summary = FingerprintSummary::from_hashes(&QueryHashSet::from_landmarks(
        extractor.fingerprint_track(samples),
    ));

    ClipReport {
        matches,
        summary,
        windows: windows.len(),
        duration_secs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_clip_finds_source_track() {
        let config = EngineConfig::default();
        let extractor = Extractor::new(&config);
        let track = synth::melody(21, 40.0, config.sample_rate);

        let mut builder = IndexBuilder::new(&config);
        builder.add_track(
            TrackInfo {
                track_id: 4,
                title: "clip source".to_string(),
                duration_ms: 40_000,
                source_path: String::new(),
            },
            &extractor.fingerprint_track(&track),
        );
        let index = builder.build(1);

        // 5 s excerpt starting at 12 s
        let start = 12 * config.sample_rate as usize;
        let report = identify_clip(&track[start..start + 40_000], &config, &index);

        assert_eq!(report.windows, 3);
        assert_eq!(report.matches.len(), 1);
        assert_eq!(report.matches[0].track_id, 4);
        assert!((11.0..13.0).contains(&report.matches[0].start_time));
        assert!(!report.summary.as_bytes().is_empty());
        approx::assert_abs_diff_eq!(report.duration_secs, 5.0);
    }

    #[test]
    fn test_identify_clip_same_input_same_summary() {
        let config = EngineConfig::default();
        let index = IndexBuilder::new(&config).build(1);
        let clip = synth::melody(8, 4.0, config.sample_rate);

        let a = identify_clip(&clip, &config, &index);
        let b = identify_clip(&clip, &config, &index);
        assert!(a.matches.is_empty());
        assert_eq!(a.summary, b.summary);
    }
}
