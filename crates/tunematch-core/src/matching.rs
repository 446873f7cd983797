//! Offset-histogram voting over one window's landmarks
//!
//! Every query hash that hits a posting casts a vote for
//! `(track, query_offset - track_offset)`. A recording that really is
//! playing concentrates its votes in one offset bucket; chance collisions
//! spread out.

use crate::audio::AudioWindow;
use crate::config::EngineConfig;
use crate::fingerprint::QueryHashSet;
use crate::index::FingerprintIndex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};


/// Best-aligned bucket of one track, before promotion
#[derive(Debug, Clone, PartialEq)]
pub struct MatchCandidate {
    pub track_id: u32,
    /// Rounded mean of the exact deltas in the winning bucket (frames)
    pub offset_delta: i64,
    pub mean_delta: f64,
    /// Votes in the winning bucket
    pub votes: u32,
    /// Votes for this track across all buckets
    pub track_votes: u32,
    pub confidence: f64,
}

impl MatchCandidate {
    /// The winning bucket holds a strict majority of the track's votes
    pub fn has_majority(&self) -> bool {
        self.votes * 2 > self.track_votes
    }
}

/// Accepted identification for one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub track_id: u32,
    pub title: String,
    pub confidence: f64,
    /// Position in the reference track aligned with the window start (seconds)
    pub start_time: f64,
    pub end_time: f64,
    pub window_index: u64,
    pub index_version: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Bucket {
    votes: u32,
    delta_sum: i64,
}

/// Window-level matcher; cheap to construct, holds only parameters
#[derive(Debug, Clone)]
pub struct MatchAggregator {
    drift_tolerance: i64,
    min_votes: u32,
    confidence_floor: f64,
    top_k: usize,
    frame_seconds: f64,
}

impl MatchAggregator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            drift_tolerance: config.drift_tolerance_frames.max(1),
            min_votes: config.min_votes,
            confidence_floor: config.confidence_floor,
            top_k: config.top_k,
            frame_seconds: config.frame_seconds(),
        }
    }

    /// Best bucket per track, ranked by votes desc then track id asc
    pub fn candidates(&self, hashes: &QueryHashSet, index: &FingerprintIndex) -> Vec<MatchCandidate> {
        let mut histogram: HashMap<u32, BTreeMap<i64, Bucket>> = HashMap::new();

        for landmark in hashes.iter() {
            for entry in index.lookup(landmark.hash) {
                let delta = landmark.offset as i64 - entry.track_offset as i64;
                let bucket = histogram
                    .entry(entry.track_id)
                    .or_default()
                    .entry(delta.div_euclid(self.drift_tolerance))
                    .or_default();
                bucket.votes += 1;
                bucket.delta_sum += delta;
            }
        }

        let total_hashes = hashes.len().max(1) as f64;
        let mut candidates: Vec<MatchCandidate> = histogram
            .into_iter()
            .filter_map(|(track_id, buckets)| {
                let track_votes = buckets.values().map(|b| b.votes).sum();
                // Buckets iterate in ascending order, so the lower bucket wins ties
                let best = buckets
                    .values()
                    .fold(None::<&Bucket>, |best, b| match best {
                        Some(cur) if cur.votes >= b.votes => Some(cur),
                        _ => Some(b),
                    })?;

                let mean_delta = best.delta_sum as f64 / best.votes as f64;
                let confidence = if best.votes < self.min_votes {
                    0.0
                } else {
                    (best.votes as f64 / total_hashes).clamp(0.0, 1.0)
                };

                Some(MatchCandidate {
                    track_id,
                    offset_delta: mean_delta.round() as i64,
                    mean_delta,
                    votes: best.votes,
                    track_votes,
                    confidence,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.votes.cmp(&a.votes).then(a.track_id.cmp(&b.track_id)));
        candidates
    }

    /// Promote candidates of one window to results
    pub fn aggregate(
        &self,
        window: &AudioWindow,
        hashes: &QueryHashSet,
        index: &FingerprintIndex,
    ) -> Vec<MatchResult> {
        let candidates = self.candidates(hashes, index);
        let generated_at = Utc::now();

        let results: Vec<MatchResult> = candidates
            .into_iter()
            .filter(|c| c.votes >= self.min_votes && c.has_majority())
            .filter(|c| c.confidence >= self.confidence_floor)
            .take(self.top_k)
            .filter_map(|c| {
                let Some(track) = index.track(c.track_id) else {
                    log::warn!("Track {} has postings but no catalogue entry", c.track_id);
                    return None;
                };
                let start_time = (-c.mean_delta * self.frame_seconds).max(0.0);
                Some(MatchResult {
                    track_id: c.track_id,
                    title: track.title.clone(),
                    confidence: c.confidence,
                    start_time,
                    end_time: start_time + window.duration_seconds(),
                    window_index: window.index,
                    index_version: index.version(),
                    generated_at,
                })
            })
            .collect();

        log::debug!(
            "Window {} of session {}: {} hashes, {} matches",
            window.index,
            window.session_id,
            hashes.len(),
            results.len()
        );
        results
    }
}
