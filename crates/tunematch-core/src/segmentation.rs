//! Cutting a finished clip into analysis windows
//!
//! Uses the same geometry as a live session: full windows every
//! `window_hop_seconds`, plus one final short window covering audio no
//! full window reached, if it is at least `min_window_seconds` long.

use crate::audio::AudioWindow;
use crate::config::EngineConfig;

/// Split a clip into overlapping windows
pub fn split_windows(samples: &[f32], config: &EngineConfig, session_id: u64) -> Vec<AudioWindow> {
    let window_len = config.window_samples();
    let hop = config.window_hop_samples();
    let min_len = config.min_window_samples();

    let mut windows = Vec::new();
    let mut start = 0usize;
    let mut covered = 0usize;

    while start + window_len <= samples.len() {
        windows.push(make_window(samples, start, window_len, config, session_id, windows.len()));
        covered = start + window_len;
        start += hop;
    }

    // Trailing audio past the last full window
    if samples.len() > covered && samples.len() - start >= min_len {
        let len = samples.len() - start;
        windows.push(make_window(samples, start, len, config, session_id, windows.len()));
    }

    windows
}

fn make_window(
    samples: &[f32],
    start: usize,
    len: usize,
    config: &EngineConfig,
    session_id: u64,
    index: usize,
) -> AudioWindow {
    AudioWindow {
        session_id,
        index: index as u64,
        start_sample: start as u64,
        sample_rate: config.sample_rate,
        samples: samples[start..start + len].to_vec(),
    }
}
