//! Per-connection ingest state
//!
//! Buffers decoded PCM, cuts sliding windows and queues them for analysis.
//! Nothing here blocks: when audio or windows arrive faster than they are
//! consumed, the oldest data is dropped and counted.

use crate::audio::{decode_pcm_s16le, AudioWindow};
use crate::config::EngineConfig;
use crate::error::AudioError;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionPhase {
    Connecting,
    Streaming,
    Closed,
}

/// Buffering bounds for one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Upper bound on buffered, not yet windowed samples
    pub ring_buffer_samples: usize,
    /// Windows allowed to wait for analysis before the oldest is dropped
    pub max_pending_windows: usize,
}

impl SessionLimits {
    pub fn new(config: &EngineConfig, ring_buffer_seconds: f64, max_pending_windows: usize) -> Self {
        Self {
            ring_buffer_samples: config
                .seconds_to_samples(ring_buffer_seconds)
                .max(config.window_samples()),
            max_pending_windows: max_pending_windows.max(1),
        }
    }
}

/// Counters reported in status events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStats {
    pub samples_received: u64,
    pub windows_cut: u64,
    pub dropped_windows: u64,
    pub dropped_samples: u64,
    pub input_errors: u64,
}

/// Ring buffer, window cursor and pending queue of one session
#[derive(Debug)]
pub struct SessionState {
    session_id: u64,
    phase: SessionPhase,
    sample_rate: u32,
    window_len: usize,
    hop: usize,
    min_window_len: usize,
    limits: SessionLimits,
    /// Samples from `cursor` onwards
    buffer: VecDeque<f32>,
    /// Stream position of `buffer[0]`, which is also the next window start
    cursor: u64,
    /// Stream position just past the last window cut
    covered: u64,
    next_index: u64,
    pending: VecDeque<AudioWindow>,
    stats: SessionStats,
}

impl SessionState {
    pub fn new(session_id: u64, config: &EngineConfig, limits: SessionLimits) -> Self {
        Self {
            session_id,
            phase: SessionPhase::Connecting,
            sample_rate: config.sample_rate,
            window_len: config.window_samples(),
            hop: config.window_hop_samples(),
            min_window_len: config.min_window_samples(),
            limits,
            buffer: VecDeque::with_capacity(limits.ring_buffer_samples),
            cursor: 0,
            covered: 0,
            next_index: 0,
            pending: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    pub fn pending_windows(&self) -> usize {
        self.pending.len()
    }

    /// Admitted by the worker pool; audio may flow
    pub fn start(&mut self) {
        if self.phase == SessionPhase::Connecting {
            self.phase = SessionPhase::Streaming;
            log::debug!("Session {} streaming", self.session_id);
        }
    }

    /// Append one s16le chunk and cut every window that became complete
    ///
    /// Returns the number of windows cut. A malformed chunk is dropped and
    /// counted; the session carries on.
    pub fn push_chunk(&mut self, bytes: &[u8]) -> Result<usize, AudioError> {
        if self.phase != SessionPhase::Streaming {
            log::debug!(
                "Session {}: ignoring chunk in phase {:?}",
                self.session_id,
                self.phase
            );
            return Ok(0);
        }

        let samples = match decode_pcm_s16le(bytes) {
            Ok(samples) => samples,
            Err(e) => {
                self.note_input_error();
                return Err(e);
            }
        };
        Ok(self.push_samples(&samples))
    }

    /// Count an inbound message that carried no usable audio
    pub fn note_input_error(&mut self) {
        self.stats.input_errors += 1;
    }

    /// Append decoded samples; see [`push_chunk`](Self::push_chunk)
    pub fn push_samples(&mut self, samples: &[f32]) -> usize {
        if self.phase != SessionPhase::Streaming {
            return 0;
        }
        self.stats.samples_received += samples.len() as u64;
        self.buffer.extend(samples.iter().copied());

        let overflow = self.buffer.len().saturating_sub(self.limits.ring_buffer_samples);
        if overflow > 0 {
            self.buffer.drain(..overflow);
            self.cursor += overflow as u64;
            self.stats.dropped_samples += overflow as u64;
            log::warn!(
                "Session {}: ring buffer full, dropped {} samples",
                self.session_id,
                overflow
            );
        }

        let mut cut = 0;
        while self.buffer.len() >= self.window_len {
            let samples: Vec<f32> = self.buffer.iter().take(self.window_len).copied().collect();
            self.enqueue(samples);
            self.covered = self.cursor + self.window_len as u64;
            self.advance(self.hop);
            cut += 1;
        }
        cut
    }

    /// Stop intake; a trailing window of audio not yet analysed is queued
    /// if it reaches the minimum length
    pub fn close(&mut self) -> bool {
        if self.phase == SessionPhase::Closed {
            return false;
        }
        self.phase = SessionPhase::Closed;

        let end = self.cursor + self.buffer.len() as u64;
        let queued = end > self.covered && self.buffer.len() >= self.min_window_len;
        if queued {
            let samples: Vec<f32> = self.buffer.drain(..).collect();
            self.covered = end;
            self.enqueue(samples);
        } else if end > self.covered {
            log::debug!(
                "Session {}: discarding {} trailing samples",
                self.session_id,
                self.buffer.len()
            );
        }
        self.buffer.clear();
        queued
    }

    /// Oldest window awaiting analysis
    pub fn next_window(&mut self) -> Option<AudioWindow> {
        self.pending.pop_front()
    }

    fn enqueue(&mut self, samples: Vec<f32>) {
        let window = AudioWindow {
            session_id: self.session_id,
            index: self.next_index,
            start_sample: self.cursor,
            sample_rate: self.sample_rate,
            samples,
        };
        self.next_index += 1;
        self.stats.windows_cut += 1;

        if self.pending.len() >= self.limits.max_pending_windows {
            if let Some(dropped) = self.pending.pop_front() {
                self.stats.dropped_windows += 1;
                log::debug!(
                    "Session {}: backlog full, dropped window {}",
                    self.session_id,
                    dropped.index
                );
            }
        }
        self.pending.push_back(window);
    }

    fn advance(&mut self, n: usize) {
        let n = n.min(self.buffer.len());
        self.buffer.drain(..n);
        self.cursor += n as u64;
    }
}
