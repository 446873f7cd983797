//! Error taxonomy for the matching engine
//!
//! Every variant except transport failures is recovered at the smallest
//! scope (one chunk or one window) and surfaced as an event.

use thiserror::Error;

/// Failures surfaced by the serving path
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed or undecodable audio chunk; the chunk is dropped
    #[error("invalid audio input: {0}")]
    Input(#[from] AudioError),

    /// No worker slot available; the session never starts
    #[error("server at capacity: {active} of {limit} sessions in use")]
    Capacity { active: usize, limit: usize },

    /// No index snapshot has been published yet
    #[error("fingerprint index unavailable")]
    IndexUnavailable,

    /// Unexpected fault while analysing a single window
    #[error("internal error in window {window_index}: {message}")]
    Internal { window_index: u64, message: String },
}

impl EngineError {
    /// Short machine-readable label, used in logs and status counters
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Input(_) => "input",
            EngineError::Capacity { .. } => "capacity",
            EngineError::IndexUnavailable => "index_unavailable",
            EngineError::Internal { .. } => "internal",
        }
    }
}

/// Errors raised while decoding inbound PCM
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AudioError {
    #[error("empty audio chunk")]
    Empty,
    #[error("PCM payload must contain an even number of bytes (got {0})")]
    OddPcmByteLength(usize),
    #[error("sample rate mismatch: got {got} Hz, expected {expected} Hz")]
    SampleRateMismatch { got: u32, expected: u32 },
}

/// Errors raised by the index read path
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("snapshot version {offered} does not supersede current version {current}")]
    StaleVersion { offered: u64, current: u64 },

    #[error("snapshot was built with incompatible extraction parameters: {0}")]
    IncompatibleParams(String),

    #[error(transparent)]
    Format(#[from] anyhow::Error),
}
