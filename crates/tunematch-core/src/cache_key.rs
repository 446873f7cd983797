//! Deterministic cache keys for clip identification
//!
//! Pure: no I/O and no clock. Two requests share a key only when they
//! carry the same fingerprint summary, sample rate and duration bucket.

use crate::fingerprint::QueryHashSet;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

const DOMAIN: &[u8] = b"tunematch-cache-key/v1";
const KEY_BYTES: usize = 16;

/// 32 lowercase hex chars: the first 16 bytes of a SHA-256 digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(summary: &FingerprintSummary, sample_rate: u32, duration_bucket: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((DOMAIN.len() as u32).to_le_bytes());
        hasher.update(DOMAIN);
        hasher.update(sample_rate.to_le_bytes());
        hasher.update(duration_bucket.to_le_bytes());
        hasher.update((summary.0.len() as u64).to_le_bytes());
        hasher.update(&summary.0);

        let digest = hasher.finalize();
        Self(hex::encode(&digest[..KEY_BYTES]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical byte summary of a clip's fingerprint
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FingerprintSummary(Vec<u8>);

impl FingerprintSummary {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_hex(text: &str) -> Result<Self, hex::FromHexError> {
        hex::decode(text.trim()).map(Self)
    }

    /// `(offset, hash)` pairs as little-endian u32s, in the set's order
    pub fn from_hashes(hashes: &QueryHashSet) -> Self {
        let mut bytes = Vec::with_capacity(hashes.len() * 8);
        for landmark in hashes.iter() {
            bytes.extend_from_slice(&landmark.offset.to_le_bytes());
            bytes.extend_from_slice(&landmark.hash.to_le_bytes());
        }
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

/// Bucket index of a duration; non-finite or negative durations fall in bucket 0
pub fn duration_bucket(duration_secs: f64, bucket_secs: f64) -> u32 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 || bucket_secs <= 0.0 {
        return 0;
    }
    (duration_secs / bucket_secs).floor().min(u32::MAX as f64) as u32
}
