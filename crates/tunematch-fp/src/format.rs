//! .tmidx snapshot format structures

use serde::{Deserialize, Serialize};

/// Magic bytes for .tmidx files: "TMIX"
pub const MAGIC: [u8; 4] = [0x54, 0x4D, 0x49, 0x58];

/// Current format version
pub const VERSION: u16 = 1;

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 56;

/// File header (56 bytes fixed size)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexHeader {
    /// Magic bytes: "TMIX"
    pub magic: [u8; 4],
    /// Format version
    pub format_version: u16,
    /// Flags (bit 0: compressed)
    pub flags: u16,
    /// Snapshot version assigned by the publisher
    pub index_version: u64,
    /// Number of reference tracks
    pub num_tracks: u32,
    /// Reserved
    pub reserved: u32,
    /// Number of postings
    pub num_postings: u64,
    /// Size of payload (uncompressed)
    pub payload_size: u64,
    /// Compressed payload size (0 if uncompressed)
    pub payload_size_compressed: u64,
    /// CRC64 of the uncompressed payload
    pub checksum: u64,
}

impl IndexHeader {
    pub fn new(index_version: u64, num_tracks: u32, num_postings: u64) -> Self {
        Self {
            magic: MAGIC,
            format_version: VERSION,
            flags: 0,
            index_version,
            num_tracks,
            reserved: 0,
            num_postings,
            payload_size: 0,
            payload_size_compressed: 0,
            checksum: 0,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & 0x1) != 0
    }

    pub fn set_compressed(&mut self, compressed: bool) {
        if compressed {
            self.flags |= 0x1;
        } else {
            self.flags &= !0x1;
        }
    }

    /// Size of the payload as stored on disk
    pub fn stored_payload_size(&self) -> u64 {
        if self.is_compressed() {
            self.payload_size_compressed
        } else {
            self.payload_size
        }
    }

    /// Encode as little-endian bytes
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic);
        buf[4..6].copy_from_slice(&self.format_version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.flags.to_le_bytes());
        buf[8..16].copy_from_slice(&self.index_version.to_le_bytes());
        buf[16..20].copy_from_slice(&self.num_tracks.to_le_bytes());
        buf[20..24].copy_from_slice(&self.reserved.to_le_bytes());
        buf[24..32].copy_from_slice(&self.num_postings.to_le_bytes());
        buf[32..40].copy_from_slice(&self.payload_size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.payload_size_compressed.to_le_bytes());
        buf[48..56].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    /// Decode from little-endian bytes
    pub fn from_bytes(buf: &[u8]) -> anyhow::Result<Self> {
        if buf.len() < HEADER_SIZE {
            anyhow::bail!(
                "Truncated .tmidx header: {} bytes (need {})",
                buf.len(),
                HEADER_SIZE
            );
        }

        let u16_at = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let u32_at = |at: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&buf[at..at + 4]);
            u32::from_le_bytes(b)
        };
        let u64_at = |at: usize| {
            let mut b = [0u8; 8];
            b.copy_from_slice(&buf[at..at + 8]);
            u64::from_le_bytes(b)
        };

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&buf[0..4]);

        Ok(Self {
            magic,
            format_version: u16_at(4),
            flags: u16_at(6),
            index_version: u64_at(8),
            num_tracks: u32_at(16),
            reserved: u32_at(20),
            num_postings: u64_at(24),
            payload_size: u64_at(32),
            payload_size_compressed: u64_at(40),
            checksum: u64_at(48),
        })
    }
}

/// Reference track described by a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackRecord {
    pub track_id: u32,
    pub title: String,
    pub duration_ms: u32,
    /// Path of the audio the track was fingerprinted from
    pub source_path: String,
}

/// One (hash, track, offset) posting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRecord {
    pub hash: u32,
    pub track_id: u32,
    /// Anchor frame within the reference track
    pub track_offset: u32,
}

/// Snapshot payload
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexPayload {
    /// Extraction parameters the postings were generated with (JSON)
    pub extraction_params: String,
    pub tracks: Vec<TrackRecord>,
    pub postings: Vec<PostingRecord>,
}

/// Complete .tmidx file structure
#[derive(Debug, Clone)]
pub struct IndexFile {
    pub header: IndexHeader,
    pub payload: IndexPayload,
}

impl IndexFile {
    pub fn new(index_version: u64, payload: IndexPayload) -> Self {
        let header = IndexHeader::new(
            index_version,
            payload.tracks.len() as u32,
            payload.postings.len() as u64,
        );
        Self { header, payload }
    }
}
