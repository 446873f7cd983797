//! .tmidx file reader

use crate::format::{IndexFile, IndexHeader, IndexPayload, HEADER_SIZE, MAGIC, VERSION};
use crate::writer::CRC64;
use anyhow::{Context, Result};
use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

pub struct IndexReader;

impl IndexReader {
    /// Read .tmidx file
    pub fn read(path: &Path) -> Result<IndexFile> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open .tmidx file: {}", path.display()))?;

        // SAFETY: snapshots are published by rename and never modified in place.
        let mmap = unsafe { Mmap::map(&file) }
            .with_context(|| format!("Failed to map .tmidx file: {}", path.display()))?;

        Self::from_bytes(&mmap)
    }

    /// Read only the header, e.g. to check whether a newer version exists
    pub fn read_header(path: &Path) -> Result<IndexHeader> {
        use std::io::Read;

        let mut file = File::open(path)
            .with_context(|| format!("Failed to open .tmidx file: {}", path.display()))?;
        let mut buf = [0u8; HEADER_SIZE];
        file.read_exact(&mut buf)?;

        let header = IndexHeader::from_bytes(&buf)?;
        Self::validate_header(&header)?;
        Ok(header)
    }

    /// Decode a complete snapshot from memory
    pub fn from_bytes(bytes: &[u8]) -> Result<IndexFile> {
        let header = IndexHeader::from_bytes(bytes)?;
        Self::validate_header(&header)?;

        let stored_len = header.stored_payload_size() as usize;
        let body = &bytes[HEADER_SIZE..];
        if body.len() < stored_len {
            anyhow::bail!(
                "Truncated .tmidx payload: {} bytes (header says {})",
                body.len(),
                stored_len
            );
        }
        let stored = &body[..stored_len];

        let decompressed;
        let payload_bytes: &[u8] = if header.is_compressed() {
            decompressed = zstd::decode_all(stored).context("Failed to decompress payload")?;
            &decompressed
        } else {
            stored
        };

        if payload_bytes.len() as u64 != header.payload_size {
            anyhow::bail!(
                "Payload size mismatch: {} bytes (header says {})",
                payload_bytes.len(),
                header.payload_size
            );
        }

        let checksum = CRC64.checksum(payload_bytes);
        if checksum != header.checksum {
            anyhow::bail!(
                "Invalid .tmidx file: checksum mismatch ({:016x} != {:016x})",
                checksum,
                header.checksum
            );
        }

        let payload: IndexPayload =
            bincode::deserialize(payload_bytes).context("Failed to decode snapshot payload")?;

        if payload.tracks.len() as u32 != header.num_tracks
            || payload.postings.len() as u64 != header.num_postings
        {
            anyhow::bail!("Invalid .tmidx file: record counts disagree with header");
        }

        Ok(IndexFile { header, payload })
    }

    fn validate_header(header: &IndexHeader) -> Result<()> {
        if header.magic != MAGIC {
            anyhow::bail!("Invalid .tmidx file: magic bytes mismatch");
        }
        if header.format_version != VERSION {
            anyhow::bail!(
                "Unsupported .tmidx format version {} (expected {})",
                header.format_version,
                VERSION
            );
        }
        Ok(())
    }
}
