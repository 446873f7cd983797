//! .tmidx file writer

use crate::format::IndexFile;
use anyhow::{Context, Result};
use crc::{Crc, CRC_64_ECMA_182};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub(crate) const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

pub struct IndexWriter {
    compression_level: Option<i32>,
}

impl IndexWriter {
    /// Writer producing zstd-compressed payloads
    pub fn new() -> Self {
        Self {
            compression_level: Some(3),
        }
    }

    /// Writer producing uncompressed payloads
    pub fn uncompressed() -> Self {
        Self {
            compression_level: None,
        }
    }

    /// Write .tmidx file
    ///
    /// The file is written next to `path` and renamed into place, so a
    /// concurrent reader sees either the old snapshot or the new one.
    pub fn write(&self, path: &Path, index_file: &IndexFile) -> Result<()> {
        let payload = bincode::serialize(&index_file.payload)
            .context("Failed to encode snapshot payload")?;

        let mut header = index_file.header.clone();
        header.payload_size = payload.len() as u64;
        header.checksum = CRC64.checksum(&payload);

        let stored = match self.compression_level {
            Some(level) => {
                let compressed = zstd::encode_all(&payload[..], level)
                    .context("Failed to compress snapshot payload")?;
                header.set_compressed(true);
                header.payload_size_compressed = compressed.len() as u64;
                compressed
            }
            None => {
                header.set_compressed(false);
                header.payload_size_compressed = 0;
                payload
            }
        };

        let tmp_path = path.with_extension("tmidx.partial");
        {
            let file = File::create(&tmp_path).with_context(|| {
                format!("Failed to create .tmidx file: {}", tmp_path.display())
            })?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&header.to_bytes())?;
            writer.write_all(&stored)?;
            writer.flush()?;
        }

        std::fs::rename(&tmp_path, path).with_context(|| {
            format!("Failed to move snapshot into place: {}", path.display())
        })?;

        Ok(())
    }
}

impl Default for IndexWriter {
    fn default() -> Self {
        Self::new()
    }
}
