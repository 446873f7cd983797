//! Versioned fingerprint index and the handle that publishes it
//!
//! A [`FingerprintIndex`] is immutable once built. Readers take an `Arc`
//! snapshot from the [`IndexHandle`] and keep it for the whole query, so a
//! concurrent publish never exposes a half-updated index.

use crate::config::{EngineConfig, ExtractionParams};
use crate::error::IndexError;
use crate::fingerprint::Landmark;
use arc_swap::ArcSwapOption;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tunematch_fp::{IndexFile, IndexPayload, IndexReader, IndexWriter, PostingRecord, TrackRecord};

/// One posting: where a hash occurs in a reference track
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FingerprintEntry {
    pub hash: u32,
    pub track_id: u32,
    /// Anchor frame within the reference track
    pub track_offset: u32,
}

/// Catalogue entry for a reference track
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_id: u32,
    pub title: String,
    pub duration_ms: u32,
    pub source_path: String,
}

/// Immutable snapshot: hash -> bounded posting list
#[derive(Debug)]
pub struct FingerprintIndex {
    version: u64,
    postings: HashMap<u32, Vec<FingerprintEntry>>,
    tracks: BTreeMap<u32, TrackInfo>,
    params: ExtractionParams,
}

impl FingerprintIndex {
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Postings for a hash, empty when the hash is unknown
    pub fn lookup(&self, hash: u32) -> &[FingerprintEntry] {
        self.postings.get(&hash).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn track(&self, track_id: u32) -> Option<&TrackInfo> {
        self.tracks.get(&track_id)
    }

    pub fn tracks(&self) -> impl Iterator<Item = &TrackInfo> {
        self.tracks.values()
    }

    pub fn num_tracks(&self) -> usize {
        self.tracks.len()
    }

    pub fn num_hashes(&self) -> usize {
        self.postings.len()
    }

    pub fn num_postings(&self) -> usize {
        self.postings.values().map(Vec::len).sum()
    }

    pub fn extraction_params(&self) -> &ExtractionParams {
        &self.params
    }

    /// Rebuild from a decoded snapshot file, refusing snapshots whose
    /// hashes were produced with different extraction parameters
    pub fn from_file(file: IndexFile, config: &EngineConfig) -> Result<Self, IndexError> {
        let params: ExtractionParams = serde_json::from_str(&file.payload.extraction_params)
            .map_err(|e| IndexError::IncompatibleParams(format!("unreadable parameters: {}", e)))?;
        let expected = config.extraction_params();
        if params != expected {
            return Err(IndexError::IncompatibleParams(format!(
                "snapshot {:?}, engine {:?}",
                params, expected
            )));
        }

        let mut builder = IndexBuilder::new(config);
        for track in file.payload.tracks {
            builder.insert_track(TrackInfo {
                track_id: track.track_id,
                title: track.title,
                duration_ms: track.duration_ms,
                source_path: track.source_path,
            });
        }
        for posting in file.payload.postings {
            builder.insert_posting(FingerprintEntry {
                hash: posting.hash,
                track_id: posting.track_id,
                track_offset: posting.track_offset,
            });
        }

        Ok(builder.build(file.header.index_version))
    }

    /// Snapshot file representation, postings ordered by (hash, track, offset)
    pub fn to_file(&self) -> Result<IndexFile, IndexError> {
        let extraction_params =
            serde_json::to_string(&self.params).map_err(|e| IndexError::Format(e.into()))?;

        let tracks = self
            .tracks
            .values()
            .map(|t| TrackRecord {
                track_id: t.track_id,
                title: t.title.clone(),
                duration_ms: t.duration_ms,
                source_path: t.source_path.clone(),
            })
            .collect();

        let mut postings: Vec<PostingRecord> = self
            .postings
            .values()
            .flatten()
            .map(|e| PostingRecord {
                hash: e.hash,
                track_id: e.track_id,
                track_offset: e.track_offset,
            })
            .collect();
        postings.sort_unstable_by_key(|p| (p.hash, p.track_id, p.track_offset));

        Ok(IndexFile::new(
            self.version,
            IndexPayload {
                extraction_params,
                tracks,
                postings,
            },
        ))
    }

    /// Load and validate a `.tmidx` snapshot
    pub fn load(path: &Path, config: &EngineConfig) -> Result<Self, IndexError> {
        let file = IndexReader::read(path)?;
        Self::from_file(file, config)
    }

    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        IndexWriter::new().write(path, &self.to_file()?)?;
        Ok(())
    }
}

/// Accumulates tracks and postings into a [`FingerprintIndex`]
pub struct IndexBuilder {
    params: ExtractionParams,
    max_postings_per_hash: usize,
    postings: HashMap<u32, Vec<FingerprintEntry>>,
    tracks: BTreeMap<u32, TrackInfo>,
}

impl IndexBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            params: config.extraction_params(),
            max_postings_per_hash: config.max_postings_per_hash,
            postings: HashMap::new(),
            tracks: BTreeMap::new(),
        }
    }

    /// Register a track and its landmarks (offsets relative to the track start)
    pub fn add_track(&mut self, info: TrackInfo, landmarks: &[Landmark]) {
        let track_id = info.track_id;
        self.insert_track(info);
        for landmark in landmarks {
            self.insert_posting(FingerprintEntry {
                hash: landmark.hash,
                track_id,
                track_offset: landmark.offset,
            });
        }
    }

    pub fn insert_track(&mut self, info: TrackInfo) {
        self.tracks.insert(info.track_id, info);
    }

    pub fn insert_posting(&mut self, entry: FingerprintEntry) {
        self.postings.entry(entry.hash).or_default().push(entry);
    }

    /// Finish the snapshot; over-long posting lists keep their lowest
    /// (track_id, track_offset) entries
    pub fn build(mut self, version: u64) -> FingerprintIndex {
        let mut truncated = 0usize;
        for list in self.postings.values_mut() {
            list.sort_unstable_by_key(|e| (e.track_id, e.track_offset));
            list.dedup();
            if list.len() > self.max_postings_per_hash {
                truncated += list.len() - self.max_postings_per_hash;
                list.truncate(self.max_postings_per_hash);
            }
        }
        if truncated > 0 {
            log::debug!("Index v{}: truncated {} postings over the per-hash cap", version, truncated);
        }

        FingerprintIndex {
            version,
            postings: self.postings,
            tracks: self.tracks,
            params: self.params,
        }
    }
}

/// Atomically swappable pointer to the current snapshot
#[derive(Default)]
pub struct IndexHandle {
    current: ArcSwapOption<FingerprintIndex>,
}

impl IndexHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(index: FingerprintIndex) -> Self {
        let handle = Self::new();
        handle.current.store(Some(Arc::new(index)));
        handle
    }

    /// Current snapshot, held by the caller for the duration of a query
    pub fn snapshot(&self) -> Option<Arc<FingerprintIndex>> {
        self.current.load_full()
    }

    pub fn current_version(&self) -> Option<u64> {
        self.snapshot().map(|index| index.version())
    }

    /// Swap in a newer snapshot; versions must strictly increase
    pub fn publish(&self, index: FingerprintIndex) -> Result<u64, IndexError> {
        let offered = index.version();
        let new = Some(Arc::new(index));
        let previous = self.current.rcu(|current| match current {
            Some(cur) if cur.version() >= offered => current.clone(),
            _ => new.clone(),
        });

        match previous {
            Some(prev) if prev.version() >= offered => Err(IndexError::StaleVersion {
                offered,
                current: prev.version(),
            }),
            _ => {
                log::info!("Published fingerprint index v{}", offered);
                Ok(offered)
            }
        }
    }

    /// Load a snapshot file and publish it
    pub fn load_file(&self, path: &Path, config: &EngineConfig) -> Result<u64, IndexError> {
        self.publish(FingerprintIndex::load(path, config)?)
    }
}
