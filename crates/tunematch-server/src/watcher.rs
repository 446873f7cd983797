//! Picks up newer index snapshots from disk

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tunematch_core::{EngineConfig, IndexError, IndexHandle};
use tunematch_fp::IndexReader;

/// Polls the snapshot file and publishes it when its version moves ahead
pub struct IndexWatcher {
    path: PathBuf,
    handle: Arc<IndexHandle>,
    config: EngineConfig,
}

impl IndexWatcher {
    pub fn new(path: PathBuf, handle: Arc<IndexHandle>, config: EngineConfig) -> Self {
        Self { path, handle, config }
    }

    /// Publish the file if it holds a newer snapshot
    ///
    /// Returns the new version, or `None` if nothing changed. Only the header
    /// is read unless the version is ahead.
    pub fn check_once(&self) -> Result<Option<u64>, IndexError> {
        let header = IndexReader::read_header(&self.path)?;
        if let Some(current) = self.handle.current_version() {
            if header.index_version <= current {
                return Ok(None);
            }
        }

        log::info!(
            "Loading index v{} from {} ({} tracks, {} postings)",
            header.index_version,
            self.path.display(),
            header.num_tracks,
            header.num_postings
        );
        self.handle.load_file(&self.path, &self.config).map(Some)
    }

    /// Poll forever; failures are logged and the current snapshot stays
    pub async fn run(self: Arc<Self>, period: Duration) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let watcher = self.clone();
            match tokio::task::spawn_blocking(move || watcher.check_once()).await {
                Ok(Ok(Some(version))) => log::info!("Index v{} is now live", version),
                Ok(Ok(None)) => log::trace!("Index unchanged"),
                Ok(Err(e)) => log::warn!("Index reload from {} failed: {}", self.path.display(), e),
                Err(e) => log::error!("Index reload task failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tunematch_core::{Extractor, IndexBuilder, TrackInfo};

    fn write_snapshot(path: &std::path::Path, version: u64, config: &EngineConfig) {
        let extractor = Extractor::new(config);
        let samples = tunematch_core::synth::melody(version, 10.0, config.sample_rate);
        let mut builder = IndexBuilder::new(config);
        builder.add_track(
            TrackInfo {
                track_id: version as u32,
                title: format!("v{}", version),
                duration_ms: 10_000,
                source_path: String::new(),
            },
            &extractor.fingerprint_track(&samples),
        );
        builder.build(version).save(path).unwrap();
    }

    #[test]
    fn test_newer_snapshot_is_published_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.tmidx");
        let config = EngineConfig::default();
        let handle = Arc::new(IndexHandle::new());
        let watcher = IndexWatcher::new(path.clone(), handle.clone(), config.clone());

        write_snapshot(&path, 1, &config);
        assert_eq!(watcher.check_once().unwrap(), Some(1));
        assert_eq!(watcher.check_once().unwrap(), None);

        write_snapshot(&path, 3, &config);
        assert_eq!(watcher.check_once().unwrap(), Some(3));
        assert_eq!(handle.current_version(), Some(3));
    }

    #[test]
    fn test_older_snapshot_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corpus.tmidx");
        let config = EngineConfig::default();
        let handle = Arc::new(IndexHandle::new());
        let watcher = IndexWatcher::new(path.clone(), handle.clone(), config.clone());

        write_snapshot(&path, 5, &config);
        watcher.check_once().unwrap();
        write_snapshot(&path, 2, &config);
        assert_eq!(watcher.check_once().unwrap(), None);
        assert_eq!(handle.current_version(), Some(5));
    }

    #[test]
    fn test_missing_file_keeps_current_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let handle = Arc::new(IndexHandle::new());
        let watcher = IndexWatcher::new(
            dir.path().join("absent.tmidx"),
            handle.clone(),
            EngineConfig::default(),
        );
        assert!(watcher.check_once().is_err());
        assert_eq!(handle.current_version(), None);
    }
}
