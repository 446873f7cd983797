//! Command line tools around the tunematch engine

pub mod output;
pub mod stream;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tunematch_core::audio::AudioFormat;
use tunematch_core::EngineConfig;

/// Engine settings from a TOML file, or the defaults
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config {}", path.display()))?
        }
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Expand the inputs into a sorted list of decodable audio files
///
/// Directories contribute their direct children; files are taken as given.
pub fn collect_audio_files(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        if input.is_dir() {
            let entries = std::fs::read_dir(input)
                .with_context(|| format!("Failed to read directory {}", input.display()))?;
            files.extend(
                entries
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .filter(|path| path.is_file() && AudioFormat::from_path(path).is_supported()),
            );
        } else if input.is_file() {
            files.push(input.clone());
        } else {
            anyhow::bail!("Input not found: {}", input.display());
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_audio_files_filters_directories() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.wav", "a.flac", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        let extra = dir.path().join("b.wav");

        let files = collect_audio_files(&[dir.path().to_path_buf(), extra]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["a.flac", "b.wav"]);

        assert!(collect_audio_files(&[dir.path().join("missing.wav")]).is_err());
    }

    #[test]
    fn test_engine_config_from_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "min_votes = 12\n").unwrap();

        let config = load_engine_config(Some(&path)).unwrap();
        assert_eq!(config.min_votes, 12);
        assert_eq!(config.sample_rate, 8000);
        assert_eq!(load_engine_config(None).unwrap(), EngineConfig::default());
    }
}
