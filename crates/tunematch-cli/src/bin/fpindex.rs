//! fpindex - Build a fingerprint index snapshot from reference tracks
//!
//! Usage: fpindex <output.tmidx> <audio files or directories...>

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use tunematch_cli::{collect_audio_files, load_engine_config};
use tunematch_core::{fingerprint_file, IndexBuilder, Landmark, TrackInfo};
use tunematch_fp::IndexReader;

#[derive(Parser, Debug)]
#[command(name = "fpindex")]
#[command(about = "Build a tunematch index snapshot from audio files", long_about = None)]
struct Args {
    /// Output snapshot file
    output: PathBuf,

    /// Reference audio files or directories containing them
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Snapshot version (default: one past the existing output file)
    #[arg(long)]
    version: Option<u64>,

    /// Engine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Default: no logs (clean JSON output for parsing)
    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    run_fpindex(&args)
}

fn run_fpindex(args: &Args) -> Result<()> {
    let config = load_engine_config(args.config.as_deref())?;
    let files = collect_audio_files(&args.inputs)?;
    if files.is_empty() {
        anyhow::bail!("No audio files found");
    }

    let version = match args.version {
        Some(version) => version,
        None => next_version(&args.output),
    };

    log::info!("Fingerprinting {} files in parallel...", files.len());
    let start = std::time::Instant::now();

    let fingerprinted: Vec<(TrackInfo, Vec<Landmark>)> = files
        .par_iter()
        .enumerate()
        .filter_map(|(i, path)| match fingerprint_track(path, i as u32 + 1, &config) {
            Ok(track) => Some(track),
            Err(e) => {
                log::warn!("Skipping {}: {:#}", path.display(), e);
                None
            }
        })
        .collect();

    if fingerprinted.is_empty() {
        anyhow::bail!("None of the {} input files could be decoded", files.len());
    }

    let mut builder = IndexBuilder::new(&config);
    let mut total_landmarks = 0;
    for (info, landmarks) in &fingerprinted {
        total_landmarks += landmarks.len();
        builder.add_track(info.clone(), landmarks);
    }
    let index = builder.build(version);
    index
        .save(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    let elapsed = start.elapsed();
    log::info!(
        "Indexed {} tracks, {} landmarks in {:.2}s",
        index.num_tracks(),
        total_landmarks,
        elapsed.as_secs_f64()
    );

    let result = serde_json::json!({
        "status": "success",
        "output_file": args.output.display().to_string(),
        "index_version": version,
        "num_tracks": index.num_tracks(),
        "num_hashes": index.num_hashes(),
        "num_postings": index.num_postings(),
        "skipped_files": files.len() - fingerprinted.len(),
        "processing_time_seconds": elapsed.as_secs_f64(),
    });
    println!("{}", serde_json::to_string_pretty(&result)?);

    Ok(())
}

fn fingerprint_track(
    path: &Path,
    track_id: u32,
    config: &tunematch_core::EngineConfig,
) -> Result<(TrackInfo, Vec<Landmark>)> {
    let path_str = path
        .to_str()
        .with_context(|| format!("Non UTF-8 path: {}", path.display()))?;
    let (audio, landmarks) = fingerprint_file(path_str, config)?;

    let title = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(path_str)
        .to_string();
    log::debug!("{}: {} landmarks", title, landmarks.len());

    let info = TrackInfo {
        track_id,
        title,
        duration_ms: audio.duration_ms,
        source_path: path_str.to_string(),
    };
    Ok((info, landmarks))
}

/// One past the version stored in an existing snapshot, or 1
fn next_version(output: &Path) -> u64 {
    match IndexReader::read_header(output) {
        Ok(header) => header.index_version + 1,
        Err(_) => 1,
    }
}
