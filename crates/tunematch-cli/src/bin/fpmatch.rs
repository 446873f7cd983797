//! fpmatch - Identify an audio clip against an index snapshot
//!
//! Usage: fpmatch <index.tmidx> <query_audio>

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tunematch_cli::load_engine_config;
use tunematch_cli::output::{print_json, MatchOutput};
use tunematch_core::{duration_bucket, identify_clip, CacheKey, FingerprintIndex};

#[derive(Parser, Debug)]
#[command(name = "fpmatch")]
#[command(about = "Identify an audio clip against a tunematch index", long_about = None)]
struct Args {
    /// Index snapshot file
    index: PathBuf,

    /// Query audio file (.wav, .mp3, .flac, .ogg)
    query: String,

    /// Engine configuration (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Duration bucket width for the cache key, in seconds
    #[arg(long, default_value_t = 5.0)]
    bucket_secs: f64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Info)
            .init();
    } else {
        env_logger::Builder::from_default_env()
            .filter_level(log::LevelFilter::Off)
            .init();
    }

    let config = load_engine_config(args.config.as_deref())?;

    let load_start = std::time::Instant::now();
    let index = FingerprintIndex::load(&args.index, &config)
        .with_context(|| format!("Failed to load index {}", args.index.display()))?;
    log::info!(
        "Loaded index v{}: {} tracks, {} postings in {:.2}s",
        index.version(),
        index.num_tracks(),
        index.num_postings(),
        load_start.elapsed().as_secs_f64()
    );

    let audio = tunematch_core::audio::decode_audio(&args.query, config.sample_rate)?;
    log::info!(
        "Decoded query: {:.1}s, {} samples @ {}Hz",
        audio.duration_seconds(),
        audio.samples.len(),
        audio.sample_rate
    );

    let report = identify_clip(&audio.samples, &config, &index);
    let bucket = duration_bucket(report.duration_secs, args.bucket_secs);
    let key = CacheKey::derive(&report.summary, config.sample_rate, bucket);
    log::info!("{} windows, {} matches", report.windows, report.matches.len());

    print_json(&MatchOutput::new(&args.query, report, key));
    Ok(())
}
