//! fpstream - Stream an audio file to a tunematch server
//!
//! Usage: fpstream <ws://host:port/ws> <audio_file>
//!
//! Prints every server event as one JSON line.

use anyhow::Result;
use clap::Parser;
use std::time::Duration;
use tunematch_cli::stream::{stream_samples, StreamOptions};
use tunematch_core::client::BackoffPolicy;

#[derive(Parser, Debug)]
#[command(name = "fpstream")]
#[command(about = "Stream an audio file to a tunematch server", long_about = None)]
struct Args {
    /// Server websocket URL
    url: String,

    /// Audio file to stream
    input_file: String,

    /// Sample rate expected by the server
    #[arg(long, default_value_t = 8000)]
    sample_rate: u32,

    /// Chunk length in milliseconds
    #[arg(long, default_value_t = 1000)]
    chunk_ms: u64,

    /// Send chunks in real time instead of as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Seconds of silence from the server before disconnecting
    #[arg(long, default_value_t = 3)]
    drain_secs: u64,

    /// Connection attempts before giving up
    #[arg(long, default_value_t = 8)]
    max_attempts: u32,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
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

    let audio = tunematch_core::audio::decode_audio(&args.input_file, args.sample_rate)?;
    log::info!(
        "Streaming {:.1}s of audio to {}",
        audio.duration_seconds(),
        args.url
    );

    let chunk = Duration::from_millis(args.chunk_ms.max(1));
    let mut options = StreamOptions::new(&args.url, args.sample_rate);
    options.chunk_samples = (args.sample_rate as u64 * chunk.as_millis() as u64 / 1000).max(1) as usize;
    options.pace = args.realtime.then_some(chunk);
    options.drain_timeout = Duration::from_secs(args.drain_secs);
    options.backoff = BackoffPolicy {
        max_attempts: args.max_attempts.max(1),
        ..BackoffPolicy::default()
    };

    let report = stream_samples(&audio.samples, &options, |event| match event.to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error serializing event: {}", e),
    })
    .await?;

    log::info!(
        "Done: {} chunks over {} sessions, {} events",
        report.chunks_sent,
        report.sessions,
        report.events
    );
    Ok(())
}
