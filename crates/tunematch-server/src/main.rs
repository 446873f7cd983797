//! tunematch-server - streaming identification service
//!
//! Usage: tunematch-server [--config server.toml] [--listen ADDR] [--index FILE]

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tunematch_server::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "tunematch-server")]
#[command(about = "Identify live audio streams against a fingerprint index", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,

    /// Index snapshot file, overrides the config file
    #[arg(short, long)]
    index: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = args.listen {
        config.listen = listen;
    }
    if let Some(index) = args.index {
        config.index_path = index;
    }

    tunematch_server::serve(config).await
}
