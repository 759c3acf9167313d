//! avformatinfo — print duration, tags and chapters of a media source for UI display.
//!
//! Writes `key=value` lines (or JSON with `--json`) to stdout; logs go to stderr. Exits
//! non-zero with the error kind (`OpenError`, `NoAudioStreamError`, ...) on failure.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use track_decode::{DecodeError, SourceRef, SymphoniaBackend, avformatinfo, probe};

#[derive(Parser, Debug)]
#[command(name = "avformatinfo", version)]
struct Args {
    /// Path or file:// URI of the source to probe
    source: String,

    /// Print the probe result as JSON instead of key=value lines
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("warn,avformatinfo=info,track_decode=info")
        }))
        .init();

    let source = SourceRef::parse(&args.source);
    let backend = SymphoniaBackend::new();
    let report = |e: DecodeError| {
        tracing::error!(source = %source, kind = %e.kind(), "probe failed");
        anyhow!("{}: {e}", e.kind())
    };

    if args.json {
        let result = probe(&backend, &source).map_err(report)?;
        let text = serde_json::to_string_pretty(&result).context("encode probe result")?;
        println!("{text}");
    } else {
        print!("{}", avformatinfo(&backend, &source).map_err(report)?);
    }
    Ok(())
}
