//! voipscope-analyze - CLI tool to score the RTP streams of a capture
//!
//! Runs the stream report over a (usually per-call) capture and prints
//! loss, jitter, bitrate and an estimated MOS for every stream.

mod output;

use anyhow::{Context, Result};
use clap::Parser;
use output::OutputFormat;
use std::path::PathBuf;
use voipscope_core::{CallEngine, Config, Database};

#[derive(Parser)]
#[command(name = "voipscope-analyze")]
#[command(about = "Estimate RTP stream quality for a capture")]
#[command(version)]
struct Args {
    /// Capture to analyze
    capture: PathBuf,

    /// Codec label used for the MOS estimate (defaults to the configured codec)
    #[arg(long)]
    codec: Option<String>,

    /// Output format: text (default) or json
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard = voipscope_core::logging::init("voipscope-analyze", &config.logging)
        .context("failed to initialize logging")?;

    let db = Database::open(&Config::database_path()).context("failed to open database")?;
    let engine = CallEngine::open(&config, db).context("failed to start call engine")?;

    let codec = args
        .codec
        .unwrap_or_else(|| engine.settings().default_codec.clone());
    let stats = engine
        .analyze_rtp_with_codec(&args.capture, &codec)
        .with_context(|| format!("failed to analyze {}", args.capture.display()))?;

    if args.format == OutputFormat::Json {
        return output::print_json(&stats);
    }

    if stats.is_empty() {
        println!("No RTP streams found in {}.", args.capture.display());
        return Ok(());
    }

    println!("Capture: {} (codec {})\n", args.capture.display(), codec);
    print!("{}", output::stream_table(&stats));
    Ok(())
}
