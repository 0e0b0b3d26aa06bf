//! voipscope-index - CLI tool to build the call index from a capture
//!
//! Extracts the SIP dialogs and RTP stream list of one capture file and
//! publishes them as the current index.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/voipscope/index.db (~/.local/share/voipscope/index.db)
//! - Logs: $XDG_STATE_HOME/voipscope/voipscope.<date>.log (~/.local/state/voipscope/)
//! - Config: $XDG_CONFIG_HOME/voipscope/config.toml (~/.config/voipscope/config.toml)

mod process_lock;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use process_lock::acquire_index_guard;
use std::path::PathBuf;
use std::time::Duration;
use voipscope_core::{CallEngine, CallIndex, Config, Database};

#[derive(Parser)]
#[command(name = "voipscope-index")]
#[command(about = "Build the call index from a packet capture")]
#[command(version)]
struct Args {
    /// Capture to index (defaults to the newest capture in the capture directory)
    #[arg(short, long)]
    capture: Option<PathBuf>,

    /// Mask user parts of From/To identities
    #[arg(long)]
    privacy_mask: bool,

    /// Verbose output (-v lists indexed dialogs)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Dry run - resolve the capture but don't index it
    #[arg(long)]
    dry_run: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard = voipscope_core::logging::init("voipscope-index", &config.logging)
        .context("failed to initialize logging")?;

    tracing::info!("voipscope-index starting");

    // Resolve database path and enforce process-level exclusivity for it.
    let db_path = Config::database_path();
    let _index_guard = acquire_index_guard(&db_path).context("failed to acquire process lock")?;

    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    println!("Database: {}", db_path.display());

    let engine = CallEngine::open(&config, db).context("failed to start call engine")?;

    let capture = match args.capture {
        Some(path) => path,
        None => engine.latest_capture().with_context(|| {
            format!(
                "no capture given and none found in {}",
                engine.settings().capture_dir().display()
            )
        })?,
    };
    println!("Capture:  {}", capture.display());

    if args.dry_run {
        println!("\nDry run - no index built");
        tracing::info!("Dry run complete");
        return Ok(());
    }

    let privacy_mask = args.privacy_mask || config.engine.privacy_mask_user;

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} [{elapsed}]")
            .context("invalid progress template")?,
    );
    pb.set_message("Extracting SIP dialogs and RTP streams...");
    pb.enable_steady_tick(Duration::from_millis(100));

    let result = engine.rebuild_index(&capture, privacy_mask);
    pb.finish_and_clear();
    let index = result.context("index rebuild failed")?;

    print_index_result(&index, args.verbose);

    tracing::info!(
        dialogs = index.dialogs.len(),
        rtp_streams = index.rtp_stream_count,
        "voipscope-index complete"
    );

    Ok(())
}

/// Print index summary
fn print_index_result(index: &CallIndex, verbose: u8) {
    let summary = index.summary();

    println!("\nIndex complete:");
    println!("  Dialogs:       {}", summary.dialog_count);
    println!("  Failed:        {}%", summary.failed_pct);
    println!("  RTP streams:   {}", summary.rtp_stream_count);
    println!(
        "  Privacy mask:  {}",
        if index.privacy_masked { "on" } else { "off" }
    );
    if let Some(digest) = &index.source_digest {
        println!("  SHA-256:       {}", digest);
    }

    // -v: list dialogs
    if verbose >= 1 && !index.dialogs.is_empty() {
        println!("\nDialogs:");
        for dialog in index.dialogs.values() {
            println!(
                "  {}  {}  {} message(s)",
                dialog.dialog_id,
                dialog.state.display_name(),
                dialog.messages.len()
            );
        }
    }
}
