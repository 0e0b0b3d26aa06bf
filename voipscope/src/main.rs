//! voipscope - SIP call flow and RTP quality inspector
//!
//! Queries the persisted call index: lists dialogs, shows one dialog with
//! its ladder, and exports a dialog into its own capture file.
//!
//! Run `voipscope-index` first to build the index from a capture.

mod output;
mod render;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use output::OutputFormat;
use std::path::PathBuf;
use voipscope_core::{CallEngine, Config, Database, DialogRecord, ExportOutcome};

#[derive(Parser)]
#[command(name = "voipscope")]
#[command(about = "Inspect SIP dialogs and export single calls")]
#[command(version)]
struct Args {
    /// Output format: text (default) or json
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List dialogs, most recent first
    Calls {
        /// Maximum number of dialogs to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Only show failed dialogs
        #[arg(long)]
        failed: bool,
    },
    /// Summary of the current index
    Summary,
    /// Show one dialog and its messages
    Show {
        /// Call-ID
        call_id: String,
    },
    /// Draw the ladder diagram of one dialog
    Ladder {
        /// Call-ID
        call_id: String,
    },
    /// Export one dialog's signaling and media into its own capture
    Export {
        /// Call-ID
        call_id: String,

        /// Source capture (defaults to the newest capture in the capture directory)
        #[arg(short, long)]
        capture: Option<PathBuf>,

        /// Also score the RTP streams of the exported capture
        #[arg(long)]
        analyze: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    Config::ensure_xdg_env();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging
    let _log_guard = voipscope_core::logging::init("voipscope", &config.logging)
        .context("failed to initialize logging")?;

    // Open database
    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;

    let engine = CallEngine::open(&config, db).context("failed to start call engine")?;

    match args.command {
        Command::Calls { limit, failed } => cmd_calls(&engine, args.format, limit, failed),
        Command::Summary => cmd_summary(&engine, args.format),
        Command::Show { call_id } => {
            let dialog = find_dialog(&engine, &call_id)?;
            match args.format {
                OutputFormat::Json => output::print_json(&dialog),
                OutputFormat::Text => {
                    print!("{}", render::dialog_detail(&dialog));
                    Ok(())
                }
            }
        }
        Command::Ladder { call_id } => {
            let dialog = find_dialog(&engine, &call_id)?;
            let steps = engine.build_ladder(&dialog);
            match args.format {
                OutputFormat::Json => output::print_json(&steps),
                OutputFormat::Text => {
                    println!("Call-ID: {}\n", dialog.dialog_id);
                    print!("{}", render::ladder_diagram(&steps));
                    Ok(())
                }
            }
        }
        Command::Export {
            call_id,
            capture,
            analyze,
        } => cmd_export(&engine, args.format, &call_id, capture, analyze),
    }
}

fn cmd_calls(engine: &CallEngine, format: OutputFormat, limit: usize, failed: bool) -> Result<()> {
    let index = engine.get_index();
    let dialogs: Vec<DialogRecord> = index
        .recent_dialogs(usize::MAX)
        .into_iter()
        .filter(|d| !failed || d.is_error())
        .take(limit)
        .cloned()
        .collect();

    if format == OutputFormat::Json {
        return output::print_json(&dialogs);
    }

    if index.dialogs.is_empty() {
        println!("No dialogs indexed.");
        println!("Run 'voipscope-index' first to index a capture.");
        return Ok(());
    }

    print!("{}", render::dialog_table(&dialogs));
    println!("\n{} of {} dialog(s)", dialogs.len(), index.dialogs.len());
    Ok(())
}

fn cmd_summary(engine: &CallEngine, format: OutputFormat) -> Result<()> {
    let summary = engine.summary();
    if format == OutputFormat::Json {
        return output::print_json(&summary);
    }

    let capture = if summary.source_capture.is_empty() {
        "-"
    } else {
        summary.source_capture.as_str()
    };
    println!("Capture:     {}", capture);
    println!("Built:       {}", summary.built_at.format("%Y-%m-%d %H:%M:%S UTC"));
    println!("Dialogs:     {}", summary.dialog_count);
    println!("Failed:      {}%", summary.failed_pct);
    println!("RTP streams: {}", summary.rtp_stream_count);
    Ok(())
}

fn find_dialog(engine: &CallEngine, call_id: &str) -> Result<DialogRecord> {
    engine
        .dialog(call_id)
        .with_context(|| format!("no dialog with Call-ID '{}' in the index", call_id))
}

fn cmd_export(
    engine: &CallEngine,
    format: OutputFormat,
    call_id: &str,
    capture: Option<PathBuf>,
    analyze: bool,
) -> Result<()> {
    find_dialog(engine, call_id)?;

    let capture = match capture {
        Some(path) => path,
        None => engine
            .latest_capture()
            .context("no capture given and none found in the capture directory")?,
    };

    let outcome = engine
        .export_call(&capture, call_id)
        .with_context(|| format!("failed to export '{}'", call_id))?;

    let stats = match (&outcome, analyze) {
        (ExportOutcome::Exported { path, .. }, true) => Some(
            engine
                .analyze_rtp(path)
                .context("failed to analyze exported capture")?,
        ),
        _ => None,
    };

    if format == OutputFormat::Json {
        return output::print_json(&serde_json::json!({
            "call_id": call_id,
            "outcome": outcome,
            "streams": stats,
        }));
    }

    match &outcome {
        ExportOutcome::Exported {
            path,
            included_streams,
            skipped_streams,
        } => {
            println!("Exported: {}", path.display());
            println!(
                "  RTP streams: {} included, {} skipped",
                included_streams, skipped_streams
            );
        }
        ExportOutcome::Failed { reason } => {
            anyhow::bail!("export of '{}' failed: {}", call_id, reason);
        }
    }

    if let Some(stats) = stats {
        println!();
        if stats.is_empty() {
            println!("No RTP streams found.");
        } else {
            print!("{}", output::stream_table(&stats));
        }
    }

    Ok(())
}
