//! # voipscope-core
//!
//! Core library for voipscope - a SIP call flow and RTP quality inspector.
//!
//! This library provides:
//! - Domain types for dialogs, media descriptors, and stream quality
//! - Field extraction through `tshark`
//! - Call index construction with optional user masking
//! - Per-call capture export and RTP quality scoring
//! - Database storage layer with SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three layers:
//! - **Layer 0 (Raw):** Capture files on disk (immutable)
//! - **Layer 1 (Index):** Dialog records built from the SIP fields of one capture
//! - **Layer 2 (Derived):** Per-call captures, quality scores, ladders (on demand)
//!
//! ## Example
//!
//! ```rust,no_run
//! use voipscope_core::{CallEngine, Config, Database};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open database and engine
//! let db = Database::open(&Config::database_path()).expect("failed to open database");
//! let engine = CallEngine::open(&config, db).expect("failed to start engine");
//!
//! for dialog in engine.list_dialogs(20) {
//!     println!("{} {}", dialog.dialog_id, dialog.state);
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::Database;
pub use engine::CallEngine;
pub use error::{Error, Result};
pub use export::{ExportFailure, ExportOutcome};
pub use types::*;

// Public modules
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod export;
pub mod extract;
pub mod format;
pub mod index;
pub mod ladder;
pub mod logging;
pub mod media;
pub mod quality;
pub mod types;
