//! Call engine facade
//!
//! [`CallEngine`] is the single entry point front-ends use. It owns the
//! index store and the external-tool adapters, and wires the components
//! together per request.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use voipscope_core::{CallEngine, Config, Database};
//!
//! let config = Config::load()?;
//! let engine = CallEngine::open(&config, Database::open(&Config::database_path())?)?;
//!
//! let capture = engine.latest_capture()?;
//! let index = engine.rebuild_index(&capture, config.engine.privacy_mask_user)?;
//! println!("{} dialogs", index.dialogs.len());
//! ```

use crate::config::{Config, EngineConfig};
use crate::db::Database;
use crate::error::{Error, Result};
use crate::export::{export_path, CaptureExporter, ExportOutcome, PacketTools, TsharkTools};
use crate::extract::{FieldExtractor, TsharkExtractor};
use crate::index::{index_capture, IndexStore};
use crate::ladder;
use crate::quality::{CodecClass, RtpQualityAnalyzer};
use crate::types::{CallIndex, DialogRecord, IndexSummary, LadderStep, RtpStreamStats};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

/// Capture file extensions considered by [`CallEngine::latest_capture`].
pub const CAPTURE_EXTENSIONS: &[&str] = &["pcapng", "pcap"];

/// Correlates SIP dialogs with their media and scores call quality.
pub struct CallEngine {
    store: IndexStore,
    extractor: Box<dyn FieldExtractor>,
    tools: Box<dyn PacketTools>,
    settings: EngineConfig,
}

impl CallEngine {
    /// Create an engine using `tshark`/`mergecap`, backed by `db`.
    pub fn open(config: &Config, db: Database) -> Result<Self> {
        Ok(Self::with_parts(
            IndexStore::open(db)?,
            Box::new(TsharkExtractor::new(&config.tools)?),
            Box::new(TsharkTools::new(&config.tools)?),
            config.engine.clone(),
        ))
    }

    /// Create an engine from explicit parts.
    pub fn with_parts(
        store: IndexStore,
        extractor: Box<dyn FieldExtractor>,
        tools: Box<dyn PacketTools>,
        settings: EngineConfig,
    ) -> Self {
        Self {
            store,
            extractor,
            tools,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.settings
    }

    // ============================================
    // Index
    // ============================================

    /// Rebuild the index from `capture` and publish it.
    ///
    /// Rebuilds are serialized; the published snapshot is replaced whole.
    pub fn rebuild_index(&self, capture: &Path, privacy_mask: bool) -> Result<Arc<CallIndex>> {
        let rebuild_id = uuid::Uuid::new_v4();
        tracing::info!(
            %rebuild_id,
            capture = %capture.display(),
            privacy_mask,
            "Rebuilding call index"
        );

        let started = std::time::Instant::now();
        let index = self
            .store
            .rebuild_with(|| index_capture(capture, privacy_mask, self.extractor.as_ref()))?;

        tracing::info!(
            %rebuild_id,
            generation = self.store.generation(),
            dialogs = index.dialogs.len(),
            rtp_streams = index.rtp_stream_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Call index rebuilt"
        );
        Ok(index)
    }

    /// The last published snapshot.
    pub fn get_index(&self) -> Arc<CallIndex> {
        self.store.snapshot()
    }

    /// A dialog from the current snapshot.
    pub fn dialog(&self, dialog_id: &str) -> Option<DialogRecord> {
        self.store.snapshot().dialog(dialog_id).cloned()
    }

    /// Most recently active dialogs first.
    pub fn list_dialogs(&self, limit: usize) -> Vec<DialogRecord> {
        self.store
            .snapshot()
            .recent_dialogs(limit)
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> IndexSummary {
        self.store.snapshot().summary()
    }

    /// Newest capture file in the configured capture directory.
    pub fn latest_capture(&self) -> Result<PathBuf> {
        latest_capture_in(&self.settings.capture_dir())
    }

    // ============================================
    // Per-call operations
    // ============================================

    /// Where [`Self::export_call`] writes a dialog's capture.
    pub fn export_path(&self, dialog_id: &str) -> PathBuf {
        export_path(&self.settings.export_dir(), dialog_id)
    }

    /// Export one dialog's SIP and RTP from `capture`.
    ///
    /// Returns [`Error::DialogNotFound`] if the dialog is not in the current
    /// snapshot.
    pub fn export_call(&self, capture: &Path, dialog_id: &str) -> Result<ExportOutcome> {
        if self.store.snapshot().dialog(dialog_id).is_none() {
            return Err(Error::DialogNotFound(dialog_id.to_string()));
        }
        if !capture.is_file() {
            return Err(Error::CaptureNotFound(capture.to_path_buf()));
        }

        let output = self.export_path(dialog_id);
        CaptureExporter::new(self.tools.as_ref(), self.extractor.as_ref()).export(
            capture,
            dialog_id,
            &output,
        )
    }

    /// Score the RTP streams of a per-call capture with the configured codec.
    pub fn analyze_rtp(&self, call_capture: &Path) -> Result<Vec<RtpStreamStats>> {
        self.analyze_rtp_with_codec(call_capture, &self.settings.default_codec)
    }

    /// Score the RTP streams of a capture with an explicit codec label.
    pub fn analyze_rtp_with_codec(
        &self,
        call_capture: &Path,
        codec: &str,
    ) -> Result<Vec<RtpStreamStats>> {
        if !call_capture.is_file() {
            return Err(Error::CaptureNotFound(call_capture.to_path_buf()));
        }
        let analyzer =
            RtpQualityAnalyzer::new(self.extractor.as_ref(), CodecClass::from_label(codec));
        Ok(analyzer.analyze(call_capture))
    }

    pub fn build_ladder(&self, dialog: &DialogRecord) -> Vec<LadderStep> {
        ladder::build_ladder(dialog)
    }
}

/// Newest `*.pcapng` / `*.pcap` in `dir` by modification time.
pub fn latest_capture_in(dir: &Path) -> Result<PathBuf> {
    let escaped = glob::Pattern::escape(&dir.to_string_lossy());
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    for ext in CAPTURE_EXTENSIONS {
        let pattern = format!("{}/*.{}", escaped, ext);
        let entries = glob::glob(&pattern).map_err(|e| Error::Config(format!(
            "invalid capture directory {}: {}",
            dir.display(),
            e
        )))?;

        for entry in entries.flatten() {
            let Ok(modified) = std::fs::metadata(&entry).and_then(|m| m.modified()) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(t, _)| modified > *t) {
                newest = Some((modified, entry));
            }
        }
    }

    newest
        .map(|(_, path)| path)
        .ok_or_else(|| Error::CaptureNotFound(dir.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractionProfile, FieldRows};
    use std::time::Duration;

    struct NoRows;

    impl FieldExtractor for NoRows {
        fn extract(&self, _capture: &Path, _profile: ExtractionProfile) -> FieldRows {
            FieldRows::empty()
        }
    }

    struct NoTools;

    impl PacketTools for NoTools {
        fn filter(&self, _: &Path, _: &str, _: &Path) -> Result<()> {
            Err(Error::Tool {
                tool: "tshark".to_string(),
                message: "not installed".to_string(),
            })
        }

        fn merge(&self, _: &[PathBuf], _: &Path) -> Result<()> {
            unreachable!("merge after failed filter")
        }

        fn packet_count(&self, _: &Path) -> Result<usize> {
            Ok(0)
        }
    }

    fn engine() -> CallEngine {
        CallEngine::with_parts(
            IndexStore::in_memory(),
            Box::new(NoRows),
            Box::new(NoTools),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_export_unknown_dialog_is_not_found() {
        let err = engine()
            .export_call(Path::new("/tmp/any.pcapng"), "missing")
            .unwrap_err();
        assert!(matches!(err, Error::DialogNotFound(ref id) if id == "missing"));
        assert!(err.is_not_found());
    }

    #[test]
    fn test_analyze_missing_capture() {
        let err = engine()
            .analyze_rtp(Path::new("/nonexistent/call.pcapng"))
            .unwrap_err();
        assert!(matches!(err, Error::CaptureNotFound(_)));
    }

    #[test]
    fn test_unreadable_capture_yields_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("broken.pcapng");
        std::fs::write(&capture, b"junk").unwrap();

        let engine = engine();
        let index = engine.rebuild_index(&capture, false).unwrap();
        assert!(index.dialogs.is_empty());
        assert_eq!(engine.get_index().source_capture, "broken.pcapng");
        assert_eq!(engine.summary().dialog_count, 0);
    }

    #[test]
    fn test_latest_capture() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            latest_capture_in(dir.path()),
            Err(Error::CaptureNotFound(_))
        ));

        let old = dir.path().join("old.pcap");
        let new = dir.path().join("new.pcapng");
        std::fs::write(&old, b"1").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::write(&new, b"2").unwrap();

        assert_eq!(latest_capture_in(dir.path()).unwrap(), new);
    }
}
