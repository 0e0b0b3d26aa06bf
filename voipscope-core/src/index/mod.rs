//! Call index construction and publication
//!
//! This module turns a capture file into a [`CallIndex`] snapshot and keeps
//! the most recent snapshot available to readers.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐     ┌────────────────────┐     ┌─────────────────┐
//! │ FieldExtractor │ ──► │ DialogIndexBuilder │ ──► │   IndexStore    │
//! │ (Sip, Streams) │     │  (+ privacy mask)  │     │ (ArcSwap + DB)  │
//! └────────────────┘     └────────────────────┘     └─────────────────┘
//! ```
//!
//! A rebuild always produces a complete new snapshot; nothing is merged
//! into the previous one.

mod builder;
pub mod mask;
mod store;

pub use builder::DialogIndexBuilder;
pub(crate) use builder::seconds_between;
pub use mask::{mask_header_users, mask_user};
pub use store::IndexStore;

use crate::error::{Error, Result};
use crate::extract::{ExtractionProfile, FieldExtractor};
use crate::types::CallIndex;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;

/// SHA-256 of a capture file, hex encoded.
pub fn capture_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Build a complete index for `capture`.
///
/// Extraction failures degrade to empty row sets, so a capture the dissector
/// cannot read yields an empty index rather than an error. A missing capture
/// file is reported as [`Error::CaptureNotFound`].
pub fn index_capture(
    capture: &Path,
    privacy_mask: bool,
    extractor: &dyn FieldExtractor,
) -> Result<CallIndex> {
    if !capture.is_file() {
        return Err(Error::CaptureNotFound(capture.to_path_buf()));
    }

    let digest = capture_digest(capture)?;
    let builder = DialogIndexBuilder::new(privacy_mask);
    let mut index = builder.build(
        extractor.extract(capture, ExtractionProfile::Sip),
        extractor.extract(capture, ExtractionProfile::RtpStreams),
    );

    index.source_capture = capture
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    index.source_digest = Some(digest);
    Ok(index)
}
