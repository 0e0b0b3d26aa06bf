//! Protocol field extraction
//!
//! Everything the engine knows about a capture comes through the
//! [`FieldExtractor`] seam: one call per [`ExtractionProfile`], returning
//! text rows in capture order.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌──────────────────┐
//! │ capture file │ ──► │  FieldExtractor  │ ──► │    FieldRows     │
//! │  (.pcapng)   │     │ └─ TsharkExtractor│     │ (lazy, padded)   │
//! └──────────────┘     └──────────────────┘     └──────────────────┘
//!                               │
//!                               ▼
//!                        ┌─────────────┐
//!                        │ ToolRunner  │  (timeout, kill on drop)
//!                        └─────────────┘
//! ```
//!
//! ## Failure model
//!
//! Extraction never fails from the caller's point of view: when the
//! dissector is missing, times out, or exits non-zero, the failure is logged
//! and the caller sees an empty sequence. Consumers must also tolerate empty
//! strings in any field, because short rows are padded rather than dropped.

mod runner;
mod tshark;

pub use runner::{ToolOutput, ToolRunner};
pub use tshark::TsharkExtractor;

use chrono::{DateTime, TimeZone, Utc};
use std::path::Path;

/// Fields requested for the SIP profile, in row order.
pub const SIP_FIELDS: &[&str] = &[
    "frame.time_epoch",
    "ip.src",
    "ip.dst",
    "sip.Call-ID",
    "sip.CSeq.method",
    "sip.Method",
    "sip.Status-Code",
    "sip.From.user",
    "sip.To.user",
    "sip.From",
    "sip.To",
];

/// Fields requested for the SDP profile, in row order.
pub const SDP_FIELDS: &[&str] = &[
    "sdp.connection_info.address",
    "sdp.media.media",
    "sdp.media.port",
    "sdp.media.proto",
    "sdp.media.format",
];

/// Fields requested for the per-packet RTP byte profile, in row order.
pub const RTP_BYTES_FIELDS: &[&str] = &[
    "frame.time_epoch",
    "ip.src",
    "udp.srcport",
    "ip.dst",
    "udp.dstport",
    "rtp.ssrc",
    "frame.len",
];

/// Separator for repeated occurrences of a field within one packet.
pub const OCCURRENCE_SEPARATOR: char = '|';

/// A named extraction recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtractionProfile {
    /// One row per SIP message ([`SIP_FIELDS`])
    Sip,
    /// One row per SDP-carrying packet ([`SDP_FIELDS`])
    Sdp,
    /// One row per line of the RTP stream report (whitespace tokens)
    RtpStreams,
    /// One row per RTP packet ([`RTP_BYTES_FIELDS`])
    RtpBytes,
}

impl ExtractionProfile {
    pub fn name(&self) -> &'static str {
        match self {
            ExtractionProfile::Sip => "sip",
            ExtractionProfile::Sdp => "sdp",
            ExtractionProfile::RtpStreams => "rtp_streams",
            ExtractionProfile::RtpBytes => "rtp_bytes",
        }
    }

    /// Field list for field-mode profiles; empty for report profiles.
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            ExtractionProfile::Sip => SIP_FIELDS,
            ExtractionProfile::Sdp => SDP_FIELDS,
            ExtractionProfile::RtpStreams => &[],
            ExtractionProfile::RtpBytes => RTP_BYTES_FIELDS,
        }
    }

    /// Display filter applied before extraction.
    pub fn display_filter(&self) -> Option<&'static str> {
        match self {
            ExtractionProfile::Sip => Some("sip"),
            ExtractionProfile::Sdp => Some("sdp"),
            ExtractionProfile::RtpStreams => None,
            ExtractionProfile::RtpBytes => Some("rtp"),
        }
    }

    /// How a line of tool output is split into a row.
    pub fn row_split(&self) -> RowSplit {
        match self {
            ExtractionProfile::RtpStreams => RowSplit::Whitespace,
            other => RowSplit::Tabs {
                width: other.fields().len(),
            },
        }
    }
}

impl std::fmt::Display for ExtractionProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Row splitting rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowSplit {
    /// Tab-separated, padded or truncated to exactly `width` cells
    Tabs { width: usize },
    /// Whitespace-separated, variable width
    Whitespace,
}

/// Lazily split rows over captured tool output.
///
/// Blank lines are skipped. Rows are produced on demand from the owned
/// output text, so large captures are not materialized twice.
#[derive(Debug, Clone)]
pub struct FieldRows {
    text: String,
    pos: usize,
    split: RowSplit,
}

impl FieldRows {
    pub fn new(text: String, split: RowSplit) -> Self {
        Self { text, pos: 0, split }
    }

    /// The sequence produced on tool failure.
    pub fn empty() -> Self {
        Self::new(String::new(), RowSplit::Whitespace)
    }

    /// Rows of an `rtp,streams` report.
    ///
    /// Only the data lines between the column header (the line naming `SSRC`
    /// and `Lost`) and the closing `=` rule are kept; dashed separators are
    /// dropped. Output without a header yields no rows.
    pub fn from_stream_report(report: &str) -> Self {
        let mut body = String::new();
        let mut in_table = false;

        for line in report.lines() {
            let trimmed = line.trim();
            if !in_table {
                if trimmed.contains("SSRC") && trimmed.contains("Lost") {
                    in_table = true;
                }
                continue;
            }
            if trimmed.starts_with('=') {
                break;
            }
            if trimmed.is_empty() || trimmed.starts_with('-') {
                continue;
            }
            body.push_str(trimmed);
            body.push('\n');
        }

        Self::new(body, RowSplit::Whitespace)
    }

    fn split_line(&self, line: &str) -> Vec<String> {
        match self.split {
            RowSplit::Tabs { width } => {
                let mut row: Vec<String> = line
                    .split('\t')
                    .take(width)
                    .map(|s| s.to_string())
                    .collect();
                row.resize(width, String::new());
                row
            }
            RowSplit::Whitespace => line.split_whitespace().map(|s| s.to_string()).collect(),
        }
    }
}

impl Iterator for FieldRows {
    type Item = Vec<String>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.pos < self.text.len() {
            let rest = &self.text[self.pos..];
            let (line, advance) = match rest.find('\n') {
                Some(i) => (&rest[..i], i + 1),
                None => (rest, rest.len()),
            };
            self.pos += advance;

            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            return Some(self.split_line(line));
        }
        None
    }
}

/// Capability: turn a capture into rows for a profile.
///
/// Implementations must not fail: tool errors are logged and reported as an
/// empty [`FieldRows`].
pub trait FieldExtractor: Send + Sync {
    fn extract(&self, capture: &Path, profile: ExtractionProfile) -> FieldRows;
}

/// Parse a `frame.time_epoch` value (`1700000000.123456789`) exactly.
///
/// Returns `None` for empty, negative, or non-numeric input.
pub fn parse_epoch(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let (secs, frac) = value.split_once('.').unwrap_or((value, ""));
    if secs.is_empty() || !secs.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if !frac.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let secs: i64 = secs.parse().ok()?;
    let mut nanos = String::with_capacity(9);
    nanos.extend(frac.chars().take(9));
    while nanos.len() < 9 {
        nanos.push('0');
    }
    let nanos: u32 = nanos.parse().ok()?;

    Utc.timestamp_opt(secs, nanos).single()
}

/// Split a field holding several occurrences (`a|b|c`).
///
/// An empty field yields no items.
pub fn occurrences(field: &str) -> Vec<&str> {
    if field.is_empty() {
        return Vec::new();
    }
    field
        .split([OCCURRENCE_SEPARATOR, ','])
        .map(str::trim)
        .collect()
}
