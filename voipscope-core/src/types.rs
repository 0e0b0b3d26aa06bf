//! Core domain types for voipscope
//!
//! These types represent the call index built from one packet capture and
//! the on-demand artifacts derived from it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Dialog** | A SIP call leg identified by its Call-ID |
//! | **Message** | One SIP request or response observed inside a dialog |
//! | **Media descriptor** | One `m=` line negotiated in an SDP body |
//! | **Stream** | One RTP flow, identified by SSRC plus endpoint 4-tuple |
//! | **Snapshot** | One immutable [`CallIndex`] published by a rebuild |
//!
//! Timestamps come from the capture (`frame.time_epoch`), never from the
//! wall clock, except [`CallIndex::built_at`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The request method that opens a dialog.
pub const SESSION_INITIATION_METHOD: &str = "INVITE";

/// The request method that terminates a dialog.
pub const SESSION_TERMINATION_METHOD: &str = "BYE";

// ============================================
// Dialog state
// ============================================

/// Outcome of a dialog, derived solely from its highest final response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogState {
    /// No final (>= 200) response observed
    InProgress,
    /// Highest final response is 2xx
    CompletedOk,
    /// Highest final response is 3xx-6xx (or anything else >= 300)
    CompletedFailed,
}

impl DialogState {
    /// Derive the state from the highest final status code.
    pub fn from_final_code(final_code: Option<u16>) -> Self {
        match final_code {
            None => DialogState::InProgress,
            Some(code) if (200..300).contains(&code) => DialogState::CompletedOk,
            Some(_) => DialogState::CompletedFailed,
        }
    }

    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            DialogState::InProgress => "in_progress",
            DialogState::CompletedOk => "completed_ok",
            DialogState::CompletedFailed => "completed_failed",
        }
    }

    /// Short label for tables
    pub fn display_name(&self) -> &'static str {
        match self {
            DialogState::InProgress => "in-progress",
            DialogState::CompletedOk => "ok",
            DialogState::CompletedFailed => "failed",
        }
    }
}

impl std::fmt::Display for DialogState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DialogState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in_progress" => Ok(DialogState::InProgress),
            "completed_ok" => Ok(DialogState::CompletedOk),
            "completed_failed" => Ok(DialogState::CompletedFailed),
            _ => Err(format!("unknown dialog state: {}", s)),
        }
    }
}

// ============================================
// Dialogs
// ============================================

/// One observed signaling event.
///
/// Requests carry `method`, responses carry `status_code`; never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogMessage {
    /// Capture timestamp (None if the dissector gave an unparsable value)
    pub ts: Option<DateTime<Utc>>,
    /// Source IP address
    pub source_addr: String,
    /// Destination IP address
    pub dest_addr: String,
    /// Request method (requests only)
    pub method: Option<String>,
    /// Response status code (responses only)
    pub status_code: Option<u16>,
    /// Method named in the CSeq header, for both requests and responses
    pub cseq_method: Option<String>,
}

impl DialogMessage {
    /// Label shown on a ladder arrow: method, else status code, else `?`.
    pub fn label(&self) -> String {
        match (&self.method, self.status_code) {
            (Some(method), _) => method.clone(),
            (None, Some(code)) => code.to_string(),
            (None, None) => "?".to_string(),
        }
    }

    /// True if this is the request `method` (e.g. the INVITE itself, not its 200).
    pub fn is_request_for(&self, method: &str) -> bool {
        self.method.as_deref() == Some(method)
    }
}

/// One SIP dialog reconstructed from a capture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogRecord {
    /// Call-ID (primary key)
    pub dialog_id: String,
    /// Timestamp of the earliest message with a known timestamp
    pub first_seen: Option<DateTime<Utc>>,
    /// Timestamp of the latest message with a known timestamp
    pub last_seen: Option<DateTime<Utc>>,
    /// From user part
    pub peer_a_identity: String,
    /// To user part
    pub peer_b_identity: String,
    /// Full From header as first seen
    pub from_header: String,
    /// Full To header as first seen
    pub to_header: String,
    /// Messages in capture order
    pub messages: Vec<DialogMessage>,
    /// First request method seen (usually INVITE)
    pub method_of_origin: Option<String>,
    /// Highest final (>= 200) response code seen
    pub final_status_code: Option<u16>,
    /// Derived from `final_status_code`
    pub state: DialogState,
    /// INVITE..BYE interval, or observed span
    pub duration_s: Option<f64>,
}

impl DialogRecord {
    /// Create an empty record for a dialog id.
    pub fn new(dialog_id: impl Into<String>) -> Self {
        Self {
            dialog_id: dialog_id.into(),
            first_seen: None,
            last_seen: None,
            peer_a_identity: String::new(),
            peer_b_identity: String::new(),
            from_header: String::new(),
            to_header: String::new(),
            messages: Vec::new(),
            method_of_origin: None,
            final_status_code: None,
            state: DialogState::InProgress,
            duration_s: None,
        }
    }

    /// Final code is an error response (>= 400).
    pub fn is_error(&self) -> bool {
        self.final_status_code.map(|c| c >= 400).unwrap_or(false)
    }
}

// ============================================
// Media
// ============================================

/// One negotiated media endpoint from an SDP body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MediaDescriptor {
    /// Connection address (`c=`), if announced
    pub ip: Option<String>,
    /// Media port (`m=` line), always in 1..=65535
    pub port: u16,
    /// Transport profile, e.g. `RTP/AVP`
    pub transport: String,
    /// First payload format on the `m=` line
    pub payload_type: Option<String>,
    /// Media kind (`audio`, `video`), if announced
    pub media: Option<String>,
}

// ============================================
// RTP quality
// ============================================

/// Quality grade derived from a MOS value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    /// MOS >= 4.3
    Excellent,
    /// MOS 4.0-4.3
    Good,
    /// MOS 3.6-4.0
    Fair,
    /// MOS 3.1-3.6
    Poor,
    /// MOS < 3.1
    Bad,
}

impl QualityLevel {
    pub fn from_mos(mos: f64) -> Self {
        if mos >= 4.3 {
            QualityLevel::Excellent
        } else if mos >= 4.0 {
            QualityLevel::Good
        } else if mos >= 3.6 {
            QualityLevel::Fair
        } else if mos >= 3.1 {
            QualityLevel::Poor
        } else {
            QualityLevel::Bad
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::Excellent => "excellent",
            QualityLevel::Good => "good",
            QualityLevel::Fair => "fair",
            QualityLevel::Poor => "poor",
            QualityLevel::Bad => "bad",
        }
    }
}

impl std::fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of one RTP stream with its estimated MOS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RtpStreamStats {
    /// Synchronization source, as printed by the dissector (`0x...`)
    pub ssrc: String,
    /// `ip:port` of the sender
    pub src_endpoint: String,
    /// `ip:port` of the receiver
    pub dst_endpoint: String,
    pub packet_count: u64,
    pub lost_count: u64,
    /// `lost / max(1, packets) * 100`, within 0..=100
    pub loss_pct: f64,
    /// Mean interarrival jitter
    pub jitter_ms: f64,
    /// None when byte counts or the stream span are unknown
    pub bitrate_kbps: Option<f64>,
    /// Payload name from the report (display only)
    pub payload_type: String,
    /// Estimated MOS in 1.0..=4.5
    pub mos: f64,
    pub quality: QualityLevel,
}

// ============================================
// Ladder
// ============================================

/// Lifeline of a ladder diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    A,
    B,
    Proxy,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::A => "A",
            Role::B => "B",
            Role::Proxy => "Proxy",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One arrow of a ladder diagram.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LadderStep {
    pub from: Role,
    pub to: Role,
    pub label: String,
}

// ============================================
// Call index
// ============================================

/// Everything indexed from one capture.
///
/// A rebuild always produces a new value; snapshots are never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallIndex {
    /// Dialogs keyed by Call-ID
    pub dialogs: BTreeMap<String, DialogRecord>,
    /// Raw stream-summary rows from the capture, unmodified
    pub rtp_streams: Vec<Vec<String>>,
    /// Number of stream-summary rows
    pub rtp_stream_count: usize,
    /// Wall-clock time of the rebuild
    pub built_at: DateTime<Utc>,
    /// File name of the indexed capture (empty for the initial snapshot)
    pub source_capture: String,
    /// SHA-256 of the indexed capture, hex encoded
    pub source_digest: Option<String>,
    /// Whether user parts were masked during the build
    pub privacy_masked: bool,
}

impl CallIndex {
    /// The snapshot served before anything has been built.
    pub fn empty() -> Self {
        Self {
            dialogs: BTreeMap::new(),
            rtp_streams: Vec::new(),
            rtp_stream_count: 0,
            built_at: DateTime::<Utc>::default(),
            source_capture: String::new(),
            source_digest: None,
            privacy_masked: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.dialogs.is_empty() && self.rtp_streams.is_empty()
    }

    pub fn dialog(&self, dialog_id: &str) -> Option<&DialogRecord> {
        self.dialogs.get(dialog_id)
    }

    /// Dialogs ordered by most recent activity first.
    ///
    /// Dialogs without timestamps sort last; ties keep Call-ID order.
    pub fn recent_dialogs(&self, limit: usize) -> Vec<&DialogRecord> {
        let mut dialogs: Vec<&DialogRecord> = self.dialogs.values().collect();
        dialogs.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        dialogs.truncate(limit);
        dialogs
    }

    /// KPI summary of this snapshot.
    pub fn summary(&self) -> IndexSummary {
        let dialog_count = self.dialogs.len();
        let errors = self.dialogs.values().filter(|d| d.is_error()).count();
        let failed_pct = if dialog_count == 0 {
            0
        } else {
            ((errors as f64 / dialog_count as f64) * 100.0).round() as u32
        };

        IndexSummary {
            dialog_count,
            failed_pct,
            rtp_stream_count: self.rtp_stream_count,
            built_at: self.built_at,
            source_capture: self.source_capture.clone(),
        }
    }
}

impl Default for CallIndex {
    fn default() -> Self {
        Self::empty()
    }
}

/// KPI view of a [`CallIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSummary {
    pub dialog_count: usize,
    /// Share of dialogs whose final code is >= 400, in whole percent
    pub failed_pct: u32,
    pub rtp_stream_count: usize,
    pub built_at: DateTime<Utc>,
    pub source_capture: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_state_from_final_code() {
        assert_eq!(DialogState::from_final_code(None), DialogState::InProgress);
        assert_eq!(
            DialogState::from_final_code(Some(200)),
            DialogState::CompletedOk
        );
        assert_eq!(
            DialogState::from_final_code(Some(299)),
            DialogState::CompletedOk
        );
        assert_eq!(
            DialogState::from_final_code(Some(302)),
            DialogState::CompletedFailed
        );
        assert_eq!(
            DialogState::from_final_code(Some(486)),
            DialogState::CompletedFailed
        );
        assert_eq!(
            DialogState::from_final_code(Some(799)),
            DialogState::CompletedFailed
        );
    }

    #[test]
    fn test_state_roundtrip_str() {
        for state in [
            DialogState::InProgress,
            DialogState::CompletedOk,
            DialogState::CompletedFailed,
        ] {
            assert_eq!(state.as_str().parse::<DialogState>().unwrap(), state);
        }
        assert!("bogus".parse::<DialogState>().is_err());
    }

    #[test]
    fn test_message_label() {
        let mut msg = DialogMessage {
            ts: None,
            source_addr: "10.0.0.1".to_string(),
            dest_addr: "10.0.0.2".to_string(),
            method: Some("INVITE".to_string()),
            status_code: None,
            cseq_method: Some("INVITE".to_string()),
        };
        assert_eq!(msg.label(), "INVITE");
        assert!(msg.is_request_for(SESSION_INITIATION_METHOD));

        msg.method = None;
        msg.status_code = Some(180);
        assert_eq!(msg.label(), "180");
        assert!(!msg.is_request_for(SESSION_INITIATION_METHOD));

        msg.status_code = None;
        assert_eq!(msg.label(), "?");
    }

    #[test]
    fn test_quality_level_bands() {
        assert_eq!(QualityLevel::from_mos(4.4), QualityLevel::Excellent);
        assert_eq!(QualityLevel::from_mos(4.1), QualityLevel::Good);
        assert_eq!(QualityLevel::from_mos(3.7), QualityLevel::Fair);
        assert_eq!(QualityLevel::from_mos(3.2), QualityLevel::Poor);
        assert_eq!(QualityLevel::from_mos(1.0), QualityLevel::Bad);
    }

    #[test]
    fn test_recent_dialogs_and_summary() {
        let mut index = CallIndex::empty();
        let t = |s| Utc.timestamp_opt(s, 0).unwrap();

        let mut old = DialogRecord::new("old");
        old.last_seen = Some(t(100));
        old.final_status_code = Some(200);
        let mut new = DialogRecord::new("new");
        new.last_seen = Some(t(200));
        new.final_status_code = Some(486);
        let undated = DialogRecord::new("undated");

        for d in [old, new, undated] {
            index.dialogs.insert(d.dialog_id.clone(), d);
        }

        let recent: Vec<_> = index
            .recent_dialogs(10)
            .iter()
            .map(|d| d.dialog_id.as_str())
            .collect();
        assert_eq!(recent, vec!["new", "old", "undated"]);
        assert_eq!(index.recent_dialogs(1).len(), 1);

        let summary = index.summary();
        assert_eq!(summary.dialog_count, 3);
        assert_eq!(summary.failed_pct, 33);
    }

    #[test]
    fn test_empty_summary() {
        let summary = CallIndex::empty().summary();
        assert_eq!(summary.dialog_count, 0);
        assert_eq!(summary.failed_pct, 0);
    }
}
