//! Dialog index construction from SIP field rows.

use super::mask::{mask_header_users, mask_user};
use crate::extract::parse_epoch;
use crate::types::{
    CallIndex, DialogMessage, DialogRecord, DialogState, SESSION_INITIATION_METHOD,
    SESSION_TERMINATION_METHOD,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Named view over one row of the SIP profile.
struct SipRow<'a> {
    time_epoch: &'a str,
    src: &'a str,
    dst: &'a str,
    call_id: &'a str,
    cseq_method: &'a str,
    method: &'a str,
    status_code: &'a str,
    from_user: &'a str,
    to_user: &'a str,
    from_header: &'a str,
    to_header: &'a str,
}

impl<'a> SipRow<'a> {
    fn from_fields(fields: &'a [String]) -> Self {
        let field = |i: usize| fields.get(i).map(|s| s.trim()).unwrap_or("");
        Self {
            time_epoch: field(0),
            src: field(1),
            dst: field(2),
            call_id: field(3),
            cseq_method: field(4),
            method: field(5),
            status_code: field(6),
            from_user: field(7),
            to_user: field(8),
            from_header: field(9),
            to_header: field(10),
        }
    }

    fn message(&self) -> DialogMessage {
        let method = non_empty(self.method);
        // A row with a request method is a request; any status is ignored.
        let status_code = if method.is_some() {
            None
        } else {
            parse_status_code(self.status_code)
        };

        DialogMessage {
            ts: parse_epoch(self.time_epoch),
            source_addr: self.src.to_string(),
            dest_addr: self.dst.to_string(),
            method,
            status_code,
            cseq_method: non_empty(self.cseq_method),
        }
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_status_code(value: &str) -> Option<u16> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Seconds from `start` to `end`, clamped at zero.
pub(crate) fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    let delta = end - start;
    if delta < chrono::Duration::zero() {
        return 0.0;
    }
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) / 1e9
}

/// Builds a [`CallIndex`] from extractor rows.
///
/// Rows are consumed in order. The first pass groups messages by Call-ID and
/// tracks origin method and the highest final status; the second pass
/// derives state and duration for each record.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogIndexBuilder {
    privacy_mask: bool,
}

impl DialogIndexBuilder {
    pub fn new(privacy_mask: bool) -> Self {
        Self { privacy_mask }
    }

    /// Build a fresh index. Source metadata is left for the caller to fill.
    pub fn build<S, R>(&self, sip_rows: S, stream_rows: R) -> CallIndex
    where
        S: IntoIterator<Item = Vec<String>>,
        R: IntoIterator<Item = Vec<String>>,
    {
        let dialogs = self.build_dialogs(sip_rows);
        let rtp_streams: Vec<Vec<String>> = stream_rows.into_iter().collect();

        CallIndex {
            dialogs,
            rtp_stream_count: rtp_streams.len(),
            rtp_streams,
            built_at: Utc::now(),
            source_capture: String::new(),
            source_digest: None,
            privacy_masked: self.privacy_mask,
        }
    }

    /// Group SIP rows into dialog records.
    pub fn build_dialogs<S>(&self, sip_rows: S) -> BTreeMap<String, DialogRecord>
    where
        S: IntoIterator<Item = Vec<String>>,
    {
        let mut dialogs: BTreeMap<String, DialogRecord> = BTreeMap::new();
        let mut skipped = 0usize;

        for fields in sip_rows {
            let row = SipRow::from_fields(&fields);
            if row.call_id.is_empty() {
                skipped += 1;
                continue;
            }

            let record = dialogs
                .entry(row.call_id.to_string())
                .or_insert_with(|| DialogRecord::new(row.call_id));
            let message = row.message();

            if message.ts.is_none() && !row.time_epoch.is_empty() {
                tracing::debug!(
                    dialog_id = row.call_id,
                    value = row.time_epoch,
                    "Unparsable timestamp"
                );
            }
            if let Some(ts) = message.ts {
                record.first_seen = Some(record.first_seen.map_or(ts, |t| t.min(ts)));
                record.last_seen = Some(record.last_seen.map_or(ts, |t| t.max(ts)));
            }

            if record.peer_a_identity.is_empty() {
                record.peer_a_identity = row.from_user.to_string();
            }
            if record.peer_b_identity.is_empty() {
                record.peer_b_identity = row.to_user.to_string();
            }
            if record.from_header.is_empty() {
                record.from_header = row.from_header.to_string();
            }
            if record.to_header.is_empty() {
                record.to_header = row.to_header.to_string();
            }

            if record.method_of_origin.is_none() {
                record.method_of_origin = message.method.clone();
            }
            if let Some(code) = message.status_code.filter(|c| *c >= 200) {
                record.final_status_code =
                    Some(record.final_status_code.map_or(code, |c| c.max(code)));
            }

            record.messages.push(message);
        }

        for record in dialogs.values_mut() {
            finalize(record);
            if self.privacy_mask {
                apply_privacy_mask(record);
            }
        }

        if skipped > 0 {
            tracing::debug!(skipped, "Skipped SIP rows without Call-ID");
        }
        dialogs
    }
}

fn finalize(record: &mut DialogRecord) {
    record.state = DialogState::from_final_code(record.final_status_code);

    let first_request_ts = |method: &str| {
        record
            .messages
            .iter()
            .find(|m| m.is_request_for(method))
            .and_then(|m| m.ts)
    };

    record.duration_s = match (
        first_request_ts(SESSION_INITIATION_METHOD),
        first_request_ts(SESSION_TERMINATION_METHOD),
    ) {
        (Some(open), Some(close)) => Some(seconds_between(open, close)),
        _ => match (record.first_seen, record.last_seen) {
            (Some(first), Some(last)) => Some(seconds_between(first, last)),
            _ => None,
        },
    };
}

fn apply_privacy_mask(record: &mut DialogRecord) {
    record.peer_a_identity = mask_user(&record.peer_a_identity);
    record.peer_b_identity = mask_user(&record.peer_b_identity);
    record.from_header = mask_header_users(&record.from_header);
    record.to_header = mask_header_users(&record.to_header);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(ts: &str, src: &str, dst: &str, call_id: &str, method: &str, status: &str) -> Vec<String> {
        let cseq = if method.is_empty() { "INVITE" } else { method };
        [
            ts,
            src,
            dst,
            call_id,
            cseq,
            method,
            status,
            "alice",
            "bob",
            "\"Alice\" <sip:alice@a.example>;tag=1",
            "<sip:bob@b.example>",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn test_completed_call() {
        let rows = vec![
            row("100.0", "10.0.0.1", "10.0.0.2", "c1", "INVITE", ""),
            row("100.5", "10.0.0.2", "10.0.0.1", "c1", "", "180"),
            row("101.0", "10.0.0.2", "10.0.0.1", "c1", "", "200"),
            row("101.1", "10.0.0.1", "10.0.0.2", "c1", "ACK", ""),
            row("130.25", "10.0.0.1", "10.0.0.2", "c1", "BYE", ""),
            row("130.30", "10.0.0.2", "10.0.0.1", "c1", "", "200"),
        ];
        let dialogs = DialogIndexBuilder::new(false).build_dialogs(rows);

        assert_eq!(dialogs.len(), 1);
        let d = &dialogs["c1"];
        assert_eq!(d.messages.len(), 6);
        assert_eq!(d.final_status_code, Some(200));
        assert_eq!(d.state, DialogState::CompletedOk);
        assert_eq!(d.method_of_origin.as_deref(), Some("INVITE"));
        assert!((d.duration_s.unwrap() - 30.25).abs() < 1e-9);
        assert_eq!(d.peer_a_identity, "alice");
        assert_eq!(d.messages[1].cseq_method.as_deref(), Some("INVITE"));
        assert!(d.messages[1].method.is_none());
    }

    #[test]
    fn test_rejected_call() {
        let rows = vec![
            row("1.0", "10.0.0.1", "10.0.0.2", "c2", "INVITE", ""),
            row("1.2", "10.0.0.2", "10.0.0.1", "c2", "", "486"),
        ];
        let dialogs = DialogIndexBuilder::new(false).build_dialogs(rows);
        let d = &dialogs["c2"];
        assert_eq!(d.final_status_code, Some(486));
        assert_eq!(d.state, DialogState::CompletedFailed);
        // No BYE: falls back to the observed span
        assert!((d.duration_s.unwrap() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_final_code_is_monotonic_max() {
        let rows = vec![
            row("1.0", "a", "b", "c3", "INVITE", ""),
            row("1.1", "b", "a", "c3", "", "487"),
            row("1.2", "b", "a", "c3", "", "200"),
        ];
        let d = &DialogIndexBuilder::new(false).build_dialogs(rows)["c3"];
        assert_eq!(d.final_status_code, Some(487));
        assert_eq!(d.state, DialogState::CompletedFailed);
    }

    #[test]
    fn test_provisional_only_is_in_progress() {
        let rows = vec![
            row("1.0", "a", "b", "c4", "INVITE", ""),
            row("1.1", "b", "a", "c4", "", "100"),
            row("1.2", "b", "a", "c4", "", "18x"),
        ];
        let d = &DialogIndexBuilder::new(false).build_dialogs(rows)["c4"];
        assert_eq!(d.final_status_code, None);
        assert_eq!(d.state, DialogState::InProgress);
        assert_eq!(d.messages[2].label(), "?");
    }

    #[test]
    fn test_rows_without_call_id_are_skipped() {
        let rows = vec![
            row("1.0", "a", "b", "", "INVITE", ""),
            vec!["1.0".to_string()],
        ];
        assert!(DialogIndexBuilder::new(false).build_dialogs(rows).is_empty());
    }

    #[test]
    fn test_unparsable_timestamps() {
        let rows = vec![
            row("garbage", "a", "b", "c5", "INVITE", ""),
            row("", "b", "a", "c5", "", "200"),
        ];
        let d = &DialogIndexBuilder::new(false).build_dialogs(rows)["c5"];
        assert_eq!(d.messages.len(), 2);
        assert!(d.first_seen.is_none());
        assert!(d.last_seen.is_none());
        assert!(d.duration_s.is_none());
    }

    #[test]
    fn test_bye_before_invite_clamps_to_zero() {
        let rows = vec![
            row("5.0", "a", "b", "c6", "BYE", ""),
            row("9.0", "a", "b", "c6", "INVITE", ""),
        ];
        let d = &DialogIndexBuilder::new(false).build_dialogs(rows)["c6"];
        assert_eq!(d.duration_s, Some(0.0));
    }

    #[test]
    fn test_privacy_mask() {
        let rows = vec![row("1.0", "a", "b", "c7", "INVITE", "")];
        let d = &DialogIndexBuilder::new(true).build_dialogs(rows)["c7"];
        assert_eq!(d.peer_a_identity, "a***e");
        assert_eq!(d.peer_b_identity, "b*b");
        assert_eq!(d.from_header, "\"Alice\" <sip:a***e@a.example>;tag=1");
        assert_eq!(d.to_header, "<sip:b*b@b.example>");
    }

    #[test]
    fn test_build_passes_stream_rows_through() {
        let streams = vec![vec!["10.0.0.1".to_string(), "0x1".to_string()]];
        let index = DialogIndexBuilder::new(true).build(Vec::new(), streams.clone());
        assert_eq!(index.rtp_streams, streams);
        assert_eq!(index.rtp_stream_count, 1);
        assert!(index.privacy_masked);
        assert!(index.dialogs.is_empty());
    }
}
