//! SDP media correlation.
//!
//! Reads the SDP bodies of one dialog's signaling and lists the RTP
//! endpoints they negotiate.

use crate::extract::{occurrences, ExtractionProfile, FieldExtractor};
use crate::types::MediaDescriptor;
use std::path::Path;

/// Discovers negotiated media endpoints for a dialog.
pub struct MediaCorrelator<'a> {
    extractor: &'a dyn FieldExtractor,
}

impl<'a> MediaCorrelator<'a> {
    pub fn new(extractor: &'a dyn FieldExtractor) -> Self {
        Self { extractor }
    }

    /// Media descriptors announced in `sip_capture`, in capture order.
    ///
    /// `sip_capture` must already be filtered to the dialog's signaling.
    /// Renegotiated duplicates are kept.
    pub fn correlate(&self, dialog_id: &str, sip_capture: &Path) -> Vec<MediaDescriptor> {
        let descriptors =
            descriptors_from_sdp_rows(self.extractor.extract(sip_capture, ExtractionProfile::Sdp));

        tracing::debug!(
            dialog_id,
            descriptors = descriptors.len(),
            "Correlated media descriptors"
        );
        descriptors
    }
}

/// True for transports that carry RTP over UDP.
fn is_rtp_transport(proto: &str) -> bool {
    let upper = proto.to_ascii_uppercase();
    if upper.contains("TCP") {
        return false;
    }
    upper.contains("RTP") || upper == "UDP"
}

fn parse_port(value: &str) -> Option<u16> {
    match value.parse::<u16>() {
        Ok(0) | Err(_) => None,
        Ok(port) => Some(port),
    }
}

/// Pick the value for media line `i` from a per-packet occurrence list.
///
/// With one more value than media lines, the first is session-level and the
/// rest belong to the media lines in order. With exactly one per media line
/// they align. Otherwise the first (session-level) value applies.
fn value_for_media<'v>(values: &[&'v str], media_count: usize, i: usize) -> Option<&'v str> {
    let value = if values.len() == media_count + 1 {
        values.get(i + 1)
    } else if values.len() == media_count {
        values.get(i)
    } else {
        values.first()
    };
    value.copied().filter(|v| !v.is_empty())
}

/// Pick the payload format for media line `i`.
///
/// Formats only exist at media level and an `m=` line lists one per
/// payload type, so the first listed format is the preferred one. Several
/// media lines only align when each announced exactly one format.
fn format_for_media<'v>(formats: &[&'v str], media_count: usize, i: usize) -> Option<&'v str> {
    let format = if media_count > 1 && formats.len() == media_count {
        formats.get(i)
    } else {
        formats.first()
    };
    format.copied().filter(|f| !f.is_empty())
}

/// Turn `Sdp` profile rows into descriptors.
///
/// Each row is one SDP body; repeated `m=`/`c=` values arrive joined by
/// `|`. Media lines with a non-RTP transport or a malformed port are
/// skipped.
pub fn descriptors_from_sdp_rows<I>(rows: I) -> Vec<MediaDescriptor>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut descriptors = Vec::new();

    for row in rows {
        let field = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
        let addresses = occurrences(field(0));
        let medias = occurrences(field(1));
        let ports = occurrences(field(2));
        let protos = occurrences(field(3));
        let formats = occurrences(field(4));

        let media_count = ports.len();
        for (i, port) in ports.iter().enumerate() {
            let transport = protos
                .get(i)
                .or_else(|| protos.first())
                .copied()
                .unwrap_or("");
            if !is_rtp_transport(transport) {
                tracing::debug!(transport, "Skipping non-RTP media line");
                continue;
            }

            let Some(port) = parse_port(port) else {
                tracing::debug!(port = *port, "Skipping media line with malformed port");
                continue;
            };

            descriptors.push(MediaDescriptor {
                ip: value_for_media(&addresses, media_count, i).map(str::to_string),
                port,
                transport: transport.to_string(),
                payload_type: format_for_media(&formats, media_count, i).map(str::to_string),
                media: value_for_media(&medias, media_count, i).map(str::to_string),
            });
        }
    }

    descriptors
}
