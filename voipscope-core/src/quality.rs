//! RTP stream statistics and MOS estimation.
//!
//! Stream rows come from the `rtp,streams` report; bitrates come from the
//! per-packet `RtpBytes` profile. MOS is estimated with a simplified E-model
//! (ITU-T G.107) that distinguishes only waveform and compressed codecs.

use crate::extract::{parse_epoch, ExtractionProfile, FieldExtractor};
use crate::index::seconds_between;
use crate::types::{QualityLevel, RtpStreamStats};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;

/// Base transmission rating with no impairments.
const R_BASE: f64 = 94.2;

/// Upper bound of the delay/jitter impairment.
const MAX_JITTER_IMPAIRMENT: f64 = 20.0;

/// Codec family used for the equipment impairment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecClass {
    /// G.711 / PCMU / PCMA / L16
    Waveform,
    /// Everything else (G.729, Opus, ...)
    Compressed,
}

impl CodecClass {
    /// Classify a codec label such as `g711`, `PCMU` or `opus`.
    pub fn from_label(label: &str) -> Self {
        let label = label.to_ascii_lowercase().replace(['.', '-', ' '], "");
        let waveform = ["g711", "pcmu", "pcma", "l16"];
        if waveform.iter().any(|w| label.contains(w)) {
            CodecClass::Waveform
        } else {
            CodecClass::Compressed
        }
    }

    /// Equipment impairment `Ie`.
    pub fn equipment_impairment(&self) -> f64 {
        match self {
            CodecClass::Waveform => 0.0,
            CodecClass::Compressed => 5.0,
        }
    }

    /// Packet-loss robustness `Bpl`.
    pub fn loss_robustness(&self) -> f64 {
        match self {
            CodecClass::Waveform => 10.0,
            CodecClass::Compressed => 19.0,
        }
    }
}

/// Transmission rating `R` for a stream.
pub fn r_factor(loss_pct: f64, jitter_ms: f64, codec: CodecClass) -> f64 {
    let loss = loss_pct.clamp(0.0, 100.0);
    let ie = codec.equipment_impairment();
    let bpl = codec.loss_robustness();

    let ie_eff = ie + (95.0 - ie) * loss / (loss / bpl + 95.0);
    let id = (jitter_ms.max(0.0) / 10.0).min(MAX_JITTER_IMPAIRMENT);
    R_BASE - id - ie_eff
}

/// Estimated MOS in `1.0..=4.5`, rounded to two decimals.
pub fn estimate_mos(loss_pct: f64, jitter_ms: f64, codec: CodecClass) -> f64 {
    let r = r_factor(loss_pct, jitter_ms, codec);

    let mos = if r < 0.0 {
        1.0
    } else if r > 100.0 {
        4.5
    } else {
        1.0 + 0.035 * r + r * (r - 60.0) * (100.0 - r) * 7.0e-6
    };

    (mos.clamp(1.0, 4.5) * 100.0).round() / 100.0
}

/// One stream row of the report, before scoring.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRow {
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub ssrc: String,
    pub payload: String,
    pub packets: u64,
    pub lost: u64,
    pub mean_jitter_ms: f64,
}

fn is_ssrc_token(token: &str) -> bool {
    token.len() > 2 && (token.starts_with("0x") || token.starts_with("0X"))
}

fn is_loss_pct_token(token: &str) -> bool {
    token.starts_with('(') && token.ends_with("%)")
}

/// Parse one row of `rtp,streams` tokens.
///
/// The row is anchored on the `0x...` SSRC: the four tokens before it are
/// the endpoints; after it come payload tokens, packets, lost, `(x%)` and
/// the numeric delta/jitter columns. Six columns is the current layout
/// (mean jitter is the fifth), three the legacy one (mean jitter is the
/// third). Returns `None` for anything else.
pub fn parse_stream_row(tokens: &[String]) -> Option<StreamRow> {
    let ssrc_at = tokens.iter().position(|t| is_ssrc_token(t))?;
    if ssrc_at < 4 {
        return None;
    }

    let pct_at = ssrc_at + 1 + tokens[ssrc_at + 1..].iter().position(|t| is_loss_pct_token(t))?;
    if pct_at < ssrc_at + 3 {
        return None;
    }

    let packets: u64 = tokens[pct_at - 2].parse().ok()?;
    let lost = tokens[pct_at - 1].parse::<i64>().ok()?.max(0) as u64;

    let columns: Vec<f64> = tokens[pct_at + 1..]
        .iter()
        .map_while(|t| t.parse::<f64>().ok())
        .collect();
    let mean_jitter_ms = match columns.len() {
        n if n >= 6 => columns[4],
        n if n >= 3 => columns[2],
        _ => return None,
    };

    Some(StreamRow {
        src_ip: tokens[ssrc_at - 4].clone(),
        src_port: tokens[ssrc_at - 3].parse().ok()?,
        dst_ip: tokens[ssrc_at - 2].clone(),
        dst_port: tokens[ssrc_at - 1].parse().ok()?,
        ssrc: tokens[ssrc_at].clone(),
        payload: tokens[ssrc_at + 1..pct_at - 2].join(" "),
        packets,
        lost,
        mean_jitter_ms: mean_jitter_ms.max(0.0),
    })
}

fn endpoint(ip: &str, port: u16) -> String {
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V6(_)) => format!("[{}]:{}", ip, port),
        _ => format!("{}:{}", ip, port),
    }
}

fn parse_ssrc(value: &str) -> Option<u32> {
    let hex = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(hex, 16).ok()
}

/// SSRC plus endpoint 4-tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StreamKey {
    ssrc: u32,
    src_ip: String,
    src_port: u16,
    dst_ip: String,
    dst_port: u16,
}

#[derive(Debug, Default)]
struct ByteTally {
    bytes: u64,
    first: Option<DateTime<Utc>>,
    last: Option<DateTime<Utc>>,
}

impl ByteTally {
    fn bitrate_kbps(&self) -> Option<f64> {
        let (first, last) = (self.first?, self.last?);
        let span = seconds_between(first, last);
        if self.bytes == 0 || span <= 0.0 {
            return None;
        }
        Some(self.bytes as f64 * 8.0 / span / 1000.0)
    }
}

/// Sum frame bytes per stream from `RtpBytes` rows.
fn tally_bytes<I>(rows: I) -> HashMap<StreamKey, ByteTally>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut tallies: HashMap<StreamKey, ByteTally> = HashMap::new();

    for row in rows {
        let field = |i: usize| row.get(i).map(|s| s.trim()).unwrap_or("");
        let parsed = (|| {
            let key = StreamKey {
                ssrc: parse_ssrc(field(5))?,
                src_ip: field(1).to_string(),
                src_port: field(2).parse().ok()?,
                dst_ip: field(3).to_string(),
                dst_port: field(4).parse().ok()?,
            };
            let len: u64 = field(6).parse().ok()?;
            Some((key, len))
        })();
        let Some((key, len)) = parsed else {
            continue;
        };

        let tally = tallies.entry(key).or_default();
        tally.bytes += len;
        if let Some(ts) = parse_epoch(field(0)) {
            tally.first = Some(tally.first.map_or(ts, |t| t.min(ts)));
            tally.last = Some(tally.last.map_or(ts, |t| t.max(ts)));
        }
    }

    tallies
}

/// Scores the RTP streams of a per-call capture.
pub struct RtpQualityAnalyzer<'a> {
    extractor: &'a dyn FieldExtractor,
    codec: CodecClass,
}

impl<'a> RtpQualityAnalyzer<'a> {
    pub fn new(extractor: &'a dyn FieldExtractor, codec: CodecClass) -> Self {
        Self { extractor, codec }
    }

    /// One [`RtpStreamStats`] per stream found in `capture`.
    pub fn analyze(&self, capture: &Path) -> Vec<RtpStreamStats> {
        let rows = self.extractor.extract(capture, ExtractionProfile::RtpStreams);
        let tallies = tally_bytes(self.extractor.extract(capture, ExtractionProfile::RtpBytes));
        self.score_rows(rows, &tallies)
    }

    fn score_rows<I>(&self, rows: I, tallies: &HashMap<StreamKey, ByteTally>) -> Vec<RtpStreamStats>
    where
        I: IntoIterator<Item = Vec<String>>,
    {
        let mut stats = Vec::new();

        for tokens in rows {
            let Some(row) = parse_stream_row(&tokens) else {
                tracing::debug!(row = %tokens.join(" "), "Skipping malformed stream row");
                continue;
            };

            let loss_pct =
                (row.lost as f64 * 100.0 / row.packets.max(1) as f64).clamp(0.0, 100.0);
            let mos = estimate_mos(loss_pct, row.mean_jitter_ms, self.codec);
            let bitrate_kbps = parse_ssrc(&row.ssrc)
                .map(|ssrc| StreamKey {
                    ssrc,
                    src_ip: row.src_ip.clone(),
                    src_port: row.src_port,
                    dst_ip: row.dst_ip.clone(),
                    dst_port: row.dst_port,
                })
                .and_then(|key| tallies.get(&key))
                .and_then(ByteTally::bitrate_kbps);

            stats.push(RtpStreamStats {
                ssrc: row.ssrc,
                src_endpoint: endpoint(&row.src_ip, row.src_port),
                dst_endpoint: endpoint(&row.dst_ip, row.dst_port),
                packet_count: row.packets,
                lost_count: row.lost,
                loss_pct,
                jitter_ms: row.mean_jitter_ms,
                bitrate_kbps,
                payload_type: row.payload,
                mos,
                quality: QualityLevel::from_mos(mos),
            });
        }

        tracing::debug!(streams = stats.len(), "Scored RTP streams");
        stats
    }
}
