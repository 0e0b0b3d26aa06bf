//! Output helpers shared by `voipscope` and `voipscope-analyze`.

use anyhow::Result;
use clap::ValueEnum;
use serde::Serialize;
use voipscope_core::RtpStreamStats;

/// Output format for tabular commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One row per scored RTP stream.
pub fn stream_table(stats: &[RtpStreamStats]) -> String {
    let mut out = format!(
        "{:<12}  {:<22}  {:<22}  {:>7}  {:>6}  {:>6}  {:>7}  {:>8}  {:>4}  {}\n",
        "SSRC", "SOURCE", "DESTINATION", "PACKETS", "LOST", "LOSS%", "JITTER", "KBPS", "MOS", "QUALITY"
    );

    for s in stats {
        out.push_str(&format!(
            "{:<12}  {:<22}  {:<22}  {:>7}  {:>6}  {:>6.2}  {:>7.2}  {:>8}  {:>4.2}  {}\n",
            s.ssrc,
            s.src_endpoint,
            s.dst_endpoint,
            s.packet_count,
            s.lost_count,
            s.loss_pct,
            s.jitter_ms,
            s.bitrate_kbps
                .map(|b| format!("{:.1}", b))
                .unwrap_or_else(|| "-".to_string()),
            s.mos,
            s.quality
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use voipscope_core::QualityLevel;

    #[test]
    fn test_stream_table_rows() {
        let stats = vec![RtpStreamStats {
            ssrc: "0x1234abcd".to_string(),
            src_endpoint: "10.0.0.1:40000".to_string(),
            dst_endpoint: "10.0.0.2:50000".to_string(),
            packet_count: 1000,
            lost_count: 10,
            loss_pct: 1.0,
            jitter_ms: 5.0,
            bitrate_kbps: None,
            payload_type: "g711U".to_string(),
            mos: 4.4,
            quality: QualityLevel::Excellent,
        }];

        let table = stream_table(&stats);
        let lines: Vec<&str> = table.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("SSRC"));
        assert!(lines[1].starts_with("0x1234abcd"));
        assert!(lines[1].contains("1.00"));
        assert!(lines[1].contains("4.40"));
        assert!(lines[1].ends_with("excellent"));
    }
}
