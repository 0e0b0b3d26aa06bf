//! `tshark`-backed field extractor.

use super::{ExtractionProfile, FieldExtractor, FieldRows, ToolRunner};
use crate::config::ToolsConfig;
use crate::error::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Extracts profile rows by running `tshark` against a capture file.
pub struct TsharkExtractor {
    tshark: PathBuf,
    timeout: Duration,
    rtp_heuristics: bool,
    runner: ToolRunner,
}

impl TsharkExtractor {
    pub fn new(tools: &ToolsConfig) -> Result<Self> {
        Ok(Self {
            tshark: tools.tshark.clone(),
            timeout: tools.extract_timeout(),
            rtp_heuristics: tools.rtp_heuristics,
            runner: ToolRunner::new()?,
        })
    }

    /// Command-line arguments for one profile run.
    pub fn args(&self, capture: &Path, profile: ExtractionProfile) -> Vec<String> {
        let mut args = vec!["-n".to_string(), "-r".to_string(), capture.display().to_string()];

        if self.rtp_heuristics
            && matches!(
                profile,
                ExtractionProfile::RtpStreams | ExtractionProfile::RtpBytes
            )
        {
            args.push("-o".to_string());
            args.push("rtp.heuristic_rtp:TRUE".to_string());
        }

        match profile {
            ExtractionProfile::RtpStreams => {
                args.extend(["-q", "-z", "rtp,streams"].map(String::from));
            }
            _ => {
                if let Some(filter) = profile.display_filter() {
                    args.push("-Y".to_string());
                    args.push(filter.to_string());
                }
                args.extend(["-T", "fields", "-E", "separator=/t"].map(String::from));
                if profile == ExtractionProfile::Sdp {
                    args.push("-E".to_string());
                    args.push("aggregator=|".to_string());
                }
                for field in profile.fields() {
                    args.push("-e".to_string());
                    args.push((*field).to_string());
                }
            }
        }

        args
    }
}

impl FieldExtractor for TsharkExtractor {
    fn extract(&self, capture: &Path, profile: ExtractionProfile) -> FieldRows {
        let args = self.args(capture, profile);
        tracing::debug!(
            capture = %capture.display(),
            profile = %profile,
            "Running field extraction"
        );

        match self.runner.run(&self.tshark, &args, self.timeout) {
            Ok(output) => match profile {
                ExtractionProfile::RtpStreams => FieldRows::from_stream_report(&output.stdout),
                _ => FieldRows::new(output.stdout, profile.row_split()),
            },
            Err(e) => {
                tracing::warn!(
                    capture = %capture.display(),
                    profile = %profile,
                    error = %e,
                    "Field extraction failed, treating as empty"
                );
                FieldRows::empty()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor(rtp_heuristics: bool) -> TsharkExtractor {
        TsharkExtractor::new(&ToolsConfig {
            tshark: PathBuf::from("/nonexistent/tshark"),
            rtp_heuristics,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_sip_args() {
        let args = extractor(true).args(Path::new("/tmp/c.pcapng"), ExtractionProfile::Sip);
        assert_eq!(&args[..3], &["-n", "-r", "/tmp/c.pcapng"]);
        assert!(args.windows(2).any(|w| w == ["-Y", "sip"]));
        assert!(args.windows(2).any(|w| w == ["-e", "sip.Call-ID"]));
        assert_eq!(args.iter().filter(|a| *a == "-e").count(), 11);
        assert!(!args.iter().any(|a| a.contains("heuristic")));
    }

    #[test]
    fn test_sdp_args_use_aggregator() {
        let args = extractor(true).args(Path::new("c.pcap"), ExtractionProfile::Sdp);
        assert!(args.windows(2).any(|w| w == ["-E", "aggregator=|"]));
    }

    #[test]
    fn test_stream_report_args() {
        let args = extractor(true).args(Path::new("c.pcap"), ExtractionProfile::RtpStreams);
        assert!(args.windows(2).any(|w| w == ["-z", "rtp,streams"]));
        assert!(args.contains(&"rtp.heuristic_rtp:TRUE".to_string()));

        let args = extractor(false).args(Path::new("c.pcap"), ExtractionProfile::RtpStreams);
        assert!(!args.contains(&"rtp.heuristic_rtp:TRUE".to_string()));
    }

    #[test]
    fn test_missing_tool_yields_empty_rows() {
        let rows = extractor(true).extract(Path::new("/tmp/missing.pcapng"), ExtractionProfile::Sip);
        assert_eq!(rows.count(), 0);
    }
}
