//! Per-call capture export.
//!
//! Produces a small capture holding one dialog's SIP signaling plus the RTP
//! streams its SDP negotiated. Intermediate sub-captures live in a scratch
//! directory that is removed on every exit path, and the final file is
//! written under a unique temporary name and renamed into place.

use crate::config::ToolsConfig;
use crate::error::{Error, Result};
use crate::extract::{FieldExtractor, ToolRunner};
use crate::media::MediaCorrelator;
use crate::types::MediaDescriptor;
use serde::Serialize;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Packet-level operations the exporter needs.
pub trait PacketTools: Send + Sync {
    /// Write the packets of `source` matching `display_filter` to `output`.
    fn filter(&self, source: &Path, display_filter: &str, output: &Path) -> Result<()>;

    /// Merge `inputs` chronologically into `output`.
    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()>;

    /// Number of packets in `capture`.
    fn packet_count(&self, capture: &Path) -> Result<usize>;
}

/// [`PacketTools`] backed by `tshark` and `mergecap`.
pub struct TsharkTools {
    tshark: PathBuf,
    mergecap: PathBuf,
    timeout: Duration,
    runner: ToolRunner,
}

impl TsharkTools {
    pub fn new(tools: &ToolsConfig) -> Result<Self> {
        Ok(Self {
            tshark: tools.tshark.clone(),
            mergecap: tools.mergecap.clone(),
            timeout: tools.export_timeout(),
            runner: ToolRunner::new()?,
        })
    }
}

impl PacketTools for TsharkTools {
    fn filter(&self, source: &Path, display_filter: &str, output: &Path) -> Result<()> {
        let args = [
            "-n".into(),
            "-r".into(),
            source.as_os_str().to_owned(),
            "-Y".into(),
            display_filter.into(),
            "-w".into(),
            output.as_os_str().to_owned(),
        ];
        self.runner.run(&self.tshark, &args, self.timeout)?;
        Ok(())
    }

    fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
        let mut args: Vec<std::ffi::OsString> = vec!["-w".into(), output.as_os_str().to_owned()];
        args.extend(inputs.iter().map(|p| p.as_os_str().to_owned()));
        self.runner.run(&self.mergecap, &args, self.timeout)?;
        Ok(())
    }

    fn packet_count(&self, capture: &Path) -> Result<usize> {
        let args = [
            "-n".into(),
            "-r".into(),
            capture.as_os_str().to_owned(),
            "-T".into(),
            "fields".into(),
            "-e".into(),
            std::ffi::OsString::from("frame.number"),
        ];
        let output = self.runner.run(&self.tshark, &args, self.timeout)?;
        Ok(output.stdout.lines().filter(|l| !l.trim().is_empty()).count())
    }
}

/// Why an export produced no file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum ExportFailure {
    /// The capture holds no SIP packets for the dialog
    NoSignaling,
    /// A filter or merge step failed
    ToolFailed(String),
}

impl std::fmt::Display for ExportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExportFailure::NoSignaling => write!(f, "no SIP packets for this dialog"),
            ExportFailure::ToolFailed(detail) => write!(f, "tool failed: {}", detail),
        }
    }
}

/// Result of one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ExportOutcome {
    /// The output file exists and is non-empty. `skipped_streams` counts
    /// media descriptors whose RTP filter failed or matched nothing.
    Exported {
        path: PathBuf,
        included_streams: usize,
        skipped_streams: usize,
    },
    Failed { reason: ExportFailure },
}

impl ExportOutcome {
    pub fn is_exported(&self) -> bool {
        matches!(self, ExportOutcome::Exported { .. })
    }

    fn failed(reason: ExportFailure) -> Self {
        ExportOutcome::Failed { reason }
    }
}

/// Replace every character outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_file_name(dialog_id: &str) -> String {
    dialog_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Output path of a dialog's export inside `export_dir`.
pub fn export_path(export_dir: &Path, dialog_id: &str) -> PathBuf {
    export_dir.join(format!("call_{}.pcapng", sanitize_file_name(dialog_id)))
}

fn quote_filter_string(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Display filter selecting a dialog's SIP messages.
pub fn sip_filter(dialog_id: &str) -> String {
    format!("sip.Call-ID == {}", quote_filter_string(dialog_id))
}

/// Display filter selecting the RTP packets of a media descriptor.
///
/// Matches UDP packets with the port on either side, narrowed to the
/// announced address when it is a literal IPv4 or IPv6 address.
pub fn rtp_filter(descriptor: &MediaDescriptor) -> String {
    let port = format!("udp.port == {}", descriptor.port);
    match descriptor.ip.as_deref().map(|ip| (ip, ip.parse::<IpAddr>())) {
        Some((ip, Ok(IpAddr::V4(_)))) => format!("{} && ip.addr == {}", port, ip),
        Some((ip, Ok(IpAddr::V6(_)))) => format!("{} && ipv6.addr == {}", port, ip),
        _ => port,
    }
}

/// Exports one dialog from a capture.
pub struct CaptureExporter<'a> {
    tools: &'a dyn PacketTools,
    correlator: MediaCorrelator<'a>,
}

impl<'a> CaptureExporter<'a> {
    pub fn new(tools: &'a dyn PacketTools, extractor: &'a dyn FieldExtractor) -> Self {
        Self {
            tools,
            correlator: MediaCorrelator::new(extractor),
        }
    }

    /// Export `dialog_id` from `source` into `output`.
    ///
    /// Tool failures become [`ExportOutcome::Failed`]; only local I/O errors
    /// (scratch space, output directory, final rename) are returned as `Err`.
    pub fn export(&self, source: &Path, dialog_id: &str, output: &Path) -> Result<ExportOutcome> {
        let scratch = tempfile::Builder::new()
            .prefix("voipscope-export-")
            .tempdir()?;

        // (1) SIP signaling of the dialog
        let sip_capture = scratch.path().join("sip.pcapng");
        if let Err(e) = self.tools.filter(source, &sip_filter(dialog_id), &sip_capture) {
            tracing::warn!(dialog_id, error = %e, "SIP filter step failed");
            return Ok(ExportOutcome::failed(ExportFailure::ToolFailed(e.to_string())));
        }
        match self.tools.packet_count(&sip_capture) {
            Ok(0) => {
                tracing::info!(dialog_id, "No SIP packets for dialog");
                return Ok(ExportOutcome::failed(ExportFailure::NoSignaling));
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(dialog_id, error = %e, "Could not read SIP sub-capture");
                return Ok(ExportOutcome::failed(ExportFailure::ToolFailed(e.to_string())));
            }
        }

        // (2) negotiated media
        let descriptors = self.correlator.correlate(dialog_id, &sip_capture);

        // (3) RTP per distinct descriptor, always from the original capture
        let mut inputs = vec![sip_capture];
        let mut seen = HashSet::new();
        let mut skipped = 0usize;
        for descriptor in &descriptors {
            let filter = rtp_filter(descriptor);
            if !seen.insert(filter.clone()) {
                continue;
            }

            let rtp_capture = scratch.path().join(format!("rtp_{}.pcapng", seen.len()));
            let matched = self
                .tools
                .filter(source, &filter, &rtp_capture)
                .and_then(|_| self.tools.packet_count(&rtp_capture));
            match matched {
                Ok(0) => {
                    tracing::debug!(dialog_id, filter = %filter, "RTP filter matched nothing");
                    skipped += 1;
                }
                Ok(packets) => {
                    tracing::debug!(dialog_id, filter = %filter, packets, "RTP sub-capture");
                    inputs.push(rtp_capture);
                }
                Err(e) => {
                    tracing::warn!(dialog_id, filter = %filter, error = %e, "RTP filter step failed");
                    skipped += 1;
                }
            }
        }
        let included = inputs.len() - 1;

        // (4) merge through a unique temporary, then rename into place
        let output_dir = match output.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&output_dir)?;
        let staged = tempfile::Builder::new()
            .prefix(".call_")
            .suffix(".pcapng.part")
            .tempfile_in(&output_dir)?;

        if let Err(e) = self.tools.merge(&inputs, staged.path()) {
            tracing::warn!(dialog_id, error = %e, "Merge step failed");
            return Ok(ExportOutcome::failed(ExportFailure::ToolFailed(e.to_string())));
        }
        if std::fs::metadata(staged.path())?.len() == 0 {
            return Ok(ExportOutcome::failed(ExportFailure::ToolFailed(
                "merge produced an empty file".to_string(),
            )));
        }

        staged.persist(output).map_err(|e| Error::Io(e.error))?;

        tracing::info!(
            dialog_id,
            output = %output.display(),
            included_streams = included,
            skipped_streams = skipped,
            "Exported call capture"
        );

        Ok(ExportOutcome::Exported {
            path: output.to_path_buf(),
            included_streams: included,
            skipped_streams: skipped,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::{ExtractionProfile, FieldRows};
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Captures are text files, one line per packet. Filtering looks the
    /// display filter up in a table of canned results.
    #[derive(Default)]
    struct FakeTools {
        results: HashMap<String, std::result::Result<String, String>>,
        merge_fails: bool,
        written: Mutex<Vec<PathBuf>>,
    }

    impl FakeTools {
        fn with(mut self, filter: &str, packets: &str) -> Self {
            self.results.insert(filter.to_string(), Ok(packets.to_string()));
            self
        }

        fn failing(mut self, filter: &str) -> Self {
            self.results
                .insert(filter.to_string(), Err("exited with 2".to_string()));
            self
        }
    }

    impl PacketTools for FakeTools {
        fn filter(&self, _source: &Path, display_filter: &str, output: &Path) -> Result<()> {
            self.written.lock().unwrap().push(output.to_path_buf());
            match self.results.get(display_filter) {
                Some(Ok(packets)) => Ok(std::fs::write(output, packets)?),
                Some(Err(message)) => Err(Error::Tool {
                    tool: "tshark".to_string(),
                    message: message.clone(),
                }),
                None => Ok(std::fs::write(output, "")?),
            }
        }

        fn merge(&self, inputs: &[PathBuf], output: &Path) -> Result<()> {
            if self.merge_fails {
                return Err(Error::Tool {
                    tool: "mergecap".to_string(),
                    message: "not installed".to_string(),
                });
            }
            let mut merged = String::new();
            for input in inputs {
                merged.push_str(&std::fs::read_to_string(input)?);
            }
            Ok(std::fs::write(output, merged)?)
        }

        fn packet_count(&self, capture: &Path) -> Result<usize> {
            Ok(std::fs::read_to_string(capture)?.lines().count())
        }
    }

    struct SdpRows(&'static str);

    impl FieldExtractor for SdpRows {
        fn extract(&self, _capture: &Path, profile: ExtractionProfile) -> FieldRows {
            FieldRows::new(self.0.to_string(), profile.row_split())
        }
    }

    const OFFER_ANSWER: &str = "10.0.0.1\taudio\t40000\tRTP/AVP\tPCMU\n\
                                10.0.0.2\taudio\t50000\tRTP/AVP\tPCMU\n\
                                10.0.0.2\taudio\t50000\tRTP/AVP\tPCMU\n";

    fn assert_scratch_removed(tools: &FakeTools) {
        for path in tools.written.lock().unwrap().iter() {
            assert!(!path.exists(), "{} should be removed", path.display());
            assert!(!path.parent().unwrap().exists());
        }
    }

    #[test]
    fn test_sanitize_and_paths() {
        assert_eq!(sanitize_file_name("a1b2@10.0.0.1"), "a1b2_10.0.0.1");
        assert_eq!(sanitize_file_name("x/../y z"), "x_.._y_z");
        assert_eq!(
            export_path(Path::new("/exports"), "abc@h"),
            PathBuf::from("/exports/call_abc_h.pcapng")
        );
    }

    #[test]
    fn test_filters() {
        assert_eq!(sip_filter("abc@h"), "sip.Call-ID == \"abc@h\"");
        assert_eq!(sip_filter("a\"b\\c"), "sip.Call-ID == \"a\\\"b\\\\c\"");

        let mut d = MediaDescriptor {
            ip: Some("10.0.0.1".to_string()),
            port: 40000,
            transport: "RTP/AVP".to_string(),
            payload_type: None,
            media: None,
        };
        assert_eq!(rtp_filter(&d), "udp.port == 40000 && ip.addr == 10.0.0.1");
        d.ip = Some("2001:db8::1".to_string());
        assert_eq!(rtp_filter(&d), "udp.port == 40000 && ipv6.addr == 2001:db8::1");
        d.ip = Some("media.example.com".to_string());
        assert_eq!(rtp_filter(&d), "udp.port == 40000");
        d.ip = None;
        assert_eq!(rtp_filter(&d), "udp.port == 40000");
    }

    #[test]
    fn test_export_merges_sip_and_rtp() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "call-1");
        let tools = FakeTools::default()
            .with(&sip_filter("call-1"), "INVITE\n200\n")
            .with("udp.port == 40000 && ip.addr == 10.0.0.1", "rtp-a\n")
            .with("udp.port == 50000 && ip.addr == 10.0.0.2", "rtp-b\n");
        let extractor = SdpRows(OFFER_ANSWER);

        let outcome = CaptureExporter::new(&tools, &extractor)
            .export(Path::new("src.pcapng"), "call-1", &output)
            .unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::Exported {
                path: output.clone(),
                included_streams: 2,
                skipped_streams: 0,
            }
        );
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "INVITE\n200\nrtp-a\nrtp-b\n"
        );
        assert_scratch_removed(&tools);
        // Only the final file is left in the output directory
        assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_partial_export_counts_skipped_streams() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "call-1");
        let tools = FakeTools::default()
            .with(&sip_filter("call-1"), "INVITE\n")
            .failing("udp.port == 40000 && ip.addr == 10.0.0.1");
        let extractor = SdpRows(OFFER_ANSWER);

        let outcome = CaptureExporter::new(&tools, &extractor)
            .export(Path::new("src.pcapng"), "call-1", &output)
            .unwrap();

        match outcome {
            ExportOutcome::Exported {
                included_streams,
                skipped_streams,
                ..
            } => {
                assert_eq!(included_streams, 0);
                assert_eq!(skipped_streams, 2);
            }
            other => panic!("expected export, got {other:?}"),
        }
        assert_eq!(std::fs::read_to_string(&output).unwrap(), "INVITE\n");
        assert_scratch_removed(&tools);
    }

    #[test]
    fn test_no_signaling_fails() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "ghost");
        let tools = FakeTools::default();
        let extractor = SdpRows("");

        let outcome = CaptureExporter::new(&tools, &extractor)
            .export(Path::new("src.pcapng"), "ghost", &output)
            .unwrap();

        assert_eq!(
            outcome,
            ExportOutcome::Failed {
                reason: ExportFailure::NoSignaling
            }
        );
        assert!(!output.exists());
        assert_scratch_removed(&tools);
    }

    #[test]
    fn test_sip_filter_error_is_tool_failure() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "call-1");
        let tools = FakeTools::default().failing(&sip_filter("call-1"));
        let extractor = SdpRows("");

        let outcome = CaptureExporter::new(&tools, &extractor)
            .export(Path::new("src.pcapng"), "call-1", &output)
            .unwrap();

        assert!(matches!(
            outcome,
            ExportOutcome::Failed {
                reason: ExportFailure::ToolFailed(_)
            }
        ));
        assert_scratch_removed(&tools);
    }

    #[test]
    fn test_merge_failure_leaves_no_output() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "call-1");
        let tools = FakeTools {
            merge_fails: true,
            ..Default::default()
        }
        .with(&sip_filter("call-1"), "INVITE\n");
        let extractor = SdpRows("");

        let outcome = CaptureExporter::new(&tools, &extractor)
            .export(Path::new("src.pcapng"), "call-1", &output)
            .unwrap();

        assert!(!outcome.is_exported());
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 0);
        assert_scratch_removed(&tools);
    }

    #[test]
    fn test_repeated_export_replaces_file() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "call-1");
        let tools = FakeTools::default().with(&sip_filter("call-1"), "INVITE\n");
        let extractor = SdpRows("");
        let exporter = CaptureExporter::new(&tools, &extractor);

        for _ in 0..3 {
            let outcome = exporter
                .export(Path::new("src.pcapng"), "call-1", &output)
                .unwrap();
            assert!(outcome.is_exported());
        }
        assert_eq!(std::fs::read_dir(out_dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_concurrent_exports_of_same_dialog() {
        let out_dir = tempfile::tempdir().unwrap();
        let output = export_path(out_dir.path(), "call-1");
        let tools = FakeTools::default()
            .with(&sip_filter("call-1"), "INVITE\n200\n")
            .with("udp.port == 40000 && ip.addr == 10.0.0.1", "rtp-a\n")
            .with("udp.port == 50000 && ip.addr == 10.0.0.2", "rtp-b\n");
        let extractor = SdpRows(OFFER_ANSWER);
        let barrier = std::sync::Barrier::new(2);

        let outcomes: Vec<ExportOutcome> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..2)
                .map(|_| {
                    scope.spawn(|| {
                        let exporter = CaptureExporter::new(&tools, &extractor);
                        barrier.wait();
                        exporter
                            .export(Path::new("src.pcapng"), "call-1", &output)
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert!(outcomes.iter().all(ExportOutcome::is_exported));
        // Whichever rename lands last wins; the file is never a mix of both
        assert_eq!(
            std::fs::read_to_string(&output).unwrap(),
            "INVITE\n200\nrtp-a\nrtp-b\n"
        );
        let names: Vec<String> = std::fs::read_dir(out_dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["call_call-1.pcapng".to_string()]);
        assert!(!names.iter().any(|n| n.ends_with(".part")));
        assert_scratch_removed(&tools);
    }
}
