//! Bounded execution of external tools.
//!
//! The engine is synchronous, so the runner owns a current-thread tokio
//! runtime and blocks on each child process. A child that outlives its
//! timeout is killed when its future is dropped.

use crate::error::{Error, Result};
use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

/// Captured output of a successful tool run.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs external programs with a timeout.
pub struct ToolRunner {
    runtime: tokio::runtime::Runtime,
}

impl ToolRunner {
    pub fn new() -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Tool {
                tool: "runtime".to_string(),
                message: format!("failed to create runtime: {}", e),
            })?;
        Ok(Self { runtime })
    }

    /// Run `program` to completion.
    ///
    /// Spawn failure, timeout, and non-zero exit all map to [`Error::Tool`].
    pub fn run<I, S>(&self, program: &Path, args: I, timeout: Duration) -> Result<ToolOutput>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let tool = tool_name(program);
        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.runtime.block_on(async {
            let child = command.spawn().map_err(|e| Error::Tool {
                tool: tool.clone(),
                message: if e.kind() == std::io::ErrorKind::NotFound {
                    "not installed".to_string()
                } else {
                    format!("failed to start: {}", e)
                },
            })?;

            let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(Error::Tool {
                        tool: tool.clone(),
                        message: format!("timed out after {}s", timeout.as_secs()),
                    })
                }
            };

            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            if !output.status.success() {
                let detail = stderr.lines().next().unwrap_or("").trim();
                return Err(Error::Tool {
                    tool: tool.clone(),
                    message: format!("exited with {}: {}", output.status, detail),
                });
            }

            Ok::<_, Error>(ToolOutput {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr,
            })
        })
    }
}

fn tool_name(program: &Path) -> String {
    program
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.display().to_string())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn test_missing_tool_is_tool_error() {
        let runner = ToolRunner::new().unwrap();
        let err = runner
            .run(
                Path::new("/nonexistent/voipscope-tshark"),
                ["-v"],
                Duration::from_secs(5),
            )
            .unwrap_err();
        match err {
            Error::Tool { tool, message } => {
                assert_eq!(tool, "voipscope-tshark");
                assert_eq!(message, "not installed");
            }
            other => panic!("expected tool error, got {other:?}"),
        }
    }

    #[test]
    fn test_successful_run_captures_stdout() {
        let runner = ToolRunner::new().unwrap();
        let output = runner
            .run(Path::new("sh"), ["-c", "printf 'a\\tb\\n'"], Duration::from_secs(5))
            .unwrap();
        assert_eq!(output.stdout, "a\tb\n");
    }

    #[test]
    fn test_nonzero_exit_is_tool_error() {
        let runner = ToolRunner::new().unwrap();
        let err = runner
            .run(
                Path::new("sh"),
                ["-c", "echo boom >&2; exit 2"],
                Duration::from_secs(5),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Tool { ref message, .. } if message.contains("boom")));
    }

    #[test]
    fn test_timeout_is_tool_error() {
        let runner = ToolRunner::new().unwrap();
        let err = runner
            .run(Path::new("sh"), ["-c", "sleep 5"], Duration::from_millis(200))
            .unwrap_err();
        assert!(matches!(err, Error::Tool { ref message, .. } if message.contains("timed out")));
    }
}
