//! Runs external tools with a timeout and turns their exit code and stderr
//! into a structured failure.

use std::fmt;
use std::io;
use std::process::{ExitStatus, Output, Stdio};
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// Why an external tool invocation did not succeed
#[derive(Debug)]
pub enum ToolFailure {
    /// The binary could not be started (missing, not executable, ...)
    Spawn(io::Error),
    /// The process was killed after the timeout expired
    TimedOut(Duration),
    /// The process exited unsuccessfully
    Exit { status: ExitStatus, stderr: String },
}

impl fmt::Display for ToolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolFailure::Spawn(e) => write!(f, "failed to execute: {}", e),
            ToolFailure::TimedOut(after) => write!(f, "timed out after {}s", after.as_secs()),
            ToolFailure::Exit { status, stderr } if stderr.is_empty() => {
                write!(f, "exited with {}", status)
            }
            ToolFailure::Exit { status, stderr } => {
                write!(f, "exited with {}: {}", status, stderr)
            }
        }
    }
}

/// Bytes of stderr kept in a failure, counted from the end
const STDERR_TAIL: usize = 4096;

/// Run `cmd` to completion, killing it if it outlives `timeout`
pub async fn run_tool(
    tool: &str,
    mut cmd: Command,
    timeout: Duration,
) -> Result<Output, ToolFailure> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!("Running {}: {:?}", tool, cmd);
    let start_time = Instant::now();

    let output = match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => return Err(ToolFailure::TimedOut(timeout)),
        Ok(Err(e)) => return Err(ToolFailure::Spawn(e)),
        Ok(Ok(output)) => output,
    };

    debug!(
        "{} finished in {:.1}s with {}",
        tool,
        start_time.elapsed().as_secs_f64(),
        output.status
    );

    if !output.status.success() {
        return Err(ToolFailure::Exit {
            status: output.status,
            stderr: stderr_tail(&output.stderr),
        });
    }

    Ok(output)
}

/// Last `STDERR_TAIL` bytes of stderr; the end is where tools say what broke
fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL);
    let tail = String::from_utf8_lossy(&stderr[start..]).trim().to_string();
    if start > 0 {
        format!("...{}", tail)
    } else {
        tail
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_success() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo ok"]);
        let output = run_tool("sh", cmd, Duration::from_secs(10)).await.unwrap();
        assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "ok");
    }

    #[tokio::test]
    async fn test_exit_failure_carries_stderr() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo broken >&2; exit 3"]);
        match run_tool("sh", cmd, Duration::from_secs(10)).await {
            Err(ToolFailure::Exit { status, stderr }) => {
                assert_eq!(status.code(), Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_stderr_is_truncated_to_tail() {
        let mut noisy = vec![b'a'; STDERR_TAIL * 3];
        noisy.extend_from_slice(b"\nInvalid data found\n");
        let tail = stderr_tail(&noisy);
        assert!(tail.len() <= STDERR_TAIL + 3);
        assert!(tail.starts_with("..."));
        assert!(tail.ends_with("Invalid data found"));

        assert_eq!(stderr_tail(b" short \n"), "short");
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let cmd = Command::new("/definitely/not/here/tool");
        let result = run_tool("tool", cmd, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(ToolFailure::Spawn(_))));
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let result = run_tool("sleep", cmd, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(ToolFailure::TimedOut(_))));
    }
}
