//! Shell command execution for `exec` requests.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;
use tracing::info;

use vm0_proto::ExecResult;

/// Run `command` under `sh -c` with a wall-clock budget.
///
/// Every outcome is reported in-band so the host receives exactly one
/// `exec_result` per request: a timeout maps to exit code 124, a spawn
/// failure to exit code 1. Output is captured as UTF-8 with replacement for
/// invalid bytes.
pub async fn run_command(command: &str, timeout_ms: u64) -> ExecResult {
    let preview: String = command.chars().take(100).collect();
    info!(
        command = %preview,
        truncated = command.chars().count() > 100,
        timeout_ms,
        "executing command"
    );

    let child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let child = match child {
        Ok(child) => child,
        Err(e) => {
            return ExecResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: format!("Error: {e}"),
            }
        }
    };

    match timeout(Duration::from_millis(timeout_ms), child.wait_with_output()).await {
        Ok(Ok(output)) => ExecResult {
            exit_code: exit_code(&output.status),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Ok(Err(e)) => ExecResult {
            exit_code: 1,
            stdout: String::new(),
            stderr: format!("Error: {e}"),
        },
        // The dropped future kills the child (kill_on_drop).
        Err(_) => ExecResult {
            exit_code: 124,
            stdout: String::new(),
            stderr: "Timeout".to_string(),
        },
    }
}

fn exit_code(status: &std::process::ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let result = run_command("echo hi", 5_000).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "hi\n");
        assert_eq!(result.stderr, "");
    }

    #[tokio::test]
    async fn reports_nonzero_exit_codes() {
        let result = run_command("exit 3", 5_000).await;
        assert_eq!(result.exit_code, 3);
    }

    #[tokio::test]
    async fn captures_stderr() {
        let result = run_command("echo oops >&2", 5_000).await;
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stderr, "oops\n");
    }

    #[tokio::test]
    async fn shell_reports_missing_commands() {
        // The shell itself launches fine; the lookup failure comes back as
        // its exit status.
        let result = run_command("definitely-not-a-binary-here", 5_000).await;
        assert_eq!(result.exit_code, 127);
    }

    #[tokio::test]
    async fn timeout_maps_to_124() {
        let result = run_command("sleep 5", 50).await;
        assert_eq!(result.exit_code, 124);
        assert_eq!(result.stdout, "");
        assert_eq!(result.stderr, "Timeout");
    }
}
