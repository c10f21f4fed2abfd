//! One-shot external command execution with a hard timeout.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::trace;

use super::window_service::TransportError;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program args..` and waits at most `timeout` for it to exit.
///
/// The child is killed if the timeout fires. Non-UTF-8 stdout is a
/// `DecodingFailed`; a non-zero exit is a `NonZeroExit` carrying stderr.
pub async fn run(
    program: &str,
    args: &[String],
    timeout: Duration,
) -> Result<CommandOutput, TransportError> {
    let command = describe(program, args);
    trace!(%command, "running");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|err| TransportError::LaunchFailed {
            command: command.clone(),
            reason: err.to_string(),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(err)) => {
            return Err(TransportError::LaunchFailed { command, reason: err.to_string() });
        }
        Err(_) => {
            return Err(TransportError::TimedOut {
                command,
                timeout_ms: timeout.as_millis() as u64,
            });
        }
    };

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(TransportError::NonZeroExit {
            command,
            status: output.status.code().unwrap_or(-1),
            stderr,
        });
    }

    let stdout = String::from_utf8(output.stdout).map_err(|err| {
        TransportError::DecodingFailed { command, reason: err.to_string() }
    })?;
    Ok(CommandOutput { stdout, stderr })
}

pub fn describe(program: &str, args: &[String]) -> String {
    let mut out = program.to_string();
    for arg in args {
        out.push(' ');
        out.push_str(arg);
    }
    out
}
