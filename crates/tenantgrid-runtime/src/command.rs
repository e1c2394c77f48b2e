//! External command execution with a hard timeout.

use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{RuntimeError, RuntimeResult};

/// Human-readable rendering of a command for logs and errors.
pub(crate) fn describe(cmd: &Command) -> String {
    let std = cmd.as_std();
    let mut parts = vec![std.get_program().to_string_lossy().into_owned()];
    parts.extend(std.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` to completion, killing it if it outlives `timeout`.
/// Non-zero exit is not an error here; see [`expect_success`].
pub(crate) async fn run(mut cmd: Command, timeout: Duration) -> RuntimeResult<Output> {
    let label = describe(&cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    debug!(command = %label, "running");
    match tokio::time::timeout(timeout, cmd.output()).await {
        Err(_) => Err(RuntimeError::Timeout {
            command: label,
            after: timeout,
        }),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            let program = cmd.as_std().get_program().to_string_lossy().into_owned();
            Err(RuntimeError::Unavailable(program))
        }
        Ok(Err(e)) => Err(RuntimeError::Spawn {
            command: label,
            message: e.to_string(),
        }),
        Ok(Ok(output)) => Ok(output),
    }
}

/// Run `cmd` and fail on a non-zero exit status.
pub(crate) async fn run_checked(cmd: Command, timeout: Duration) -> RuntimeResult<Output> {
    let label = describe(&cmd);
    let output = run(cmd, timeout).await?;
    expect_success(&label, output)
}

pub(crate) fn expect_success(label: &str, output: Output) -> RuntimeResult<Output> {
    if output.status.success() {
        return Ok(output);
    }
    Err(RuntimeError::CommandFailed {
        command: label.to_string(),
        status: output
            .status
            .code()
            .map(|c| format!("status {c}"))
            .unwrap_or_else(|| "signal".to_string()),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Whether `program` resolves to an executable.
pub(crate) async fn program_exists(program: &str) -> bool {
    if program.contains('/') {
        return std::path::Path::new(program).is_file();
    }
    let mut cmd = Command::new("which");
    cmd.arg(program);
    matches!(run(cmd, Duration::from_secs(5)).await, Ok(out) if out.status.success())
}
