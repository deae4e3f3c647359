//! Post-commit command.

use std::process::{Command, Stdio};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookStatus {
    Succeeded,
    /// Non-zero exit (or killed by a signal, `code == None`).
    Failed { code: Option<i32> },
    SpawnFailed,
}

/// Run `command` through `sh -c` and wait for the shell to exit.
///
/// The command's stdout is discarded and its stderr goes to ours. Neither is
/// piped, so a daemon the command leaves running in the background does not
/// hold us up. The exit status is only logged. Nothing is rolled back when
/// the command fails.
pub fn run_post_exec(command: &str) -> HookStatus {
    tracing::info!(exec = %command, "running post-commit command");
    let status = match Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::inherit())
        .status()
    {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!(exec = %command, error = %e, "failed to start post-commit command");
            return HookStatus::SpawnFailed;
        }
    };

    if status.success() {
        tracing::info!(exec = %command, exit = 0, "post-commit command finished");
        HookStatus::Succeeded
    } else {
        tracing::warn!(exec = %command, exit = ?status.code(), "post-commit command failed");
        HookStatus::Failed {
            code: status.code(),
        }
    }
}
