// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Bounded execution of external tools

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum RunFailure {
    Spawn(std::io::Error),
    TimedOut,
}

/// Human readable command line, used in errors and logs
pub fn display_command<S: AsRef<OsStr>>(program: &Path, args: &[S]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Run `program` to completion, killing it if `timeout` elapses first
pub async fn run_command<S: AsRef<OsStr>>(
    program: &Path,
    args: &[S],
    timeout: Option<Duration>,
) -> Result<CommandOutput, RunFailure> {
    debug!("Running {}", display_command(program, args));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = match timeout {
        Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
            Ok(result) => result.map_err(RunFailure::Spawn)?,
            Err(_) => return Err(RunFailure::TimedOut),
        },
        None => cmd.output().await.map_err(RunFailure::Spawn)?,
    };

    Ok(CommandOutput {
        success: output.status.success(),
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_command() {
        assert_eq!(
            display_command(Path::new("/usr/bin/virsh"), &["-c", "qemu:///session", "list"]),
            "/usr/bin/virsh -c qemu:///session list"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_captures_output_and_status() {
        let out = run_command(Path::new("sh"), &["-c", "echo hi; echo err >&2; exit 3"], None)
            .await
            .unwrap();
        assert!(!out.success);
        assert_eq!(out.status, Some(3));
        assert_eq!(out.stdout, "hi\n");
        assert_eq!(out.stderr, "err");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_kills_command() {
        let result = run_command(Path::new("sh"), &["-c", "sleep 5"], Some(Duration::from_millis(50))).await;
        assert!(matches!(result, Err(RunFailure::TimedOut)));
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_failure() {
        let result = run_command::<&str>(Path::new("/nonexistent/oswatcher-tool"), &[], None).await;
        assert!(matches!(result, Err(RunFailure::Spawn(_))));
    }
}
