//! System shell invocation
//!
//! Build rules and hook commands are shell strings. They run through `sh -c`
//! (or `cmd /C` on Windows hosts) with output captured.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::{ExitStatus, Stdio};

use tokio::process::Command;

/// Captured result of a shell command
#[derive(Debug, Clone)]
pub struct ShellOutput {
    /// Exit status
    pub status: ExitStatus,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl ShellOutput {
    /// Whether the command exited successfully
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Exit status as shown to users
    pub fn status_label(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Build a command that runs `script` through the system shell
///
/// The child is killed if the returned future is dropped, so a cancelled
/// build does not leave processes behind.
pub fn command(script: &str) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(script);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    };
    cmd.kill_on_drop(true);
    cmd
}

/// Run `script` in `cwd` with `env` added to the inherited environment
pub async fn run(
    script: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
) -> std::io::Result<ShellOutput> {
    let output = command(script)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    Ok(ShellOutput {
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Last `lines` lines of `text`
pub fn tail(text: &str, lines: usize) -> String {
    let all: Vec<&str> = text.trim_end().lines().collect();
    let start = all.len().saturating_sub(lines);
    all[start..].join("\n")
}
