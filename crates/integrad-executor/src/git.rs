//! Fetching job sources with git.

use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Clone `source` into `dir` and check out `version`.
/// On failure returns the output of the failing git command.
pub(crate) async fn fetch(source: &str, version: &str, dir: &Path) -> Result<(), String> {
    git(dir, &["clone", source, "."]).await?;
    git(dir, &["checkout", version]).await
}

async fn git(cwd: &Path, args: &[&str]) -> Result<(), String> {
    debug!(cwd = %cwd.display(), args = ?args, "Running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_TERMINAL_PROMPT", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| format!("failed to run git: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let mut message = String::from_utf8_lossy(&output.stderr).into_owned();
    message.push_str(&String::from_utf8_lossy(&output.stdout));
    if message.trim().is_empty() {
        message = format!("git {} exited with {}", args.join(" "), output.status);
    }
    Err(message)
}
