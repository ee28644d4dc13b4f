//! Running shell commands with their output streamed into the job log.

use integrad_core::runner::{JobLogger, indent};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::SplitStream;
use tracing::warn;

/// Indentation of command output in job logs.
pub(crate) const OUTPUT_INDENT: &str = "    ";

/// Run `<shell> -c <command>` in `cwd` with the process environment plus
/// `env`. Stdout and stderr lines are written to the log as they arrive;
/// bytes that are not UTF-8 are replaced rather than dropped.
pub(crate) async fn run_shell(
    shell: &str,
    command: &str,
    cwd: &Path,
    env: &BTreeMap<String, String>,
    logger: &JobLogger,
) -> io::Result<ExitStatus> {
    let mut child = Command::new(shell)
        .arg("-c")
        .arg(command)
        .current_dir(cwd)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("stderr not captured"))?;

    let mut lines = SplitStream::new(BufReader::new(stdout).split(b'\n'))
        .merge(SplitStream::new(BufReader::new(stderr).split(b'\n')));
    while let Some(line) = lines.next().await {
        match line {
            Ok(line) => {
                let line = String::from_utf8_lossy(&line);
                logger.write(indent(&format!("{line}\n"), OUTPUT_INDENT)).await;
            }
            Err(err) => {
                warn!(error = %err, "Failed to read command output");
                logger.log(format!("Output unreadable: {err}")).await;
                break;
            }
        }
    }

    child.wait().await
}
