use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;

use crate::sanitize::truncate_bytes;

const MAX_DIAGNOSTIC_BYTES: usize = 2_000;

/// Failure of one external tool invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("`{bin}` is not installed or not on PATH")]
    NotFound { bin: String },

    #[error("spawn `{bin}`: {source}")]
    Spawn {
        bin: String,
        #[source]
        source: io::Error,
    },

    #[error("`{bin}` did not finish within {}s and was killed", .after.as_secs())]
    TimedOut { bin: String, after: Duration },

    #[error("`{bin}` failed ({status}): {stderr}")]
    Failed {
        bin: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Keeps the tail of a tool's stderr, which is where ffmpeg puts the actual error.
fn diagnostic(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.len() <= MAX_DIAGNOSTIC_BYTES {
        return text.to_owned();
    }
    let reversed: String = text.chars().rev().collect();
    let tail: String = truncate_bytes(&reversed, MAX_DIAGNOSTIC_BYTES)
        .chars()
        .rev()
        .collect();
    format!("…{tail}")
}

/// Runs `bin` to completion, capturing output. With a timeout, the child is killed when the
/// limit expires.
pub async fn run(
    bin: &str,
    args: &[OsString],
    timeout: Option<Duration>,
) -> Result<Output, ToolError> {
    let mut cmd = Command::new(bin);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    tracing::debug!(bin, ?args, "run tool");

    let child = cmd.spawn().map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            ToolError::NotFound {
                bin: bin.to_owned(),
            }
        } else {
            ToolError::Spawn {
                bin: bin.to_owned(),
                source,
            }
        }
    })?;

    let wait = child.wait_with_output();
    let waited = match timeout {
        Some(limit) => tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| ToolError::TimedOut {
                bin: bin.to_owned(),
                after: limit,
            })?,
        None => wait.await,
    };
    let output = waited.map_err(|source| ToolError::Spawn {
        bin: bin.to_owned(),
        source,
    })?;

    if !output.status.success() {
        return Err(ToolError::Failed {
            bin: bin.to_owned(),
            status: output.status,
            stderr: diagnostic(&output.stderr),
        });
    }
    Ok(output)
}

/// Confirms `bin` can be spawned by asking it for its version.
pub async fn check_available(bin: &str) -> Result<(), ToolError> {
    run(bin, &[OsString::from("-version")], Some(Duration::from_secs(30))).await?;
    Ok(())
}
