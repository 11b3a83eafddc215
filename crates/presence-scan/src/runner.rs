//! # Command Runner
//!
//! Bounded execution of external probe tools (`ping`, `avahi-browse`,
//! `busctl`). Sources depend on the [`CommandRunner`] trait so tests can
//! script tool output without spawning anything.

use std::io::ErrorKind;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, trace};

use crate::error::{SourceError, SourceResult};

/// Captured result of one tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit status was zero. Always false when the run timed out.
    pub success: bool,
    /// Stdout lines read before exit or the deadline.
    pub stdout: Vec<String>,
    /// The deadline expired and the child was killed.
    pub timed_out: bool,
}

/// Runs a program to completion or until a deadline.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs `program args...`, killing it once `deadline` expires.
    ///
    /// A missing program is reported as [`SourceError::ToolMissing`]. A
    /// non-zero exit or an expired deadline is not an error; both show up in
    /// the returned [`CommandOutput`].
    async fn run(&self, program: &str, args: &[&str], deadline: Duration)
        -> SourceResult<CommandOutput>;
}

/// [`CommandRunner`] over `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[&str],
        deadline: Duration,
    ) -> SourceResult<CommandOutput> {
        trace!(program, ?args, ?deadline, "Spawning");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(program, e))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SourceError::command(program, "stdout not captured"))?;
        let mut lines = BufReader::new(stdout).lines();
        let mut collected = Vec::new();

        match tokio::time::timeout(deadline, drain(&mut child, &mut lines, &mut collected)).await {
            Ok(Ok(status)) => Ok(CommandOutput {
                success: status.success(),
                stdout: collected,
                timed_out: false,
            }),
            Ok(Err(e)) => Err(SourceError::command(program, e.to_string())),
            Err(_) => {
                debug!(program, ?deadline, "Deadline reached, killing");
                let _ = child.kill().await;
                Ok(CommandOutput {
                    success: false,
                    stdout: collected,
                    timed_out: true,
                })
            }
        }
    }
}

async fn drain(
    child: &mut Child,
    lines: &mut Lines<BufReader<ChildStdout>>,
    collected: &mut Vec<String>,
) -> std::io::Result<ExitStatus> {
    while let Some(line) = lines.next_line().await? {
        collected.push(line);
    }
    child.wait().await
}

/// Maps a spawn failure, treating "not found" as a missing tool.
pub(crate) fn spawn_error(program: &str, err: std::io::Error) -> SourceError {
    if err.kind() == ErrorKind::NotFound {
        SourceError::ToolMissing {
            tool: program.to_string(),
        }
    } else {
        SourceError::command(program, format!("spawn failed: {}", err))
    }
}
