//! Subprocess runner abstraction

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::command::SshInvocation;
use super::process::ChildProcess;

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// One line of subprocess output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: OutputStream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// How a subprocess ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    /// Exit code; `None` when killed by a signal
    pub code: Option<i32>,
}

impl ExitInfo {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl std::fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {}", code),
            None => write!(f, "terminated by signal"),
        }
    }
}

/// Subprocess errors
#[derive(Error, Debug)]
pub enum RunnerError {
    /// The program could not be started
    #[error("failed to spawn {program}: {reason}")]
    Spawn { program: String, reason: String },

    /// The process outlived its time bound and was terminated
    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    /// Pipe or wait failure
    #[error("process I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A running subprocess
#[async_trait]
pub trait SshProcess: Send {
    /// OS process id while the process is alive
    fn pid(&self) -> Option<u32>;

    /// Non-blocking exit check
    fn try_status(&mut self) -> Result<Option<ExitInfo>, RunnerError>;

    /// Next line from stdout or stderr; `None` once both pipes are closed
    async fn next_line(&mut self) -> Option<OutputLine>;

    /// Write to stdin and close it
    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), RunnerError>;

    /// Wait for the process to exit
    async fn wait(&mut self) -> Result<ExitInfo, RunnerError>;

    /// SIGTERM, then SIGKILL once `grace` has passed. Returns after the process is gone.
    async fn terminate(&mut self, grace: Duration) -> Result<(), RunnerError>;
}

/// Starts subprocesses
#[async_trait]
pub trait SshRunner: Send + Sync {
    async fn spawn(&self, invocation: &SshInvocation) -> Result<Box<dyn SshProcess>, RunnerError>;
}

/// Runs real OS processes via `tokio::process`
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

#[async_trait]
impl SshRunner for ProcessRunner {
    async fn spawn(&self, invocation: &SshInvocation) -> Result<Box<dyn SshProcess>, RunnerError> {
        let child = ChildProcess::spawn(invocation)?;
        Ok(Box::new(child))
    }
}

/// Collected output of a finished process
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit: ExitInfo,
    pub lines: Vec<OutputLine>,
}

impl CommandOutput {
    /// All stdout lines joined with newlines
    pub fn stdout(&self) -> String {
        self.join(OutputStream::Stdout)
    }

    /// All stderr lines joined with newlines
    pub fn stderr(&self) -> String {
        self.join(OutputStream::Stderr)
    }

    fn join(&self, stream: OutputStream) -> String {
        self.lines
            .iter()
            .filter(|l| l.stream == stream)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Run a command to completion within `timeout`.
///
/// On timeout the process is terminated before [`RunnerError::TimedOut`] is returned.
pub async fn run_to_completion(
    runner: &dyn SshRunner,
    invocation: &SshInvocation,
    timeout: Duration,
    stdin: Option<&[u8]>,
) -> Result<CommandOutput, RunnerError> {
    let mut process = runner.spawn(invocation).await?;
    if let Some(data) = stdin {
        process.write_stdin(data).await?;
    }

    let collected = tokio::time::timeout(timeout, async {
        let mut lines = Vec::new();
        while let Some(line) = process.next_line().await {
            lines.push(line);
        }
        let exit = process.wait().await?;
        Ok::<_, RunnerError>(CommandOutput { exit, lines })
    })
    .await;

    match collected {
        Ok(result) => result,
        Err(_) => {
            if let Err(e) = process.terminate(Duration::from_secs(1)).await {
                tracing::warn!("Failed to stop timed out process: {}", e);
            }
            Err(RunnerError::TimedOut(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::testing::{Script, ScriptedRunner};

    fn invocation() -> SshInvocation {
        SshInvocation {
            program: "ssh".to_string(),
            args: vec!["host".to_string()],
            stdin: false,
        }
    }

    #[tokio::test]
    async fn test_collects_lines_and_exit() {
        let runner = ScriptedRunner::new(|_| Script::exit(0, &["fleetdeck-ok"], &["warning"]));
        let out = run_to_completion(&runner, &invocation(), Duration::from_secs(5), None)
            .await
            .unwrap();
        assert!(out.exit.success());
        assert_eq!(out.stdout(), "fleetdeck-ok");
        assert_eq!(out.stderr(), "warning");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_terminates_process() {
        let runner = ScriptedRunner::new(|_| Script::hang());
        let result =
            run_to_completion(&runner, &invocation(), Duration::from_secs(35), None).await;
        assert!(matches!(result, Err(RunnerError::TimedOut(_))));
        assert_eq!(runner.live_count(), 0);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let runner = ScriptedRunner::new(|_| Script::SpawnError);
        let result = run_to_completion(&runner, &invocation(), Duration::from_secs(1), None).await;
        assert!(matches!(result, Err(RunnerError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_process_runner_runs_real_command() {
        let inv = SshInvocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "read x; echo got-$x; echo oops >&2; exit 3".to_string()],
            stdin: true,
        };
        let out = run_to_completion(&ProcessRunner, &inv, Duration::from_secs(10), Some(b"pw\n"))
            .await
            .unwrap();
        assert_eq!(out.exit.code, Some(3));
        assert_eq!(out.stdout(), "got-pw");
        assert_eq!(out.stderr(), "oops");
    }
}
