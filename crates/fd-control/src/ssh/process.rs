//! Real OS child processes

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;

use super::command::SshInvocation;
use super::runner::{ExitInfo, OutputLine, OutputStream, RunnerError, SshProcess};

/// Poll interval while waiting for a terminated child to exit
const EXIT_POLL: Duration = Duration::from_millis(100);

/// A spawned child with its output pipes drained into a line channel
pub struct ChildProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: mpsc::UnboundedReceiver<OutputLine>,
    exit: Option<ExitInfo>,
}

impl ChildProcess {
    /// Spawn the invocation with piped stdout/stderr
    pub fn spawn(invocation: &SshInvocation) -> Result<Self, RunnerError> {
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| RunnerError::Spawn {
            program: invocation.program.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(pid = ?child.id(), "Spawned {}", invocation.display());

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, OutputStream::Stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, OutputStream::Stderr, tx);
        }

        Ok(Self {
            stdin: child.stdin.take(),
            child,
            lines: rx,
            exit: None,
        })
    }

    fn record(&mut self, status: std::process::ExitStatus) -> ExitInfo {
        let info = ExitInfo {
            code: status.code(),
        };
        self.exit = Some(info);
        info
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        if let Some(pid) = self.child.id() {
            // SAFETY: kill(2) with a pid we own; failure only means it already exited
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
        }
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {}
}

fn forward_lines<R>(pipe: R, stream: OutputStream, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe).lines();
        while let Ok(Some(text)) = reader.next_line().await {
            if tx.send(OutputLine { stream, text }).is_err() {
                break;
            }
        }
    });
}

#[async_trait]
impl SshProcess for ChildProcess {
    fn pid(&self) -> Option<u32> {
        if self.exit.is_some() {
            return None;
        }
        self.child.id()
    }

    fn try_status(&mut self) -> Result<Option<ExitInfo>, RunnerError> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        Ok(self.child.try_wait()?.map(|status| self.record(status)))
    }

    async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), RunnerError> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.write_all(data).await?;
            stdin.flush().await?;
            // dropping closes the pipe
        }
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitInfo, RunnerError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        let status = self.child.wait().await?;
        Ok(self.record(status))
    }

    async fn terminate(&mut self, grace: Duration) -> Result<(), RunnerError> {
        if self.try_status()?.is_some() {
            return Ok(());
        }
        self.stdin.take();
        self.signal_terminate();

        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self.try_status()?.is_some() {
                return Ok(());
            }
            tokio::time::sleep(EXIT_POLL).await;
        }

        tracing::debug!(pid = ?self.child.id(), "Process ignored SIGTERM, killing");
        self.child.kill().await?;
        let status = self.child.wait().await?;
        self.record(status);
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> SshInvocation {
        SshInvocation {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            stdin: false,
        }
    }

    #[tokio::test]
    async fn test_terminate_stops_sleeping_process() {
        let mut process = ChildProcess::spawn(&sh("sleep 30")).unwrap();
        assert!(process.pid().is_some());
        assert!(process.try_status().unwrap().is_none());

        process.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(process.try_status().unwrap().is_some());
        assert!(process.pid().is_none());
    }

    #[tokio::test]
    async fn test_kill_after_grace_when_sigterm_ignored() {
        let mut process =
            ChildProcess::spawn(&sh("trap '' TERM; echo ready; sleep 30")).unwrap();
        assert_eq!(process.next_line().await.map(|l| l.text), Some("ready".to_string()));

        process.terminate(Duration::from_millis(300)).await.unwrap();
        let exit = process.try_status().unwrap().unwrap();
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let inv = SshInvocation {
            program: "/nonexistent/fleetdeck-ssh".to_string(),
            args: vec![],
            stdin: false,
        };
        assert!(matches!(
            ChildProcess::spawn(&inv),
            Err(RunnerError::Spawn { .. })
        ));
    }
}
