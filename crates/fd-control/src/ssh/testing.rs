//! Scripted runner for driving ssh-dependent code in unit tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use super::command::SshInvocation;
use super::runner::{ExitInfo, OutputLine, RunnerError, SshProcess, SshRunner};

/// What a scripted process does
#[derive(Debug, Clone)]
pub enum Script {
    /// Emit the lines, then exit with the code
    Exit { lines: Vec<OutputLine>, code: i32 },
    /// Stay alive until terminated, or exit with 255 once `dies_after` has passed
    Hang { dies_after: Option<Duration> },
    /// Fail to start
    SpawnError,
}

impl Script {
    pub fn exit(code: i32, stdout: &[&str], stderr: &[&str]) -> Self {
        let lines = stdout
            .iter()
            .map(|l| OutputLine::stdout(*l))
            .chain(stderr.iter().map(|l| OutputLine::stderr(*l)))
            .collect();
        Script::Exit { lines, code }
    }

    pub fn hang() -> Self {
        Script::Hang { dies_after: None }
    }

    pub fn dies_after(after: Duration) -> Self {
        Script::Hang {
            dies_after: Some(after),
        }
    }
}

type Handler = dyn Fn(&SshInvocation) -> Script + Send + Sync;

/// Runner whose processes follow a script chosen per invocation
#[derive(Clone)]
pub struct ScriptedRunner {
    handler: Arc<Handler>,
    spawned: Arc<Mutex<Vec<SshInvocation>>>,
    stdin: Arc<Mutex<Vec<Vec<u8>>>>,
    alive: Arc<Mutex<Vec<Arc<AtomicBool>>>>,
}

impl ScriptedRunner {
    pub fn new(handler: impl Fn(&SshInvocation) -> Script + Send + Sync + 'static) -> Self {
        Self {
            handler: Arc::new(handler),
            spawned: Arc::new(Mutex::new(Vec::new())),
            stdin: Arc::new(Mutex::new(Vec::new())),
            alive: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every invocation spawned so far
    pub fn invocations(&self) -> Vec<SshInvocation> {
        self.spawned.lock().clone()
    }

    /// Everything written to any process's stdin
    pub fn stdin_writes(&self) -> Vec<Vec<u8>> {
        self.stdin.lock().clone()
    }

    /// Processes that have not exited or been terminated
    pub fn live_count(&self) -> usize {
        self.alive
            .lock()
            .iter()
            .filter(|a| a.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl SshRunner for ScriptedRunner {
    async fn spawn(&self, invocation: &SshInvocation) -> Result<Box<dyn SshProcess>, RunnerError> {
        self.spawned.lock().push(invocation.clone());
        let script = (self.handler)(invocation);
        if let Script::SpawnError = script {
            return Err(RunnerError::Spawn {
                program: invocation.program.clone(),
                reason: "scripted spawn failure".to_string(),
            });
        }

        let alive = Arc::new(AtomicBool::new(true));
        self.alive.lock().push(Arc::clone(&alive));
        Ok(Box::new(ScriptedProcess::new(
            script,
            alive,
            Arc::clone(&self.stdin),
        )))
    }
}

struct ScriptedProcess {
    lines: VecDeque<OutputLine>,
    code: Option<i32>,
    deadline: Option<Instant>,
    alive: Arc<AtomicBool>,
    stdin: Arc<Mutex<Vec<Vec<u8>>>>,
    exit: Option<ExitInfo>,
}

impl ScriptedProcess {
    fn new(script: Script, alive: Arc<AtomicBool>, stdin: Arc<Mutex<Vec<Vec<u8>>>>) -> Self {
        let (lines, code, deadline) = match script {
            Script::Exit { lines, code } => (lines.into(), Some(code), None),
            Script::Hang { dies_after } => {
                (VecDeque::new(), None, dies_after.map(|d| Instant::now() + d))
            }
            Script::SpawnError => (VecDeque::new(), Some(127), None),
        };
        Self {
            lines,
            code,
            deadline,
            alive,
            stdin,
            exit: None,
        }
    }

    fn finish(&mut self, code: Option<i32>) -> ExitInfo {
        let info = ExitInfo { code };
        self.exit = Some(info);
        self.alive.store(false, Ordering::SeqCst);
        info
    }
}

impl Drop for ScriptedProcess {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshProcess for ScriptedProcess {
    fn pid(&self) -> Option<u32> {
        self.exit.is_none().then_some(4242)
    }

    fn try_status(&mut self) -> Result<Option<ExitInfo>, RunnerError> {
        if let Some(exit) = self.exit {
            return Ok(Some(exit));
        }
        if let Some(code) = self.code {
            if self.lines.is_empty() {
                return Ok(Some(self.finish(Some(code))));
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Ok(Some(self.finish(Some(255))));
            }
        }
        Ok(None)
    }

    async fn next_line(&mut self) -> Option<OutputLine> {
        if let Some(line) = self.lines.pop_front() {
            return Some(line);
        }
        if self.exit.is_some() || self.code.is_some() {
            return None;
        }
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                None
            }
            None => std::future::pending().await,
        }
    }

    async fn write_stdin(&mut self, data: &[u8]) -> Result<(), RunnerError> {
        self.stdin.lock().push(data.to_vec());
        Ok(())
    }

    async fn wait(&mut self) -> Result<ExitInfo, RunnerError> {
        if let Some(exit) = self.exit {
            return Ok(exit);
        }
        if let Some(code) = self.code {
            self.lines.clear();
            return Ok(self.finish(Some(code)));
        }
        match self.deadline {
            Some(deadline) => {
                tokio::time::sleep_until(deadline).await;
                Ok(self.finish(Some(255)))
            }
            None => std::future::pending().await,
        }
    }

    async fn terminate(&mut self, _grace: Duration) -> Result<(), RunnerError> {
        if self.exit.is_none() {
            self.finish(None);
        }
        Ok(())
    }
}
