//! Per-bridge driver task
//!
//! Each bridge runs one task that owns its subprocesses: the long-lived
//! reverse tunnel and the short-lived handshake test and install runs. The
//! task terminates every process it started before it returns, so once the
//! task has been joined no subprocess of the bridge is alive.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use fd_core::config::BridgeConfig;
use fd_core::error::BridgeError;
use fd_core::model::{BridgeFailure, BridgeSnapshot, FleetEvent, SshParams};
use fd_core::types::{BridgeId, BridgePhase, DiagnosisCode, OperationId, OperationStatus, Severity};

use super::install::{self, InstallMode, InstallOutcome, InstallProgress};
use super::phase::check_transition;
use crate::events::EventBus;
use crate::journal::OperationJournal;
use crate::preflight::classify_stderr;
use crate::ssh::{
    CommandOutput, ExitInfo, OutputLine, ReverseForward, RunnerError, SshCommandBuilder,
    SshInvocation, SshProcess, SshRunner,
};

/// Marker echoed by the handshake test
const HANDSHAKE_MARKER: &str = "fleetdeck-bridge-ok";

/// Answer to a paused install
#[derive(Debug)]
pub(crate) enum SudoDecision {
    Password(String),
    Skip,
}

/// Collaborators shared by every bridge task
pub(crate) struct BridgeContext {
    pub runner: Arc<dyn SshRunner>,
    pub ssh_binary: String,
    pub config: BridgeConfig,
    pub journal: Arc<OperationJournal>,
    pub events: EventBus,
}

struct BridgeState {
    snapshot: BridgeSnapshot,
    /// Machine id the install reported; telemetry from it activates the bridge
    expected_machine_id: Option<String>,
    /// Open `bridge.connect` journal entry
    connect_op: Option<OperationId>,
}

/// Shared handle to one bridge
pub(crate) struct BridgeHandle {
    pub id: BridgeId,
    state: Mutex<BridgeState>,
    pub cancel: CancellationToken,
    pub task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    sudo_tx: mpsc::Sender<SudoDecision>,
    max_log_lines: usize,
}

impl BridgeHandle {
    pub fn new(snapshot: BridgeSnapshot, max_log_lines: usize) -> (Self, mpsc::Receiver<SudoDecision>) {
        let (sudo_tx, sudo_rx) = mpsc::channel(1);
        let handle = Self {
            id: snapshot.id.clone(),
            state: Mutex::new(BridgeState {
                snapshot,
                expected_machine_id: None,
                connect_op: None,
            }),
            cancel: CancellationToken::new(),
            task: tokio::sync::Mutex::new(None),
            sudo_tx,
            max_log_lines: max_log_lines.max(1),
        };
        (handle, sudo_rx)
    }

    pub fn snapshot(&self) -> BridgeSnapshot {
        self.state.lock().snapshot.clone()
    }

    pub fn phase(&self) -> BridgePhase {
        self.state.lock().snapshot.phase
    }

    pub fn set_connect_op(&self, id: OperationId) {
        self.state.lock().connect_op = Some(id);
    }

    pub fn take_connect_op(&self) -> Option<OperationId> {
        self.state.lock().connect_op.take()
    }

    /// Append a line to the bridge log
    pub fn log(&self, line: impl AsRef<str>) {
        let mut state = self.state.lock();
        push_log(&mut state, line.as_ref(), self.max_log_lines);
    }

    /// Apply a legal phase change and log it; returns the previous phase
    pub fn transition(&self, to: BridgePhase, note: &str) -> Result<BridgePhase, BridgeError> {
        let mut state = self.state.lock();
        let from = state.snapshot.phase;
        check_transition(from, to)?;
        apply_transition(&mut state, to, note, self.max_log_lines);
        drop(state);

        tracing::info!(bridge_id = %self.id, %from, %to, "{}", note);
        Ok(from)
    }

    /// Resume a paused install. Rejected without side effects unless the
    /// bridge is waiting in `needs_sudo_password`.
    pub fn resume_install(&self, decision: SudoDecision) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        let from = state.snapshot.phase;
        if from != BridgePhase::NeedsSudoPassword {
            return Err(BridgeError::IllegalTransition {
                from,
                to: BridgePhase::Installing,
            });
        }
        let note = match &decision {
            SudoDecision::Password(_) => "retrying install with elevated privileges",
            SudoDecision::Skip => "continuing install in user mode",
        };
        self.sudo_tx
            .try_send(decision)
            .map_err(|_| BridgeError::IllegalTransition {
                from,
                to: BridgePhase::Installing,
            })?;
        apply_transition(&mut state, BridgePhase::Installing, note, self.max_log_lines);
        drop(state);

        tracing::info!(bridge_id = %self.id, "{}", note);
        Ok(())
    }

    /// Activate telemetry if the bridge is running and expects `machine_id`
    pub fn record_telemetry(&self, machine_id: &str) -> bool {
        let mut state = self.state.lock();
        if state.snapshot.phase != BridgePhase::Running
            || state.expected_machine_id.as_deref() != Some(machine_id)
        {
            return false;
        }
        state.snapshot.reported_machine_id = Some(machine_id.to_string());
        let note = format!("first telemetry from {}", machine_id);
        apply_transition(&mut state, BridgePhase::TelemetryActive, &note, self.max_log_lines);
        drop(state);

        tracing::info!(bridge_id = %self.id, machine_id, "Telemetry active");
        true
    }

    /// Flip to `disconnected` after the task is gone
    pub fn mark_disconnected(&self) -> Option<BridgePhase> {
        let mut state = self.state.lock();
        let from = state.snapshot.phase;
        if from == BridgePhase::Disconnected {
            return None;
        }
        apply_transition(&mut state, BridgePhase::Disconnected, "disconnected", self.max_log_lines);
        Some(from)
    }

    fn set_expected_machine_id(&self, machine_id: Option<String>) {
        self.state.lock().expected_machine_id = machine_id;
    }

    /// Enter `error`, journal it and raise a `bridge.error` event
    fn fail(&self, ctx: &BridgeContext, failure: Failure) {
        let (from, label) = {
            let mut state = self.state.lock();
            let from = state.snapshot.phase;
            if !from.is_live() {
                return;
            }
            state.snapshot.error = Some(BridgeFailure {
                message: failure.message.clone(),
                phase: from,
                phase_index: from.index(),
                code: failure.code.map(|c| c.as_str().to_string()),
            });
            let note = format!("failed: {}", failure.message);
            apply_transition(&mut state, BridgePhase::Error, &note, self.max_log_lines);
            (from, state.snapshot.label.clone())
        };

        tracing::warn!(bridge_id = %self.id, phase = %from, "Bridge failed: {}", failure.message);

        let message = format!("bridge {} failed during {}", label, from);
        match self.take_connect_op() {
            Some(op) => {
                if let Err(e) = ctx.journal.complete(
                    &op,
                    OperationStatus::Failed,
                    Some(message.clone()),
                    Some(failure.message.clone()),
                ) {
                    tracing::warn!("Failed to complete connect entry: {}", e);
                }
            }
            None => {
                ctx.journal.record(
                    "bridge.error",
                    None,
                    OperationStatus::Failed,
                    message.clone(),
                    Some(failure.message.clone()),
                );
            }
        }

        ctx.events.publish(FleetEvent::new(
            Severity::High,
            "bridge.error",
            self.id.as_str(),
            None,
            format!("Bridge {} failed", label),
            failure.message,
        ));
    }

    fn params(&self) -> (SshParams, u16, String) {
        let state = self.state.lock();
        (
            state.snapshot.ssh.clone(),
            state.snapshot.remote_port,
            state.snapshot.auth_token.clone(),
        )
    }
}

fn push_log(state: &mut BridgeState, line: &str, max: usize) {
    let log = &mut state.snapshot.log;
    log.push(format!("{} {}", Utc::now().format("%H:%M:%S"), line));
    if log.len() > max {
        let excess = log.len() - max;
        log.drain(..excess);
    }
}

fn apply_transition(state: &mut BridgeState, to: BridgePhase, note: &str, max_log: usize) {
    let from = state.snapshot.phase;
    state.snapshot.phase = to;
    state.snapshot.updated_at = Utc::now();
    push_log(state, &format!("{} -> {}: {}", from, to, note), max_log);
}

/// Why a bridge task ended in `error`
#[derive(Debug)]
struct Failure {
    message: String,
    code: Option<DiagnosisCode>,
}

impl Failure {
    fn new(message: impl Into<String>, code: Option<DiagnosisCode>) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }

    fn tunnel_lost(exit: ExitInfo) -> Self {
        Self::new(format!("tunnel exited unexpectedly ({})", exit), None)
    }
}

impl From<BridgeError> for Failure {
    fn from(e: BridgeError) -> Self {
        Self::new(e.to_string(), None)
    }
}

impl From<RunnerError> for Failure {
    fn from(e: RunnerError) -> Self {
        Self::new(e.to_string(), None)
    }
}

/// Result of waiting on a short-lived step
enum Collected {
    Done(CommandOutput),
    Cancelled,
    TimedOut,
    TunnelLost(ExitInfo),
}

/// Subprocesses owned by a bridge task
#[derive(Default)]
struct Processes {
    tunnel: Option<Box<dyn SshProcess>>,
    step: Option<Box<dyn SshProcess>>,
}

impl Processes {
    /// Drain the current step to exit while watching the tunnel
    async fn collect(
        &mut self,
        cancel: &CancellationToken,
        timeout: Duration,
        mut on_line: impl FnMut(&OutputLine),
    ) -> Result<Collected, RunnerError> {
        let deadline = Instant::now() + timeout;
        let Some(step) = self.step.as_mut() else {
            return Ok(Collected::Cancelled);
        };
        let mut lines = Vec::new();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(Collected::Cancelled),
                _ = tokio::time::sleep_until(deadline) => return Ok(Collected::TimedOut),
                exit = exited(self.tunnel.as_mut()) => return Ok(Collected::TunnelLost(exit?)),
                line = step.next_line() => match line {
                    Some(line) => {
                        on_line(&line);
                        lines.push(line);
                    }
                    None => break,
                },
            }
        }

        let exit = tokio::select! {
            _ = cancel.cancelled() => return Ok(Collected::Cancelled),
            _ = tokio::time::sleep_until(deadline) => return Ok(Collected::TimedOut),
            exit = step.wait() => exit?,
        };
        self.step = None;
        Ok(Collected::Done(CommandOutput { exit, lines }))
    }

    async fn terminate_all(&mut self, grace: Duration) {
        for mut process in [self.step.take(), self.tunnel.take()].into_iter().flatten() {
            if let Err(e) = process.terminate(grace).await {
                tracing::warn!("Failed to terminate bridge subprocess: {}", e);
            }
        }
    }
}

async fn exited(process: Option<&mut Box<dyn SshProcess>>) -> Result<ExitInfo, RunnerError> {
    match process {
        Some(process) => process.wait().await,
        None => std::future::pending().await,
    }
}

/// Entry point of the bridge task
pub(crate) async fn run_bridge(
    ctx: Arc<BridgeContext>,
    handle: Arc<BridgeHandle>,
    mut sudo_rx: mpsc::Receiver<SudoDecision>,
) {
    let mut processes = Processes::default();
    let result = drive(&ctx, &handle, &mut sudo_rx, &mut processes).await;
    processes.terminate_all(ctx.config.terminate_grace).await;

    match result {
        Ok(()) => tracing::debug!(bridge_id = %handle.id, "Bridge task stopped"),
        Err(failure) => handle.fail(&ctx, failure),
    }
}

/// Walk the phases. `Ok` means the task was cancelled.
async fn drive(
    ctx: &BridgeContext,
    handle: &BridgeHandle,
    sudo_rx: &mut mpsc::Receiver<SudoDecision>,
    processes: &mut Processes,
) -> Result<(), Failure> {
    let config = &ctx.config;
    let cancel = &handle.cancel;
    let (params, remote_port, token) = handle.params();

    // Handshake
    handle.transition(BridgePhase::SshTest, "starting ssh handshake")?;
    let test = SshCommandBuilder::new(&ctx.ssh_binary, &params)
        .connect_timeout(config.ssh_test_timeout)
        .remote_command(format!("echo {}", HANDSHAKE_MARKER))
        .build();
    processes.step = Some(spawn(ctx, &test).await?);
    let output = match processes
        .collect(cancel, config.ssh_test_timeout, |_| {})
        .await?
    {
        Collected::Done(output) => output,
        Collected::Cancelled => return Ok(()),
        Collected::TimedOut | Collected::TunnelLost(_) => {
            return Err(Failure::new(
                format!(
                    "ssh handshake did not finish within {}s",
                    config.ssh_test_timeout.as_secs()
                ),
                Some(DiagnosisCode::SshTimeout),
            ))
        }
    };
    if !(output.exit.success() && output.stdout().contains(HANDSHAKE_MARKER)) {
        let stderr = output.stderr();
        let code = classify_stderr(&stderr);
        let detail = stderr.lines().last().unwrap_or("no output").to_string();
        return Err(Failure::new(
            format!("ssh handshake failed ({}): {}", code, detail),
            Some(code),
        ));
    }

    // Reverse tunnel
    let forward = ReverseForward {
        remote_port,
        local_port: config.local_port,
    };
    let tunnel_inv = SshCommandBuilder::new(&ctx.ssh_binary, &params)
        .connect_timeout(config.ssh_test_timeout)
        .keepalive()
        .reverse_forward(forward)
        .build();
    processes.tunnel = Some(spawn(ctx, &tunnel_inv).await?);
    if !confirm_tunnel(handle, processes, config.tunnel_confirm_window).await? {
        return Ok(());
    }
    handle.transition(
        BridgePhase::TunnelOpen,
        &format!(
            "reverse forward {}:127.0.0.1:{} listening",
            forward.remote_port, forward.local_port
        ),
    )?;

    // Install, pausing for privileges when asked
    handle.transition(BridgePhase::Installing, "running remote install")?;
    let mut mode = InstallMode::System;
    let mut password: Option<String> = None;
    loop {
        let command = install::remote_command(
            &config.install_command,
            remote_port,
            &token,
            mode,
            password.is_some(),
        );
        let mut builder = SshCommandBuilder::new(&ctx.ssh_binary, &params)
            .connect_timeout(config.ssh_test_timeout)
            .remote_command(command);
        if password.is_some() {
            builder = builder.with_stdin();
        }
        let mut process = spawn(ctx, &builder.build()).await?;
        if let Some(secret) = password.take() {
            process.write_stdin(format!("{}\n", secret).as_bytes()).await?;
        }
        processes.step = Some(process);

        let mut progress = InstallProgress::default();
        let collected = processes
            .collect(cancel, config.install_timeout, |line| {
                progress.observe(line);
                handle.log(format!("install: {}", line.text));
            })
            .await?;

        let output = match collected {
            Collected::Done(output) => output,
            Collected::Cancelled => return Ok(()),
            Collected::TimedOut => {
                return Err(Failure::new(
                    format!(
                        "install did not finish within {}s",
                        config.install_timeout.as_secs()
                    ),
                    None,
                ))
            }
            Collected::TunnelLost(exit) => return Err(Failure::tunnel_lost(exit)),
        };

        match progress.finish(output.exit) {
            InstallOutcome::Healthy { machine_id } => {
                handle.set_expected_machine_id(machine_id);
                handle.transition(BridgePhase::Running, "remote agent reported healthy")?;
                if let Some(op) = handle.take_connect_op() {
                    if let Err(e) = ctx.journal.complete(
                        &op,
                        OperationStatus::Succeeded,
                        Some(format!("bridge {} running", handle.id)),
                        None,
                    ) {
                        tracing::warn!("Failed to complete connect entry: {}", e);
                    }
                }
                break;
            }
            InstallOutcome::NeedsSudo if mode == InstallMode::User => {
                return Err(Failure::new(
                    "install requires elevated privileges even in user mode",
                    None,
                ));
            }
            InstallOutcome::NeedsSudo => {
                handle.transition(
                    BridgePhase::NeedsSudoPassword,
                    "remote install needs elevated privileges",
                )?;
                let decision = tokio::select! {
                    _ = cancel.cancelled() => return Ok(()),
                    exit = exited(processes.tunnel.as_mut()) => {
                        return Err(Failure::tunnel_lost(exit?));
                    }
                    decision = sudo_rx.recv() => decision,
                };
                match decision {
                    Some(SudoDecision::Password(secret)) => {
                        mode = InstallMode::System;
                        password = Some(secret);
                    }
                    Some(SudoDecision::Skip) => mode = InstallMode::User,
                    None => return Ok(()),
                }
            }
            InstallOutcome::Failed(message) => return Err(Failure::new(message, None)),
        }
    }

    // Running: hold the tunnel until cancelled or it dies
    let Some(tunnel) = processes.tunnel.as_mut() else {
        return Ok(());
    };
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = tunnel.next_line() => match line {
                Some(line) => handle.log(format!("tunnel: {}", line.text)),
                None => {
                    let exit = tunnel.wait().await?;
                    return Err(Failure::tunnel_lost(exit));
                }
            },
        }
    }
}

async fn spawn(ctx: &BridgeContext, invocation: &SshInvocation) -> Result<Box<dyn SshProcess>, Failure> {
    ctx.runner
        .spawn(invocation)
        .await
        .map_err(|e| Failure::from(BridgeError::Spawn(e.to_string())))
}

/// Wait out the confirmation window. `Ok(false)` means cancelled.
async fn confirm_tunnel(
    handle: &BridgeHandle,
    processes: &mut Processes,
    window: Duration,
) -> Result<bool, Failure> {
    let Some(tunnel) = processes.tunnel.as_mut() else {
        return Ok(false);
    };
    let deadline = Instant::now() + window;
    let mut stderr = Vec::new();

    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => return Ok(false),
            _ = tokio::time::sleep_until(deadline) => break,
            line = tunnel.next_line() => match line {
                Some(line) => {
                    handle.log(format!("tunnel: {}", line.text));
                    stderr.push(line.text);
                }
                None => {
                    let exit = tunnel.wait().await?;
                    return Err(tunnel_failure(exit, &stderr));
                }
            },
        }
    }

    match tunnel.try_status()? {
        Some(exit) => Err(tunnel_failure(exit, &stderr)),
        None => Ok(true),
    }
}

fn tunnel_failure(exit: ExitInfo, stderr: &[String]) -> Failure {
    let text = stderr.join("\n");
    let detail = stderr.last().map(String::as_str).unwrap_or("no output");
    if text.contains("forwarding failed") {
        return Failure::new(
            format!("remote port forward refused: {}", detail),
            Some(DiagnosisCode::SshNetworkUnreachable),
        );
    }
    let code = classify_stderr(&text);
    Failure::new(
        format!("tunnel exited before the forward was confirmed ({}): {}", exit, detail),
        Some(code),
    )
}
