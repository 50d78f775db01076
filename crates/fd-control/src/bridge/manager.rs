//! Bridge connection manager

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use rand::RngCore;

use fd_core::config::BridgeConfig;
use fd_core::error::{BridgeError, ValidationError};
use fd_core::model::{BridgeRequest, BridgeSnapshot};
use fd_core::types::{BridgeId, BridgePhase, OperationStatus};

use super::lifecycle::{run_bridge, BridgeContext, BridgeHandle, SudoDecision};
use crate::events::EventBus;
use crate::journal::OperationJournal;
use crate::preflight::ConnectClearance;
use crate::ssh::SshRunner;

/// Owns every bridge and its driver task
pub struct BridgeManager {
    bridges: DashMap<BridgeId, Arc<BridgeHandle>>,
    ctx: Arc<BridgeContext>,
}

impl BridgeManager {
    pub fn new(
        runner: Arc<dyn SshRunner>,
        ssh_binary: String,
        config: BridgeConfig,
        journal: Arc<OperationJournal>,
        events: EventBus,
    ) -> Self {
        Self {
            bridges: DashMap::new(),
            ctx: Arc::new(BridgeContext {
                runner,
                ssh_binary,
                config,
                journal,
                events,
            }),
        }
    }

    /// Start a bridge. Phases progress in the background; poll with [`get`](Self::get).
    pub async fn connect(
        &self,
        request: BridgeRequest,
        clearance: ConnectClearance,
    ) -> Result<BridgeId, BridgeError> {
        request.ssh.validate()?;
        if !clearance.covers(&request.ssh) {
            return Err(BridgeError::PreflightRequired(
                "preflight clearance was issued for different parameters".to_string(),
            ));
        }
        let remote_port = request
            .remote_port
            .unwrap_or(self.ctx.config.default_remote_port);
        if remote_port == 0 {
            return Err(ValidationError::InvalidPort(0).into());
        }

        let now = Utc::now();
        let id = BridgeId::generate();
        let label = request
            .label
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| request.ssh.display_target());
        let snapshot = BridgeSnapshot {
            id: id.clone(),
            label: label.clone(),
            ssh: request.ssh,
            remote_port,
            auth_token: generate_auth_token(),
            phase: BridgePhase::Disconnected,
            reported_machine_id: None,
            error: None,
            log: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        let target = snapshot.ssh.display_target();

        let (handle, sudo_rx) = BridgeHandle::new(snapshot, self.ctx.config.max_log_lines);
        let handle = Arc::new(handle);
        let op = self.ctx.journal.begin(
            "bridge.connect",
            None,
            format!("connecting bridge {} to {}", label, target),
        );
        handle.set_connect_op(op);
        handle.transition(BridgePhase::Connecting, "connect requested")?;

        let mut task = handle.task.lock().await;
        *task = Some(tokio::spawn(run_bridge(
            Arc::clone(&self.ctx),
            Arc::clone(&handle),
            sudo_rx,
        )));
        drop(task);

        self.bridges.insert(id.clone(), handle);
        tracing::info!(bridge_id = %id, ssh = %target, remote_port, "Bridge connecting");
        Ok(id)
    }

    /// All bridges, oldest first
    pub fn list(&self) -> Vec<BridgeSnapshot> {
        let mut bridges: Vec<BridgeSnapshot> =
            self.bridges.iter().map(|entry| entry.value().snapshot()).collect();
        bridges.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        bridges
    }

    pub fn get(&self, id: &BridgeId) -> Result<BridgeSnapshot, BridgeError> {
        Ok(self.handle(id)?.snapshot())
    }

    /// Stop a bridge. Subprocesses are terminated before the phase becomes
    /// `disconnected`; disconnecting a disconnected bridge is a no-op.
    pub async fn disconnect(&self, id: &BridgeId) -> Result<BridgeSnapshot, BridgeError> {
        let handle = self.handle(id)?;
        handle.cancel.cancel();

        // Concurrent disconnects queue here until the task has been joined
        let mut task = handle.task.lock().await;
        if let Some(join) = task.take() {
            if let Err(e) = join.await {
                tracing::error!(bridge_id = %id, "Bridge task panicked: {}", e);
            }
        }

        if let Some(from) = handle.mark_disconnected() {
            let snapshot = handle.snapshot();
            if let Some(op) = handle.take_connect_op() {
                if let Err(e) = self.ctx.journal.complete(
                    &op,
                    OperationStatus::Failed,
                    None,
                    Some(format!("disconnected during {}", from)),
                ) {
                    tracing::warn!("Failed to complete connect entry: {}", e);
                }
            }
            let message = if from == BridgePhase::Error {
                format!("cleared failed bridge {}", snapshot.label)
            } else {
                format!("disconnected bridge {} from {}", snapshot.label, from)
            };
            self.ctx.journal.record(
                "bridge.disconnect",
                None,
                OperationStatus::Succeeded,
                message,
                None,
            );
            tracing::info!(bridge_id = %id, %from, "Bridge disconnected");
        }
        drop(task);

        Ok(handle.snapshot())
    }

    /// Disconnect and forget a bridge
    pub async fn remove(&self, id: &BridgeId) -> Result<(), BridgeError> {
        self.disconnect(id).await?;
        self.bridges.remove(id);
        tracing::info!(bridge_id = %id, "Bridge removed");
        Ok(())
    }

    /// Retry a paused install with a password
    pub fn submit_sudo_password(&self, id: &BridgeId, password: String) -> Result<(), BridgeError> {
        self.handle(id)?
            .resume_install(SudoDecision::Password(password))
    }

    /// Continue a paused install without elevated privileges
    pub fn skip_sudo(&self, id: &BridgeId) -> Result<(), BridgeError> {
        self.handle(id)?.resume_install(SudoDecision::Skip)
    }

    /// First telemetry frame from `machine_id`; returns the bridges it activated
    pub fn record_telemetry(&self, machine_id: &str) -> Vec<BridgeId> {
        self.bridges
            .iter()
            .filter(|entry| entry.value().record_telemetry(machine_id))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.bridges.len()
    }

    /// Bridges with live subprocesses
    pub fn active_count(&self) -> usize {
        self.bridges
            .iter()
            .filter(|entry| entry.value().phase().is_live())
            .count()
    }

    /// Disconnect every bridge
    pub async fn shutdown(&self) {
        let ids: Vec<BridgeId> = self.bridges.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.disconnect(&id).await {
                tracing::warn!(bridge_id = %id, "Failed to disconnect on shutdown: {}", e);
            }
        }
    }

    fn handle(&self, id: &BridgeId) -> Result<Arc<BridgeHandle>, BridgeError> {
        self.bridges
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| BridgeError::NotFound(id.clone()))
    }
}

/// 32 random bytes, hex encoded
fn generate_auth_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::{diagnosis_for, PreflightSession};
    use crate::ssh::testing::{Script, ScriptedRunner};
    use crate::ssh::SshInvocation;
    use fd_core::model::SshParams;
    use fd_core::types::DiagnosisCode;
    use std::time::Duration;

    fn params() -> SshParams {
        SshParams::explicit("10.0.0.5", "root", "~/.ssh/id_ed25519")
    }

    fn request() -> BridgeRequest {
        BridgeRequest {
            label: Some("lab".to_string()),
            ssh: params(),
            remote_port: None,
        }
    }

    fn clearance() -> ConnectClearance {
        let now = Utc::now();
        let mut session = PreflightSession::new(10, Duration::from_secs(120));
        session.set_params(&params());
        session.record(diagnosis_for(&params(), DiagnosisCode::Ok, now));
        session.clearance(&params(), now).unwrap()
    }

    fn is_tunnel(inv: &SshInvocation) -> bool {
        inv.args.iter().any(|a| a == "-R")
    }

    fn is_install(inv: &SshInvocation) -> bool {
        inv.args.iter().any(|a| a.contains("FLEETDECK_INSTALL_MODE"))
    }

    /// Handshake ok, tunnel stays up, install answers with `install`
    fn runner(install: impl Fn(&SshInvocation) -> Script + Send + Sync + 'static) -> ScriptedRunner {
        ScriptedRunner::new(move |inv| {
            if is_tunnel(inv) {
                Script::hang()
            } else if is_install(inv) {
                install(inv)
            } else {
                Script::exit(0, &["fleetdeck-bridge-ok"], &[])
            }
        })
    }

    fn healthy(_: &SshInvocation) -> Script {
        Script::exit(
            0,
            &["@@fleetdeck machine-id m-1", "@@fleetdeck healthy"],
            &[],
        )
    }

    fn manager(runner: &ScriptedRunner) -> (BridgeManager, Arc<OperationJournal>, EventBus) {
        let journal = Arc::new(OperationJournal::in_memory(100));
        let events = EventBus::new(16);
        let manager = BridgeManager::new(
            Arc::new(runner.clone()),
            "ssh".to_string(),
            BridgeConfig::default(),
            Arc::clone(&journal),
            events.clone(),
        );
        (manager, journal, events)
    }

    async fn wait_for(manager: &BridgeManager, id: &BridgeId, phase: BridgePhase) -> BridgeSnapshot {
        for _ in 0..200 {
            let snapshot = manager.get(id).unwrap();
            if snapshot.phase == phase {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!(
            "bridge never reached {}; stuck in {}",
            phase,
            manager.get(id).unwrap().phase
        );
    }

    fn phases_in_log(snapshot: &BridgeSnapshot) -> Vec<String> {
        snapshot
            .log
            .iter()
            .filter_map(|l| l.split_once(' ').map(|(_, rest)| rest))
            .filter_map(|rest| rest.split_once(':').map(|(t, _)| t.to_string()))
            .filter(|t| t.contains(" -> "))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_happy_path_to_telemetry() {
        let runner = runner(healthy);
        let (manager, journal, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        let snapshot = wait_for(&manager, &id, BridgePhase::Running).await;
        assert_eq!(snapshot.auth_token.len(), 64);
        assert_eq!(snapshot.remote_port, 19700);
        assert!(snapshot.reported_machine_id.is_none());

        // Unknown machine ids do not activate anything
        assert!(manager.record_telemetry("m-other").is_empty());
        assert_eq!(manager.record_telemetry("m-1"), vec![id.clone()]);

        let snapshot = manager.get(&id).unwrap();
        assert_eq!(snapshot.phase, BridgePhase::TelemetryActive);
        assert_eq!(snapshot.reported_machine_id.as_deref(), Some("m-1"));
        assert_eq!(
            phases_in_log(&snapshot),
            vec![
                "disconnected -> connecting",
                "connecting -> ssh_test",
                "ssh_test -> tunnel_open",
                "tunnel_open -> installing",
                "installing -> running",
                "running -> telemetry_active",
            ]
        );

        let connect = journal.recent(10).into_iter().find(|e| e.kind == "bridge.connect").unwrap();
        assert_eq!(connect.status, OperationStatus::Succeeded);
        assert_eq!(manager.active_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_token_passed_to_install() {
        let runner = runner(healthy);
        let (manager, _, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        let snapshot = wait_for(&manager, &id, BridgePhase::Running).await;

        let install = runner.invocations().into_iter().find(is_install).unwrap();
        let command = install.args.last().unwrap();
        assert!(command.contains(&format!("FLEETDECK_AUTH_TOKEN={}", snapshot.auth_token)));
        assert!(command.contains("FLEETDECK_REMOTE_PORT=19700"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_failure_is_classified() {
        let runner = ScriptedRunner::new(|_| {
            Script::exit(255, &[], &["root@10.0.0.5: Permission denied (publickey)."])
        });
        let (manager, journal, events) = manager(&runner);
        let mut rx = events.subscribe();

        let id = manager.connect(request(), clearance()).await.unwrap();
        let snapshot = wait_for(&manager, &id, BridgePhase::Error).await;
        let failure = snapshot.error.unwrap();
        assert_eq!(failure.phase, BridgePhase::SshTest);
        assert_eq!(failure.phase_index, BridgePhase::SshTest.index());
        assert_eq!(failure.code.as_deref(), Some("ssh_auth_failed"));
        assert_eq!(runner.live_count(), 0);

        let connect = journal.recent(10).into_iter().find(|e| e.kind == "bridge.connect").unwrap();
        assert_eq!(connect.status, OperationStatus::Failed);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, "bridge.error");
        assert_eq!(event.severity, fd_core::types::Severity::High);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunnel_forward_refused() {
        let runner = ScriptedRunner::new(|inv| {
            if is_tunnel(inv) {
                Script::exit(
                    255,
                    &[],
                    &["Error: remote port forwarding failed for listen port 19700"],
                )
            } else {
                Script::exit(0, &["fleetdeck-bridge-ok"], &[])
            }
        });
        let (manager, _, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        let snapshot = wait_for(&manager, &id, BridgePhase::Error).await;
        let failure = snapshot.error.unwrap();
        assert_eq!(failure.phase, BridgePhase::SshTest);
        assert!(failure.message.contains("forward refused"));
        assert_eq!(failure.code.as_deref(), Some("ssh_network_unreachable"));
        assert!(!runner.invocations().iter().any(is_install));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sudo_password_retry() {
        let runner = runner(|inv| {
            if inv.stdin {
                healthy(inv)
            } else {
                Script::exit(1, &["@@fleetdeck needs-sudo"], &[])
            }
        });
        let (manager, _, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        wait_for(&manager, &id, BridgePhase::NeedsSudoPassword).await;

        manager
            .submit_sudo_password(&id, "hunter2".to_string())
            .unwrap();
        // A second answer is rejected; the bridge is no longer waiting
        assert!(matches!(
            manager.skip_sudo(&id),
            Err(BridgeError::IllegalTransition { .. })
        ));

        let snapshot = wait_for(&manager, &id, BridgePhase::Running).await;
        assert_eq!(runner.stdin_writes(), vec![b"hunter2\n".to_vec()]);
        assert!(!snapshot.log.iter().any(|l| l.contains("hunter2")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_sudo_runs_user_mode() {
        let runner = runner(|inv| {
            if inv.args.iter().any(|a| a.contains("FLEETDECK_INSTALL_MODE=user")) {
                healthy(inv)
            } else {
                Script::exit(1, &["@@fleetdeck needs-sudo"], &[])
            }
        });
        let (manager, _, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        wait_for(&manager, &id, BridgePhase::NeedsSudoPassword).await;
        manager.skip_sudo(&id).unwrap();
        wait_for(&manager, &id, BridgePhase::Running).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sudo_requests_rejected_outside_pause() {
        let runner = runner(healthy);
        let (manager, _, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        let before = wait_for(&manager, &id, BridgePhase::Running).await;

        let err = manager
            .submit_sudo_password(&id, "pw".to_string())
            .unwrap_err();
        assert!(matches!(
            err,
            BridgeError::IllegalTransition {
                from: BridgePhase::Running,
                to: BridgePhase::Installing
            }
        ));
        assert!(manager.skip_sudo(&id).is_err());

        let after = manager.get(&id).unwrap();
        assert_eq!(after.phase, BridgePhase::Running);
        assert_eq!(after.log, before.log);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_mid_install_stops_subprocesses() {
        let runner = runner(|_| Script::hang());
        let (manager, journal, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        wait_for(&manager, &id, BridgePhase::Installing).await;
        assert_eq!(runner.live_count(), 2);

        let snapshot = manager.disconnect(&id).await.unwrap();
        assert_eq!(snapshot.phase, BridgePhase::Disconnected);
        assert_eq!(runner.live_count(), 0);

        // Idempotent
        let again = manager.disconnect(&id).await.unwrap();
        assert_eq!(again.phase, BridgePhase::Disconnected);
        let disconnects = journal
            .recent(20)
            .into_iter()
            .filter(|e| e.kind == "bridge.disconnect")
            .count();
        assert_eq!(disconnects, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_from_every_reachable_phase() {
        for target in [
            BridgePhase::SshTest,
            BridgePhase::Installing,
            BridgePhase::NeedsSudoPassword,
            BridgePhase::Running,
            BridgePhase::Error,
        ] {
            let runner = ScriptedRunner::new(move |inv| {
                if is_tunnel(inv) {
                    Script::hang()
                } else if is_install(inv) {
                    match target {
                        BridgePhase::Installing => Script::hang(),
                        BridgePhase::NeedsSudoPassword => {
                            Script::exit(1, &["@@fleetdeck needs-sudo"], &[])
                        }
                        BridgePhase::Error => Script::exit(2, &[], &["boom"]),
                        _ => healthy(inv),
                    }
                } else if target == BridgePhase::SshTest {
                    Script::hang()
                } else {
                    Script::exit(0, &["fleetdeck-bridge-ok"], &[])
                }
            });
            let (manager, _, _) = manager(&runner);
            let id = manager.connect(request(), clearance()).await.unwrap();
            wait_for(&manager, &id, target).await;

            let snapshot = manager.disconnect(&id).await.unwrap();
            assert_eq!(snapshot.phase, BridgePhase::Disconnected, "from {}", target);
            assert_eq!(runner.live_count(), 0, "from {}", target);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tunnel_loss_while_running() {
        let runner = ScriptedRunner::new(|inv| {
            if is_tunnel(inv) {
                Script::dies_after(Duration::from_secs(60))
            } else if is_install(inv) {
                healthy(inv)
            } else {
                Script::exit(0, &["fleetdeck-bridge-ok"], &[])
            }
        });
        let (manager, journal, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        wait_for(&manager, &id, BridgePhase::Running).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let snapshot = wait_for(&manager, &id, BridgePhase::Error).await;
        assert_eq!(snapshot.error.unwrap().phase, BridgePhase::Running);
        assert!(journal.recent(10).iter().any(|e| e.kind == "bridge.error"));
    }

    #[tokio::test]
    async fn test_connect_validation() {
        let runner = runner(healthy);
        let (manager, _, _) = manager(&runner);

        let mut bad = request();
        bad.ssh.host = String::new();
        assert!(matches!(
            manager.connect(bad, clearance()).await,
            Err(BridgeError::Validation(ValidationError::EmptyHost))
        ));

        let mut other = request();
        other.ssh.port = 2222;
        assert!(matches!(
            manager.connect(other, clearance()).await,
            Err(BridgeError::PreflightRequired(_))
        ));

        let mut zero = request();
        zero.remote_port = Some(0);
        assert!(manager.connect(zero, clearance()).await.is_err());

        assert!(runner.invocations().is_empty());
        assert_eq!(manager.count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_forgets_bridge() {
        let runner = runner(healthy);
        let (manager, _, _) = manager(&runner);

        let id = manager.connect(request(), clearance()).await.unwrap();
        wait_for(&manager, &id, BridgePhase::Running).await;
        manager.remove(&id).await.unwrap();

        assert!(matches!(manager.get(&id), Err(BridgeError::NotFound(_))));
        assert_eq!(runner.live_count(), 0);
    }
}
