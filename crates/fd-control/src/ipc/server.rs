//! IPC server implementation
//!
//! Listens on localhost TCP for newline-delimited JSON requests from the CLI
//! and desktop app. One response line is written per request line.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use fd_core::error::RegistryError;
use fd_core::ipc::{ControlStatus, IpcRequest, IpcResponse};

use crate::state::ControlState;

/// IPC server for CLI/GUI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    state: Arc<ControlState>,
    start_time: Instant,
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    pub fn new(address: String, state: Arc<ControlState>) -> Self {
        Self {
            address,
            state,
            start_time: Instant::now(),
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Bind and serve until the shutdown token fires
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        tracing::info!("IPC server listening on {}", listener.local_addr()?);
        let shutdown = self.shutdown_token.clone().unwrap_or_default();

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            match accepted {
                Ok((stream, peer_addr)) => {
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let state = Arc::clone(&self.state);
                    let start_time = self.start_time;
                    let shutdown_token = self.shutdown_token.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state, start_time, shutdown_token).await {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }

        tracing::info!("IPC server stopped");
        Ok(())
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<ControlState>,
    start_time: Instant,
    shutdown_token: Option<CancellationToken>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
            Ok(request) => handle_request(request, &state, start_time, shutdown_token.as_ref()).await,
            Err(e) => IpcResponse::Error {
                code: "invalid_request".to_string(),
                message: format!("Invalid request: {}", e),
            },
        };

        let mut response_json = serde_json::to_string(&response)?;
        response_json.push('\n');
        writer.write_all(response_json.as_bytes()).await?;
    }

    Ok(())
}

async fn handle_request(
    request: IpcRequest,
    state: &ControlState,
    start_time: Instant,
    shutdown_token: Option<&CancellationToken>,
) -> IpcResponse {
    match request {
        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::GetStatus => IpcResponse::Status(ControlStatus {
            running: true,
            uptime_secs: start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            target_count: state.registry.len(),
            bridge_count: state.bridges.count(),
            active_bridge_count: state.bridges.active_count(),
            ipc_address: state.config.ipc_address(),
        }),

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            match shutdown_token {
                Some(token) => {
                    token.cancel();
                    IpcResponse::Ok
                }
                None => IpcResponse::Error {
                    code: "unsupported".to_string(),
                    message: "Shutdown not supported (no shutdown token configured)".to_string(),
                },
            }
        }

        // Preflight
        IpcRequest::Preflight { session_id, params } => {
            match state.preflight.run(&session_id, &params).await {
                Ok(diagnosis) => IpcResponse::Diagnosis(diagnosis),
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::PreflightHistory { session_id } => IpcResponse::Diagnoses {
            diagnoses: state.preflight.history(&session_id),
        },

        // Bridges
        IpcRequest::ConnectBridge {
            session_id,
            request,
            confirm_bypass,
        } => {
            let clearance = match state
                .preflight
                .clearance(&session_id, &request.ssh, confirm_bypass)
            {
                Ok(c) => c,
                Err(e) => return IpcResponse::error(&e),
            };
            match state.bridges.connect(request, clearance).await {
                Ok(bridge_id) => {
                    // The clearance is spent; the next connect needs a new preflight
                    state.preflight.forget(&session_id);
                    IpcResponse::BridgeCreated { bridge_id }
                }
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::ListBridges => IpcResponse::Bridges {
            bridges: state.bridges.list(),
        },

        IpcRequest::GetBridge { bridge_id } => match state.bridges.get(&bridge_id) {
            Ok(b) => IpcResponse::Bridge(b),
            Err(e) => IpcResponse::error(&e),
        },

        IpcRequest::DisconnectBridge { bridge_id } => {
            match state.bridges.disconnect(&bridge_id).await {
                Ok(b) => IpcResponse::Bridge(b),
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::RemoveBridge { bridge_id } => match state.bridges.remove(&bridge_id).await {
            Ok(()) => IpcResponse::Removed { count: 1 },
            Err(e) => IpcResponse::error(&e),
        },

        IpcRequest::SubmitSudoPassword {
            bridge_id,
            password,
        } => match state.bridges.submit_sudo_password(&bridge_id, password) {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error(&e),
        },

        IpcRequest::SkipSudo { bridge_id } => match state.bridges.skip_sudo(&bridge_id) {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error(&e),
        },

        IpcRequest::ReportTelemetry { machine_id } => {
            let bridges = state
                .bridges
                .record_telemetry(&machine_id)
                .iter()
                .filter_map(|id| state.bridges.get(id).ok())
                .collect();
            IpcResponse::Bridges { bridges }
        }

        // Targets
        IpcRequest::ListTargets => IpcResponse::Targets {
            targets: state.registry.views(Utc::now()),
        },

        IpcRequest::GetTargetHealth { target_id } => {
            match state.registry.health_checks(&target_id, Utc::now()) {
                Ok(checks) => IpcResponse::TargetHealth { target_id, checks },
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::RegisterTarget { target } => {
            let result = state.registry.register(target).and_then(|t| {
                if t.enabled {
                    state.sync.start(&t.id);
                }
                state.registry.view(&t.id, Utc::now())
            });
            target_response(result)
        }

        IpcRequest::UpdateTarget { target_id, patch } => {
            if let Err(e) = state.registry.update(&target_id, &patch) {
                return IpcResponse::error(&e);
            }
            state.sync.refresh(&target_id).await;
            target_response(state.registry.view(&target_id, Utc::now()))
        }

        IpcRequest::RemoveTarget { target_id } => {
            state.sync.stop(&target_id).await;
            match state.registry.remove(&target_id) {
                Ok(_) => IpcResponse::Removed { count: 1 },
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::CleanupTestTargets => match state.registry.cleanup_test_targets() {
            Ok(removed) => {
                for id in &removed {
                    state.sync.stop(id).await;
                }
                IpcResponse::Removed {
                    count: removed.len(),
                }
            }
            Err(e) => IpcResponse::error(&e),
        },

        // Reconciliation
        IpcRequest::PlanReconciliation { filter } => IpcResponse::Candidates {
            candidates: state.reconcile.plan(&filter),
        },

        IpcRequest::ApplyReconciliation { filter } => {
            IpcResponse::Applied(state.reconcile.apply(&filter).await)
        }

        IpcRequest::VerifyReconciliation {
            baseline_ids,
            filter,
            apply_operation_id,
        } => IpcResponse::Verified(
            state
                .reconcile
                .verify(&baseline_ids, &filter, apply_operation_id.as_ref())
                .await,
        ),

        IpcRequest::RunReconciliation { filter } => {
            IpcResponse::Reconciled(state.reconcile.run_cycle(&filter).await)
        }

        // Alerts
        IpcRequest::ListAlertDestinations => IpcResponse::Destinations {
            destinations: state.alerts.catalog().list_destinations(),
        },

        IpcRequest::CreateAlertDestination { destination } => {
            match state.alerts.catalog().create_destination(destination) {
                Ok(d) => IpcResponse::Destination(d),
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::PatchAlertDestination {
            destination_id,
            patch,
        } => match state
            .alerts
            .catalog()
            .patch_destination(&destination_id, &patch)
        {
            Ok(d) => IpcResponse::Destination(d),
            Err(e) => IpcResponse::error(&e),
        },

        IpcRequest::SendTestAlert { destination_id } => {
            match state.alerts.send_test(&destination_id).await {
                Ok(status) => IpcResponse::TestAlertSent { status },
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::ListAlertRoutingRules => IpcResponse::Rules {
            rules: state.alerts.catalog().list_rules(),
        },

        IpcRequest::CreateAlertRoutingRule { rule } => {
            match state.alerts.catalog().create_rule(rule) {
                Ok(r) => IpcResponse::Rule(r),
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::PatchAlertRoutingRule { rule_id, patch } => {
            match state.alerts.catalog().patch_rule(&rule_id, &patch) {
                Ok(r) => IpcResponse::Rule(r),
                Err(e) => IpcResponse::error(&e),
            }
        }

        IpcRequest::ListAlertDeliveries { limit } => IpcResponse::Deliveries {
            records: state.alerts.recent_deliveries(limit),
        },

        IpcRequest::ListRecentOperations { limit } => IpcResponse::Operations {
            operations: state.journal.recent(limit),
        },
    }
}

fn target_response(result: Result<fd_core::model::TargetView, RegistryError>) -> IpcResponse {
    match result {
        Ok(view) => IpcResponse::Target(view),
        Err(e) => IpcResponse::error(&e),
    }
}
