//! IPC client for communicating with the control plane
//!
//! Uses TCP on localhost. Every request is answered by exactly one JSON line;
//! `Error` responses are surfaced as [`ControlError`] so callers can match on
//! the stable code.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use fd_core::ipc::{default_ipc_address, ControlStatus, IpcRequest, IpcResponse};
use fd_core::model::{
    AlertDestination, AlertRoutingRule, ApplySummary, BridgeRequest, BridgeSnapshot,
    DeliveryRecord, NamedCheck, NewDestination, NewRule, OperationJournalEntry,
    PreflightDiagnosis, ReconcileCandidate, ReconcileFilter, ReconcileReport, SshParams,
    TargetView, VerifySummary,
};
use fd_core::types::{BridgeId, DestinationId, OperationId, TargetId};

/// An `Error` response from the control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlError {
    pub code: String,
    pub message: String,
}

impl std::fmt::Display for ControlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for ControlError {}

/// Client for the control-plane daemon
pub struct ControlClient {
    address: String,
    stream: Option<BufReader<TcpStream>>,
}

impl ControlClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            stream: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect if not already connected
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to control plane at {}", self.address);
        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to control plane at {}. Is fd-control running?",
                self.address
            )
        })?;
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }

    /// Check if the control plane is answering
    pub async fn ping(&mut self) -> Result<bool> {
        match self.call(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn status(&mut self) -> Result<ControlStatus> {
        match self.call(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    /// Ask the daemon to exit
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.call(IpcRequest::Shutdown).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    pub async fn preflight(&mut self, session_id: &str, params: SshParams) -> Result<PreflightDiagnosis> {
        let request = IpcRequest::Preflight {
            session_id: session_id.to_string(),
            params,
        };
        match self.call(request).await? {
            IpcResponse::Diagnosis(diagnosis) => Ok(diagnosis),
            other => unexpected(other),
        }
    }

    pub async fn connect_bridge(
        &mut self,
        session_id: &str,
        request: BridgeRequest,
        confirm_bypass: bool,
    ) -> Result<BridgeId> {
        let request = IpcRequest::ConnectBridge {
            session_id: session_id.to_string(),
            request,
            confirm_bypass,
        };
        match self.call(request).await? {
            IpcResponse::BridgeCreated { bridge_id } => Ok(bridge_id),
            other => unexpected(other),
        }
    }

    pub async fn list_bridges(&mut self) -> Result<Vec<BridgeSnapshot>> {
        match self.call(IpcRequest::ListBridges).await? {
            IpcResponse::Bridges { bridges } => Ok(bridges),
            other => unexpected(other),
        }
    }

    pub async fn get_bridge(&mut self, bridge_id: &BridgeId) -> Result<BridgeSnapshot> {
        let request = IpcRequest::GetBridge {
            bridge_id: bridge_id.clone(),
        };
        match self.call(request).await? {
            IpcResponse::Bridge(bridge) => Ok(bridge),
            other => unexpected(other),
        }
    }

    pub async fn disconnect_bridge(&mut self, bridge_id: &BridgeId) -> Result<BridgeSnapshot> {
        let request = IpcRequest::DisconnectBridge {
            bridge_id: bridge_id.clone(),
        };
        match self.call(request).await? {
            IpcResponse::Bridge(bridge) => Ok(bridge),
            other => unexpected(other),
        }
    }

    pub async fn remove_bridge(&mut self, bridge_id: &BridgeId) -> Result<()> {
        let request = IpcRequest::RemoveBridge {
            bridge_id: bridge_id.clone(),
        };
        match self.call(request).await? {
            IpcResponse::Removed { .. } => Ok(()),
            other => unexpected(other),
        }
    }

    pub async fn submit_sudo_password(&mut self, bridge_id: &BridgeId, password: String) -> Result<()> {
        let request = IpcRequest::SubmitSudoPassword {
            bridge_id: bridge_id.clone(),
            password,
        };
        match self.call(request).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    pub async fn skip_sudo(&mut self, bridge_id: &BridgeId) -> Result<()> {
        let request = IpcRequest::SkipSudo {
            bridge_id: bridge_id.clone(),
        };
        match self.call(request).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    pub async fn list_targets(&mut self) -> Result<Vec<TargetView>> {
        match self.call(IpcRequest::ListTargets).await? {
            IpcResponse::Targets { targets } => Ok(targets),
            other => unexpected(other),
        }
    }

    pub async fn target_health(&mut self, target_id: &TargetId) -> Result<Vec<NamedCheck>> {
        let request = IpcRequest::GetTargetHealth {
            target_id: target_id.clone(),
        };
        match self.call(request).await? {
            IpcResponse::TargetHealth { checks, .. } => Ok(checks),
            other => unexpected(other),
        }
    }

    pub async fn plan(&mut self, filter: ReconcileFilter) -> Result<Vec<ReconcileCandidate>> {
        match self.call(IpcRequest::PlanReconciliation { filter }).await? {
            IpcResponse::Candidates { candidates } => Ok(candidates),
            other => unexpected(other),
        }
    }

    pub async fn apply(&mut self, filter: ReconcileFilter) -> Result<ApplySummary> {
        match self.call(IpcRequest::ApplyReconciliation { filter }).await? {
            IpcResponse::Applied(summary) => Ok(summary),
            other => unexpected(other),
        }
    }

    pub async fn verify(
        &mut self,
        baseline_ids: Vec<TargetId>,
        filter: ReconcileFilter,
        apply_operation_id: Option<OperationId>,
    ) -> Result<VerifySummary> {
        let request = IpcRequest::VerifyReconciliation {
            baseline_ids,
            filter,
            apply_operation_id,
        };
        match self.call(request).await? {
            IpcResponse::Verified(summary) => Ok(summary),
            other => unexpected(other),
        }
    }

    pub async fn run_reconciliation(&mut self, filter: ReconcileFilter) -> Result<ReconcileReport> {
        match self.call(IpcRequest::RunReconciliation { filter }).await? {
            IpcResponse::Reconciled(report) => Ok(report),
            other => unexpected(other),
        }
    }

    pub async fn recent_operations(&mut self, limit: usize) -> Result<Vec<OperationJournalEntry>> {
        match self.call(IpcRequest::ListRecentOperations { limit }).await? {
            IpcResponse::Operations { operations } => Ok(operations),
            other => unexpected(other),
        }
    }

    pub async fn list_destinations(&mut self) -> Result<Vec<AlertDestination>> {
        match self.call(IpcRequest::ListAlertDestinations).await? {
            IpcResponse::Destinations { destinations } => Ok(destinations),
            other => unexpected(other),
        }
    }

    pub async fn create_destination(&mut self, destination: NewDestination) -> Result<AlertDestination> {
        match self
            .call(IpcRequest::CreateAlertDestination { destination })
            .await?
        {
            IpcResponse::Destination(d) => Ok(d),
            other => unexpected(other),
        }
    }

    pub async fn list_rules(&mut self) -> Result<Vec<AlertRoutingRule>> {
        match self.call(IpcRequest::ListAlertRoutingRules).await? {
            IpcResponse::Rules { rules } => Ok(rules),
            other => unexpected(other),
        }
    }

    pub async fn create_rule(&mut self, rule: NewRule) -> Result<AlertRoutingRule> {
        match self.call(IpcRequest::CreateAlertRoutingRule { rule }).await? {
            IpcResponse::Rule(r) => Ok(r),
            other => unexpected(other),
        }
    }

    pub async fn send_test_alert(&mut self, destination_id: &DestinationId) -> Result<u16> {
        let request = IpcRequest::SendTestAlert {
            destination_id: destination_id.clone(),
        };
        match self.call(request).await? {
            IpcResponse::TestAlertSent { status } => Ok(status),
            other => unexpected(other),
        }
    }

    pub async fn deliveries(&mut self, limit: usize) -> Result<Vec<DeliveryRecord>> {
        match self.call(IpcRequest::ListAlertDeliveries { limit }).await? {
            IpcResponse::Deliveries { records } => Ok(records),
            other => unexpected(other),
        }
    }

    /// Send a request; `Error` responses become [`ControlError`]
    pub async fn call(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        match self.send_request(request).await? {
            IpcResponse::Error { code, message } => Err(ControlError { code, message }.into()),
            response => Ok(response),
        }
    }

    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        stream.get_mut().write_all(request_json.as_bytes()).await?;

        let mut response_line = String::new();
        if stream.read_line(&mut response_line).await? == 0 {
            self.stream = None;
            anyhow::bail!("Control plane closed the connection");
        }

        let response: IpcResponse = serde_json::from_str(&response_line)
            .with_context(|| "Failed to parse control-plane response")?;
        Ok(response)
    }
}

impl Default for ControlClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected<T>(response: IpcResponse) -> Result<T> {
    anyhow::bail!("Unexpected response: {:?}", response)
}
