//! IPC protocol for CLI/desktop to control-plane communication
//!
//! Uses newline-delimited JSON messages over TCP on localhost (127.0.0.1).
//! Every request gets exactly one response; failures are carried as
//! `IpcResponse::Error` with a stable code.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_IPC_PORT;
use crate::error::ErrorCode;
use crate::model::{
    ApplySummary, AlertDestination, AlertRoutingRule, BridgeRequest, BridgeSnapshot,
    DeliveryRecord, DestinationPatch, NamedCheck, NewDestination, NewRule, NewTarget,
    OperationJournalEntry, PreflightDiagnosis, ReconcileCandidate, ReconcileFilter,
    ReconcileReport, RulePatch, SshParams, TargetPatch, TargetView, VerifySummary,
};
use crate::types::{BridgeId, DestinationId, OperationId, RuleId, TargetId};

/// Default IPC address on localhost
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// IPC request from client (desktop/CLI) to the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Keepalive
    Ping,

    /// Daemon status
    GetStatus,

    /// Stop the daemon
    Shutdown,

    /// Run a reachability probe within a preflight session
    Preflight {
        session_id: String,
        params: SshParams,
    },

    /// Diagnoses recorded in a session, most recent first
    PreflightHistory { session_id: String },

    /// Connect a bridge; the session's preflight state gates the attempt
    ConnectBridge {
        session_id: String,
        request: BridgeRequest,
        /// Explicitly accept connecting without a fresh passing preflight
        #[serde(default)]
        confirm_bypass: bool,
    },

    /// List all bridges
    ListBridges,

    /// Get one bridge
    GetBridge { bridge_id: BridgeId },

    /// Disconnect a bridge (idempotent)
    DisconnectBridge { bridge_id: BridgeId },

    /// Disconnect and forget a bridge
    RemoveBridge { bridge_id: BridgeId },

    /// Resume an install paused for elevated privileges
    SubmitSudoPassword { bridge_id: BridgeId, password: String },

    /// Continue an install paused for elevated privileges in user mode
    SkipSudo { bridge_id: BridgeId },

    /// First telemetry frame from a machine
    ReportTelemetry { machine_id: String },

    /// List targets with their sync status
    ListTargets,

    /// Named health checks for one target
    GetTargetHealth { target_id: TargetId },

    /// Register a new target
    RegisterTarget { target: NewTarget },

    /// Edit a target
    UpdateTarget {
        target_id: TargetId,
        patch: TargetPatch,
    },

    /// Explicitly remove a target
    RemoveTarget { target_id: TargetId },

    /// Remove all smoke-origin and test-purpose targets
    CleanupTestTargets,

    /// Dry-run: which targets would be remediated
    PlanReconciliation { filter: ReconcileFilter },

    /// Remediate current candidates
    ApplyReconciliation { filter: ReconcileFilter },

    /// Re-scan after apply and compare against the baseline
    VerifyReconciliation {
        baseline_ids: Vec<TargetId>,
        filter: ReconcileFilter,
        /// Apply entry to complete in the journal
        #[serde(default)]
        apply_operation_id: Option<OperationId>,
    },

    /// Plan, apply and verify as one operation
    RunReconciliation { filter: ReconcileFilter },

    /// List alert destinations
    ListAlertDestinations,

    /// Create an alert destination
    CreateAlertDestination { destination: NewDestination },

    /// Update an alert destination
    PatchAlertDestination {
        destination_id: DestinationId,
        patch: DestinationPatch,
    },

    /// Deliver a test alert to one destination, bypassing rules and cooldown
    SendTestAlert { destination_id: DestinationId },

    /// List routing rules
    ListAlertRoutingRules,

    /// Create a routing rule
    CreateAlertRoutingRule { rule: NewRule },

    /// Update a routing rule
    PatchAlertRoutingRule { rule_id: RuleId, patch: RulePatch },

    /// Recent delivery records, most recent first
    ListAlertDeliveries { limit: usize },

    /// Recent journal entries, most recent first
    ListRecentOperations { limit: usize },
}

/// IPC response from the control plane to a client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Pong response
    Pong,

    /// Generic success
    Ok,

    /// Daemon status
    Status(ControlStatus),

    /// A single diagnosis
    Diagnosis(PreflightDiagnosis),

    /// Session diagnosis history
    Diagnoses { diagnoses: Vec<PreflightDiagnosis> },

    /// Bridge accepted; phases progress asynchronously
    BridgeCreated { bridge_id: BridgeId },

    /// List of bridges
    Bridges { bridges: Vec<BridgeSnapshot> },

    /// Single bridge
    Bridge(BridgeSnapshot),

    /// List of targets
    Targets { targets: Vec<TargetView> },

    /// Single target
    Target(TargetView),

    /// Named checks for one target
    TargetHealth {
        target_id: TargetId,
        checks: Vec<NamedCheck>,
    },

    /// Number of records removed
    Removed { count: usize },

    /// Reconciliation plan
    Candidates { candidates: Vec<ReconcileCandidate> },

    /// Apply tally
    Applied(ApplySummary),

    /// Verify result
    Verified(VerifySummary),

    /// Full cycle report
    Reconciled(ReconcileReport),

    /// Alert destinations
    Destinations { destinations: Vec<AlertDestination> },

    /// Single destination
    Destination(AlertDestination),

    /// Routing rules
    Rules { rules: Vec<AlertRoutingRule> },

    /// Single rule
    Rule(AlertRoutingRule),

    /// Delivery records
    Deliveries { records: Vec<DeliveryRecord> },

    /// Test alert accepted by the destination
    TestAlertSent { status: u16 },

    /// Journal entries
    Operations { operations: Vec<OperationJournalEntry> },

    /// Error response
    Error { code: String, message: String },
}

impl IpcResponse {
    /// Build an error response from any coded error
    pub fn error<E: ErrorCode + std::fmt::Display>(err: &E) -> Self {
        IpcResponse::Error {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Control-plane status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlStatus {
    pub running: bool,
    pub uptime_secs: u64,
    pub version: String,
    pub target_count: usize,
    pub bridge_count: usize,
    /// Bridges in a phase with live subprocesses
    pub active_bridge_count: usize,
    pub ipc_address: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::types::BridgePhase;

    #[test]
    fn test_request_serialization() {
        let req = IpcRequest::SubmitSudoPassword {
            bridge_id: BridgeId::new("b1"),
            password: "hunter2".to_string(),
        };

        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("submit_sudo_password"));

        let decoded: IpcRequest = serde_json::from_str(&json).unwrap();
        match decoded {
            IpcRequest::SubmitSudoPassword { bridge_id, password } => {
                assert_eq!(bridge_id.as_str(), "b1");
                assert_eq!(password, "hunter2");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_connect_request_defaults_bypass_off() {
        let json = r#"{
            "type": "connect_bridge",
            "session_id": "s1",
            "request": {
                "ssh": {
                    "host": "h",
                    "port": 22,
                    "user": "root",
                    "auth": {"type": "key_path", "path": "~/.ssh/id_rsa"}
                }
            }
        }"#;
        let decoded: IpcRequest = serde_json::from_str(json).unwrap();
        match decoded {
            IpcRequest::ConnectBridge {
                confirm_bypass,
                request,
                ..
            } => {
                assert!(!confirm_bypass);
                assert!(request.remote_port.is_none());
                assert_eq!(request.ssh.port, 22);
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_error_response_carries_code() {
        let err = BridgeError::IllegalTransition {
            from: BridgePhase::Running,
            to: BridgePhase::Installing,
        };
        let resp = IpcResponse::error(&err);
        let json = serde_json::to_string(&resp).unwrap();
        let decoded: IpcResponse = serde_json::from_str(&json).unwrap();
        match decoded {
            IpcResponse::Error { code, message } => {
                assert_eq!(code, "illegal_state");
                assert!(message.contains("running"));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_status_response_serialization() {
        let resp = IpcResponse::Status(ControlStatus {
            running: true,
            uptime_secs: 60,
            version: "0.1.0".to_string(),
            target_count: 3,
            bridge_count: 1,
            active_bridge_count: 1,
            ipc_address: default_ipc_address(),
        });
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"targetCount\":3"));
        let decoded: IpcResponse = serde_json::from_str(&json).unwrap();
        assert!(matches!(decoded, IpcResponse::Status(s) if s.bridge_count == 1));
    }
}
