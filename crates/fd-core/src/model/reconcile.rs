//! Reconciliation filters and phase results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::target::SyncStatus;
use crate::types::{OperationId, TargetId};

/// Which unhealthy targets a reconciliation pass considers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcileFilter {
    /// Failure count at or above which a target is a candidate; 0 disables the criterion
    pub min_consecutive_failures: u32,
    pub include_stale: bool,
    pub include_unavailable: bool,
}

impl Default for ReconcileFilter {
    fn default() -> Self {
        Self {
            min_consecutive_failures: 2,
            include_stale: true,
            include_unavailable: true,
        }
    }
}

/// A target judged unhealthy at plan time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileCandidate {
    pub target_id: TargetId,
    pub label: String,
    pub reasons: Vec<String>,
    pub status: SyncStatus,
}

/// What happened to one candidate during apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RemediationResult {
    Restarted,
    Skipped { reason: String },
}

/// Per-target apply outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemediationOutcome {
    pub target_id: TargetId,
    #[serde(flatten)]
    pub result: RemediationResult,
}

/// Tally of an apply pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    /// Journal entry that stays `started` until verify completes
    pub operation_id: OperationId,
    pub attempted: usize,
    pub restarted: usize,
    pub skipped: usize,
    /// Candidate set captured immediately before remediation
    pub baseline: Vec<TargetId>,
    pub outcomes: Vec<RemediationOutcome>,
}

/// Convergence check after apply
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifySummary {
    /// Baseline targets no longer unhealthy
    pub resolved: usize,
    /// Literal post-apply candidate count
    pub remaining: usize,
    pub remaining_ids: Vec<TargetId>,
    pub checked_at: DateTime<Utc>,
}

/// Result of a full plan/apply/verify cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub plan: Vec<ReconcileCandidate>,
    pub apply: ApplySummary,
    pub verify: VerifySummary,
}
