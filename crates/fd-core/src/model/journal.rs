//! Operation journal entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{OperationId, OperationStatus, TargetId};

/// Append-only audit record of an orchestration action
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationJournalEntry {
    pub operation_id: OperationId,
    /// Dotted operation type, e.g. `reconcile.apply`
    #[serde(rename = "type")]
    pub kind: String,
    pub target_id: Option<TargetId>,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: String,
    pub error: Option<String>,
}

impl OperationJournalEntry {
    /// Whether the entry reached `succeeded` or `failed`
    pub fn is_terminal(&self) -> bool {
        self.status != OperationStatus::Started
    }
}
