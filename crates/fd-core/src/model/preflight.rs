//! Preflight diagnosis records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::bridge::SshParams;
use crate::types::{CheckStatus, DiagnosisCode};

/// A named sub-check with its status and a human detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedCheck {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

impl NamedCheck {
    pub fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }

    pub fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, detail)
    }

    pub fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    pub fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, detail)
    }
}

/// Deterministic parameter edit suggested for a failed probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuickFix {
    /// Retry with a different default key
    TryKeyPath { path: String },
    /// Retry with the default user on port 22
    RevertUserAndPort { user: String, port: u16 },
}

/// Result of one reachability probe. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreflightDiagnosis {
    pub code: DiagnosisCode,
    pub title: String,
    pub message: String,
    pub hints: Vec<String>,
    pub checks: Vec<NamedCheck>,
    /// Parameters the probe ran against
    pub params: SshParams,
    pub checked_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(default)]
    pub quick_fix: Option<QuickFix>,
}

impl PreflightDiagnosis {
    /// Whether this diagnosis clears a connection attempt
    pub fn passed(&self) -> bool {
        self.code.is_pass()
    }
}
