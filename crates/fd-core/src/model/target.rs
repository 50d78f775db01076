//! Managed targets and their sync status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::serde_utils::{duration_secs, present};
use crate::error::ValidationError;
use crate::types::{TargetId, TargetKind, TargetOrigin, TargetPurpose};

/// A local or remote agent host under management
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedTarget {
    pub id: TargetId,
    pub label: String,
    pub kind: TargetKind,
    /// Agent runtime root directory on the target host
    pub root_dir: PathBuf,
    #[serde(with = "duration_secs")]
    pub poll_interval: Duration,
    pub enabled: bool,
    pub origin: TargetOrigin,
    pub purpose: TargetPurpose,
    /// Base URL answering `GET /health`, if the target exposes one
    #[serde(default)]
    pub endpoint: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ManagedTarget {
    /// Whether explicit test cleanup may delete this target
    pub fn is_disposable(&self) -> bool {
        self.origin == TargetOrigin::Smoke || self.purpose == TargetPurpose::Test
    }
}

/// Registration request for a new target
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTarget {
    /// Explicit ID; generated when absent
    #[serde(default)]
    pub id: Option<TargetId>,
    pub label: String,
    #[serde(default)]
    pub kind: TargetKind,
    pub root_dir: PathBuf,
    /// Poll interval in seconds; the configured default when absent
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub origin: TargetOrigin,
    #[serde(default)]
    pub purpose: TargetPurpose,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl NewTarget {
    /// Minimal registration for a target rooted at `root_dir`
    pub fn new(label: impl Into<String>, root_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: None,
            label: label.into(),
            kind: TargetKind::Local,
            root_dir: root_dir.into(),
            poll_interval_secs: None,
            enabled: true,
            origin: TargetOrigin::User,
            purpose: TargetPurpose::Production,
            endpoint: None,
        }
    }

    /// Reject malformed registrations
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.label.trim().is_empty() {
            return Err(ValidationError::EmptyField("label"));
        }
        if self.root_dir.as_os_str().is_empty() {
            return Err(ValidationError::EmptyField("rootDir"));
        }
        if let Some(secs) = self.poll_interval_secs {
            validate_poll_interval(secs)?;
        }
        if let Some(endpoint) = &self.endpoint {
            super::validate_http_url(endpoint)?;
        }
        Ok(())
    }
}

/// Edit request; absent fields are left unchanged
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetPatch {
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub root_dir: Option<PathBuf>,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub purpose: Option<TargetPurpose>,
    /// `Some(None)` clears the endpoint
    #[serde(default, deserialize_with = "present")]
    pub endpoint: Option<Option<String>>,
}

impl TargetPatch {
    /// Reject malformed edits
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(label) = &self.label {
            if label.trim().is_empty() {
                return Err(ValidationError::EmptyField("label"));
            }
        }
        if let Some(secs) = self.poll_interval_secs {
            validate_poll_interval(secs)?;
        }
        if let Some(Some(endpoint)) = &self.endpoint {
            super::validate_http_url(endpoint)?;
        }
        Ok(())
    }

    /// Apply the edit to a target
    pub fn apply_to(&self, target: &mut ManagedTarget, now: DateTime<Utc>) {
        if let Some(label) = &self.label {
            target.label = label.clone();
        }
        if let Some(root_dir) = &self.root_dir {
            target.root_dir = root_dir.clone();
        }
        if let Some(secs) = self.poll_interval_secs {
            target.poll_interval = Duration::from_secs(secs);
        }
        if let Some(enabled) = self.enabled {
            target.enabled = enabled;
        }
        if let Some(purpose) = self.purpose {
            target.purpose = purpose;
        }
        if let Some(endpoint) = &self.endpoint {
            target.endpoint = endpoint.clone();
        }
        target.updated_at = now;
    }
}

fn validate_poll_interval(secs: u64) -> Result<(), ValidationError> {
    if secs == 0 || secs > 86_400 {
        return Err(ValidationError::OutOfRange {
            field: "pollInterval",
            value: secs,
        });
    }
    Ok(())
}

/// Raw sync observations for one target.
///
/// Staleness is deliberately absent: it is derived on read by [`SyncRecord::status`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub running: bool,
    pub available: bool,
    pub consecutive_failure_count: u32,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncRecord {
    /// Record a successful poll
    pub fn record_success(&mut self, at: DateTime<Utc>) {
        self.available = true;
        self.consecutive_failure_count = 0;
        self.last_successful_sync_at = Some(at);
        self.last_checked_at = Some(at);
        self.last_error = None;
    }

    /// Record a failed poll
    pub fn record_failure(&mut self, at: DateTime<Utc>, error: impl Into<String>) {
        self.available = false;
        self.consecutive_failure_count = self.consecutive_failure_count.saturating_add(1);
        self.last_checked_at = Some(at);
        self.last_error = Some(error.into());
    }

    /// Derive the externally visible status at `now`
    pub fn status(&self, now: DateTime<Utc>, stale_threshold: Duration) -> SyncStatus {
        let stale = match self.last_successful_sync_at {
            Some(last) => {
                let threshold = chrono::Duration::from_std(stale_threshold)
                    .unwrap_or(chrono::Duration::MAX);
                now.signed_duration_since(last) > threshold
            }
            // Never synced: a running loop gets the benefit of the doubt
            None => !self.running,
        };

        SyncStatus {
            running: self.running,
            available: self.available,
            consecutive_failure_count: self.consecutive_failure_count,
            stale,
            last_successful_sync_at: self.last_successful_sync_at,
            last_checked_at: self.last_checked_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Derived per-target sync status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub running: bool,
    pub available: bool,
    pub consecutive_failure_count: u32,
    pub stale: bool,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl SyncStatus {
    /// Running, available and fresh
    pub fn is_healthy(&self) -> bool {
        self.running && self.available && !self.stale
    }
}

/// A target together with its current sync status
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetView {
    pub target: ManagedTarget,
    pub status: SyncStatus,
}
