//! Alert destinations, routing rules and fleet events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ValidationError;
use crate::types::{DestinationId, RuleId, Severity, TargetId};

/// Transport used to reach a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    #[default]
    Webhook,
}

/// A configured notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDestination {
    pub id: DestinationId,
    pub name: String,
    pub kind: DestinationKind,
    pub url: String,
    pub minimum_severity: Severity,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertDestination {
    /// Whether this destination wants events of `severity`
    pub fn accepts(&self, severity: Severity) -> bool {
        self.enabled && severity >= self.minimum_severity
    }
}

/// Request to create a destination
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDestination {
    pub name: String,
    #[serde(default)]
    pub kind: DestinationKind,
    pub url: String,
    pub minimum_severity: Severity,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NewDestination {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        super::validate_http_url(&self.url)
    }
}

/// Partial update of a destination
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DestinationPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub minimum_severity: Option<Severity>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl DestinationPatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyField("name"));
            }
        }
        if let Some(url) = &self.url {
            super::validate_http_url(url)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, destination: &mut AlertDestination, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            destination.name = name.clone();
        }
        if let Some(url) = &self.url {
            destination.url = url.clone();
        }
        if let Some(severity) = self.minimum_severity {
            destination.minimum_severity = severity;
        }
        if let Some(enabled) = self.enabled {
            destination.enabled = enabled;
        }
        destination.updated_at = now;
    }
}

/// Which targets a rule applies to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", content = "targetIds", rename_all = "snake_case")]
pub enum TargetScope {
    #[default]
    All,
    Targets(Vec<TargetId>),
}

impl TargetScope {
    /// Fleet-wide events (no target) only match `All`
    pub fn matches(&self, target_id: Option<&TargetId>) -> bool {
        match self {
            TargetScope::All => true,
            TargetScope::Targets(ids) => target_id.map_or(false, |id| ids.contains(id)),
        }
    }
}

/// Routes events of sufficient severity to destinations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRoutingRule {
    pub id: RuleId,
    pub name: String,
    pub minimum_severity: Severity,
    pub target_scope: TargetScope,
    pub destination_ids: Vec<DestinationId>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlertRoutingRule {
    /// Whether the rule fires for an event
    pub fn matches(&self, event: &FleetEvent) -> bool {
        self.enabled
            && event.severity >= self.minimum_severity
            && self.target_scope.matches(event.target_id.as_ref())
    }
}

/// Request to create a rule
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRule {
    pub name: String,
    pub minimum_severity: Severity,
    #[serde(default)]
    pub target_scope: TargetScope,
    pub destination_ids: Vec<DestinationId>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl NewRule {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if self.destination_ids.is_empty() {
            return Err(ValidationError::EmptyField("destinationIds"));
        }
        Ok(())
    }
}

/// Partial update of a rule
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RulePatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub minimum_severity: Option<Severity>,
    #[serde(default)]
    pub target_scope: Option<TargetScope>,
    #[serde(default)]
    pub destination_ids: Option<Vec<DestinationId>>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl RulePatch {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ValidationError::EmptyField("name"));
            }
        }
        if let Some(ids) = &self.destination_ids {
            if ids.is_empty() {
                return Err(ValidationError::EmptyField("destinationIds"));
            }
        }
        Ok(())
    }

    pub fn apply_to(&self, rule: &mut AlertRoutingRule, now: DateTime<Utc>) {
        if let Some(name) = &self.name {
            rule.name = name.clone();
        }
        if let Some(severity) = self.minimum_severity {
            rule.minimum_severity = severity;
        }
        if let Some(scope) = &self.target_scope {
            rule.target_scope = scope.clone();
        }
        if let Some(ids) = &self.destination_ids {
            rule.destination_ids = ids.clone();
        }
        if let Some(enabled) = self.enabled {
            rule.enabled = enabled;
        }
        rule.updated_at = now;
    }
}

fn default_true() -> bool {
    true
}

/// Something noteworthy that happened in the fleet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FleetEvent {
    pub severity: Severity,
    /// Dotted event kind, e.g. `bridge.error`
    pub kind: String,
    pub target_id: Option<TargetId>,
    /// Stable dedup key: same kind and subject, same signature
    pub signature: String,
    pub title: String,
    pub message: String,
    pub occurred_at: DateTime<Utc>,
}

impl FleetEvent {
    /// Build an event whose signature is derived from `kind` and `subject`
    pub fn new(
        severity: Severity,
        kind: impl Into<String>,
        subject: &str,
        target_id: Option<TargetId>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let kind = kind.into();
        let signature = event_signature(&kind, subject);
        Self {
            severity,
            kind,
            target_id,
            signature,
            title: title.into(),
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Short hex digest of an event kind and its subject
pub fn event_signature(kind: &str, subject: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update([0u8]);
    hasher.update(subject.as_bytes());
    hex::encode(&hasher.finalize()[..8])
}

/// Result of one delivery attempt (or its suppression)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered { status: u16 },
    Failed { code: String, error: String },
    Suppressed,
}

/// Audit record of a delivery decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub destination_id: DestinationId,
    pub signature: String,
    pub severity: Severity,
    #[serde(flatten)]
    pub outcome: DeliveryOutcome,
    pub at: DateTime<Utc>,
    /// True for manual test sends
    #[serde(default)]
    pub test: bool,
}

/// Summary of dispatching one event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub delivered: usize,
    pub suppressed: usize,
    pub failed: usize,
    pub records: Vec<DeliveryRecord>,
}
