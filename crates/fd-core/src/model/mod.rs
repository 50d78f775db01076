//! Domain records shared between the daemon and its clients

mod alert;
mod bridge;
mod journal;
mod preflight;
mod reconcile;
mod target;

pub use alert::{
    event_signature, AlertDestination, AlertRoutingRule, DeliveryOutcome, DeliveryRecord,
    DestinationKind, DestinationPatch, DispatchReport, FleetEvent, NewDestination, NewRule,
    RulePatch, TargetScope,
};
pub use bridge::{
    expand_tilde, AuthMaterial, BridgeFailure, BridgeRequest, BridgeSnapshot, SshParams,
};
pub use journal::OperationJournalEntry;
pub use preflight::{NamedCheck, PreflightDiagnosis, QuickFix};
pub use reconcile::{
    ApplySummary, ReconcileCandidate, ReconcileFilter, ReconcileReport, RemediationOutcome,
    RemediationResult, VerifySummary,
};
pub use target::{ManagedTarget, NewTarget, SyncRecord, SyncStatus, TargetPatch, TargetView};

use crate::error::ValidationError;

/// Accept only absolute http(s) URLs with a host part
pub(crate) fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .ok_or_else(|| ValidationError::InvalidUrl(url.to_string()))?;
    let host = rest.split(['/', '?', '#']).next().unwrap_or_default();
    if host.is_empty() || host.chars().any(char::is_whitespace) {
        return Err(ValidationError::InvalidUrl(url.to_string()));
    }
    Ok(())
}
