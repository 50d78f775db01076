//! Plan, apply and verify
//!
//! Plan is a pure read of the registry. Apply re-derives the candidates and
//! restarts each one's sync loop; per-target locks keep two passes from
//! remediating the same target at once. Verify waits for the loops to settle,
//! re-plans and compares with the apply baseline.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::{Mutex, OwnedMutexGuard};

use fd_core::model::{
    ApplySummary, FleetEvent, ReconcileCandidate, ReconcileFilter, ReconcileReport,
    RemediationOutcome, RemediationResult, VerifySummary,
};
use fd_core::types::{OperationId, OperationStatus, Severity, TargetId};

use super::plan::{candidate_reasons, select_candidates};
use crate::events::EventBus;
use crate::journal::OperationJournal;
use crate::registry::TargetRegistry;
use crate::sync::SyncSupervisor;

/// The one remediation action: restart a target's sync loop
#[async_trait]
pub trait Remediator: Send + Sync {
    async fn restart(&self, target_id: &TargetId) -> Result<(), String>;
}

#[async_trait]
impl Remediator for SyncSupervisor {
    async fn restart(&self, target_id: &TargetId) -> Result<(), String> {
        match SyncSupervisor::restart(self, target_id).await {
            Ok(true) => Ok(()),
            Ok(false) => Err("target is disabled".to_string()),
            Err(e) => Err(e.to_string()),
        }
    }
}

pub struct ReconcileEngine {
    registry: Arc<TargetRegistry>,
    remediator: Arc<dyn Remediator>,
    journal: Arc<OperationJournal>,
    events: EventBus,
    settle_delay: Duration,
    locks: DashMap<TargetId, Arc<Mutex<()>>>,
}

impl ReconcileEngine {
    pub fn new(
        registry: Arc<TargetRegistry>,
        remediator: Arc<dyn Remediator>,
        journal: Arc<OperationJournal>,
        events: EventBus,
        settle_delay: Duration,
    ) -> Self {
        Self {
            registry,
            remediator,
            journal,
            events,
            settle_delay,
            locks: DashMap::new(),
        }
    }

    /// Candidates at `now`, without journaling
    pub fn candidates_at(&self, filter: &ReconcileFilter, now: DateTime<Utc>) -> Vec<ReconcileCandidate> {
        let snapshot = self.registry.list().into_iter().map(|target| {
            let status = self.registry.status(&target.id, now);
            (target, status)
        });
        select_candidates(snapshot, filter)
    }

    /// Dry run
    pub fn plan(&self, filter: &ReconcileFilter) -> Vec<ReconcileCandidate> {
        let candidates = self.candidates_at(filter, Utc::now());
        self.journal.record(
            "reconcile.plan",
            None,
            OperationStatus::Succeeded,
            format!("{} candidates", candidates.len()),
            None,
        );
        candidates
    }

    /// Remediate the current candidates. The returned operation stays
    /// `started` until [`verify`](Self::verify) completes it.
    pub async fn apply(&self, filter: &ReconcileFilter) -> ApplySummary {
        let op = self.journal.begin("reconcile.apply", None, "applying remediation");
        let candidates = self.candidates_at(filter, Utc::now());

        let outcomes = join_all(candidates.iter().map(|candidate| async move {
            let _guard = self.lock(&candidate.target_id).await;
            self.remediate(candidate, filter).await
        }))
        .await;

        self.summarize(op, &candidates, outcomes)
    }

    /// Re-plan after the settle delay and compare against `baseline`
    pub async fn verify(
        &self,
        baseline: &[TargetId],
        filter: &ReconcileFilter,
        apply_operation: Option<&OperationId>,
    ) -> VerifySummary {
        tokio::time::sleep(self.settle_delay).await;

        let checked_at = Utc::now();
        let remaining = self.candidates_at(filter, checked_at);
        let baseline_set: HashSet<&TargetId> = baseline.iter().collect();
        let still_failing = remaining
            .iter()
            .filter(|c| baseline_set.contains(&c.target_id))
            .count();

        let summary = VerifySummary {
            resolved: baseline_set.len().saturating_sub(still_failing),
            remaining: remaining.len(),
            remaining_ids: remaining.iter().map(|c| c.target_id.clone()).collect(),
            checked_at,
        };
        let message = format!(
            "{} resolved, {} remaining",
            summary.resolved, summary.remaining
        );

        self.journal.record(
            "reconcile.verify",
            None,
            OperationStatus::Succeeded,
            message.clone(),
            None,
        );
        if let Some(op) = apply_operation {
            let (status, error) = if still_failing == 0 {
                (OperationStatus::Succeeded, None)
            } else {
                (
                    OperationStatus::Failed,
                    Some(format!("{} baseline targets still unhealthy", still_failing)),
                )
            };
            if let Err(e) = self.journal.complete(op, status, Some(message), error) {
                tracing::warn!(operation_id = %op, "Failed to complete apply entry: {}", e);
            }
        }

        if !remaining.is_empty() {
            let mut ids: Vec<&str> = remaining.iter().map(|c| c.target_id.as_str()).collect();
            ids.sort_unstable();
            self.events.publish(FleetEvent::new(
                Severity::High,
                "reconcile.unresolved",
                &ids.join(","),
                None,
                format!("{} targets still unhealthy after reconciliation", remaining.len()),
                remaining
                    .iter()
                    .map(|c| format!("{}: {}", c.label, c.reasons.join(", ")))
                    .collect::<Vec<_>>()
                    .join("; "),
            ));
        }

        tracing::info!(
            resolved = summary.resolved,
            remaining = summary.remaining,
            "Reconciliation verified"
        );
        summary
    }

    /// Plan, apply and verify while holding every candidate's lock
    pub async fn run_cycle(&self, filter: &ReconcileFilter) -> ReconcileReport {
        let plan = self.plan(filter);

        let op = self.journal.begin("reconcile.apply", None, "applying remediation");
        let candidates = self.candidates_at(filter, Utc::now());

        // Sorted acquisition so concurrent cycles cannot deadlock
        let mut ids: Vec<&TargetId> = candidates.iter().map(|c| &c.target_id).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }

        let outcomes = join_all(
            candidates
                .iter()
                .map(|candidate| self.remediate(candidate, filter)),
        )
        .await;
        let apply = self.summarize(op, &candidates, outcomes);
        let verify = self
            .verify(&apply.baseline, filter, Some(&apply.operation_id))
            .await;
        drop(guards);

        ReconcileReport {
            plan,
            apply,
            verify,
        }
    }

    async fn lock(&self, id: &TargetId) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// One remediation; the candidate is re-checked first
    async fn remediate(&self, candidate: &ReconcileCandidate, filter: &ReconcileFilter) -> RemediationOutcome {
        let id = &candidate.target_id;
        let skipped = |reason: String| RemediationOutcome {
            target_id: id.clone(),
            result: RemediationResult::Skipped { reason },
        };

        let target = match self.registry.get(id) {
            Ok(target) => target,
            Err(e) => return skipped(e.to_string()),
        };
        if !target.enabled {
            return skipped("target was disabled".to_string());
        }
        let status = self.registry.status(id, Utc::now());
        if candidate_reasons(&target, &status, filter).is_empty() {
            return skipped("target recovered before remediation".to_string());
        }

        match self.remediator.restart(id).await {
            Ok(()) => {
                tracing::info!(target_id = %id, "Restarted sync loop");
                RemediationOutcome {
                    target_id: id.clone(),
                    result: RemediationResult::Restarted,
                }
            }
            Err(reason) => {
                tracing::warn!(target_id = %id, "Remediation failed: {}", reason);
                skipped(reason)
            }
        }
    }

    fn summarize(
        &self,
        operation_id: OperationId,
        candidates: &[ReconcileCandidate],
        outcomes: Vec<RemediationOutcome>,
    ) -> ApplySummary {
        let restarted = outcomes
            .iter()
            .filter(|o| o.result == RemediationResult::Restarted)
            .count();
        let summary = ApplySummary {
            operation_id,
            attempted: outcomes.len(),
            restarted,
            skipped: outcomes.len() - restarted,
            baseline: candidates.iter().map(|c| c.target_id.clone()).collect(),
            outcomes,
        };
        tracing::info!(
            attempted = summary.attempted,
            restarted = summary.restarted,
            skipped = summary.skipped,
            "Reconciliation applied"
        );
        summary
    }
}
