//! Candidate selection

use fd_core::model::{ManagedTarget, ReconcileCandidate, ReconcileFilter, SyncStatus};

/// Why `target` needs remediation under `filter`; empty when it does not.
/// Disabled targets never qualify.
pub fn candidate_reasons(
    target: &ManagedTarget,
    status: &SyncStatus,
    filter: &ReconcileFilter,
) -> Vec<String> {
    let mut reasons = Vec::new();
    if !target.enabled {
        return reasons;
    }
    if filter.include_stale && status.stale {
        reasons.push("stale".to_string());
    }
    if filter.include_unavailable && !status.available {
        reasons.push("unavailable".to_string());
    }
    if filter.min_consecutive_failures > 0
        && status.consecutive_failure_count >= filter.min_consecutive_failures
    {
        reasons.push(format!(
            "{} consecutive failures",
            status.consecutive_failure_count
        ));
    }
    reasons
}

/// Candidates among `targets`, ordered by label then id
pub fn select_candidates(
    targets: impl IntoIterator<Item = (ManagedTarget, SyncStatus)>,
    filter: &ReconcileFilter,
) -> Vec<ReconcileCandidate> {
    let mut candidates: Vec<ReconcileCandidate> = targets
        .into_iter()
        .filter_map(|(target, status)| {
            let reasons = candidate_reasons(&target, &status, filter);
            (!reasons.is_empty()).then(|| ReconcileCandidate {
                target_id: target.id,
                label: target.label,
                reasons,
                status,
            })
        })
        .collect();
    candidates.sort_by(|a, b| {
        a.label
            .cmp(&b.label)
            .then_with(|| a.target_id.cmp(&b.target_id))
    });
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use fd_core::types::{TargetId, TargetKind, TargetOrigin, TargetPurpose};
    use std::path::PathBuf;
    use std::time::Duration;

    fn target(id: &str, enabled: bool) -> ManagedTarget {
        let now = Utc::now();
        ManagedTarget {
            id: TargetId::new(id),
            label: id.to_string(),
            kind: TargetKind::Local,
            root_dir: PathBuf::from("/srv/agent"),
            poll_interval: Duration::from_secs(30),
            enabled,
            origin: TargetOrigin::User,
            purpose: TargetPurpose::Production,
            endpoint: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn status(available: bool, stale: bool, failures: u32) -> SyncStatus {
        SyncStatus {
            running: true,
            available,
            consecutive_failure_count: failures,
            stale,
            last_successful_sync_at: None,
            last_checked_at: None,
            last_error: None,
        }
    }

    #[test]
    fn test_reasons_follow_filter() {
        let t = target("t1", true);
        let s = status(false, true, 3);

        let all = ReconcileFilter::default();
        assert_eq!(
            candidate_reasons(&t, &s, &all),
            vec!["stale", "unavailable", "3 consecutive failures"]
        );

        let failures_only = ReconcileFilter {
            min_consecutive_failures: 2,
            include_stale: false,
            include_unavailable: false,
        };
        assert_eq!(
            candidate_reasons(&t, &s, &failures_only),
            vec!["3 consecutive failures"]
        );

        let strict = ReconcileFilter {
            min_consecutive_failures: 4,
            ..failures_only
        };
        assert!(candidate_reasons(&t, &s, &strict).is_empty());

        let zero = ReconcileFilter {
            min_consecutive_failures: 0,
            ..failures_only
        };
        assert!(candidate_reasons(&t, &status(false, false, 0), &zero).is_empty());
    }

    #[test]
    fn test_disabled_targets_never_qualify() {
        let reasons = candidate_reasons(
            &target("t1", false),
            &status(false, true, 9),
            &ReconcileFilter::default(),
        );
        assert!(reasons.is_empty());
    }

    #[test]
    fn test_selection_is_ordered_and_idempotent() {
        let input = vec![
            (target("b", true), status(false, false, 0)),
            (target("a", true), status(false, false, 0)),
            (target("c", true), status(true, false, 0)),
        ];
        let filter = ReconcileFilter::default();
        let first = select_candidates(input.clone(), &filter);
        let second = select_candidates(input, &filter);

        let ids: Vec<&str> = first.iter().map(|c| c.target_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(first, second);
    }
}
