//! Target registry
//!
//! Durable store of managed targets plus their in-memory sync records.
//! Writes for one target id are serialized by the map entry; reads never block
//! on other targets.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use fd_core::error::RegistryError;
use fd_core::model::{
    ManagedTarget, NamedCheck, NewTarget, SyncRecord, SyncStatus, TargetPatch, TargetView,
};
use fd_core::types::TargetId;

use crate::store::{self, KvStore};

pub struct TargetRegistry {
    targets: DashMap<TargetId, ManagedTarget>,
    sync: DashMap<TargetId, SyncRecord>,
    store: Arc<dyn KvStore>,
    stale_threshold: Duration,
    default_poll_interval: Duration,
}

impl TargetRegistry {
    /// Load persisted targets
    pub fn open(
        store: Arc<dyn KvStore>,
        stale_threshold: Duration,
        default_poll_interval: Duration,
    ) -> Result<Self, RegistryError> {
        let targets = DashMap::new();
        for target in store::load_all::<ManagedTarget>(store.as_ref(), store::TARGETS)? {
            targets.insert(target.id.clone(), target);
        }
        tracing::info!("Loaded {} targets", targets.len());

        Ok(Self {
            targets,
            sync: DashMap::new(),
            store,
            stale_threshold,
            default_poll_interval,
        })
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Register a new target
    pub fn register(&self, new: NewTarget) -> Result<ManagedTarget, RegistryError> {
        new.validate()?;
        let now = Utc::now();
        let id = new.id.clone().unwrap_or_else(TargetId::generate);
        let target = ManagedTarget {
            id: id.clone(),
            label: new.label.trim().to_string(),
            kind: new.kind,
            root_dir: new.root_dir,
            poll_interval: new
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(self.default_poll_interval),
            enabled: new.enabled,
            origin: new.origin,
            purpose: new.purpose,
            endpoint: new.endpoint,
            created_at: now,
            updated_at: now,
        };

        match self.targets.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(RegistryError::AlreadyExists(id));
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                store::save(self.store.as_ref(), store::TARGETS, id.as_str(), &target)?;
                slot.insert(target.clone());
            }
        }

        tracing::info!(target_id = %id, label = %target.label, "Target registered");
        Ok(target)
    }

    /// Apply an edit
    pub fn update(&self, id: &TargetId, patch: &TargetPatch) -> Result<ManagedTarget, RegistryError> {
        patch.validate()?;
        let mut entry = self
            .targets
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.clone()))?;

        let mut updated = entry.clone();
        patch.apply_to(&mut updated, Utc::now());
        store::save(self.store.as_ref(), store::TARGETS, id.as_str(), &updated)?;
        *entry = updated.clone();
        drop(entry);

        tracing::info!(target_id = %id, "Target updated");
        Ok(updated)
    }

    /// Explicit removal
    pub fn remove(&self, id: &TargetId) -> Result<ManagedTarget, RegistryError> {
        // Holding the entry keeps a concurrent update from re-saving the record
        let entry = match self.targets.entry(id.clone()) {
            Entry::Occupied(entry) => entry,
            Entry::Vacant(_) => return Err(RegistryError::NotFound(id.clone())),
        };
        self.store.delete(store::TARGETS, id.as_str())?;
        let target = entry.remove();
        self.sync.remove(id);

        tracing::info!(target_id = %id, "Target removed");
        Ok(target)
    }

    /// Remove every smoke-origin or test-purpose target
    pub fn cleanup_test_targets(&self) -> Result<Vec<TargetId>, RegistryError> {
        let disposable: Vec<TargetId> = self
            .targets
            .iter()
            .filter(|entry| entry.value().is_disposable())
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = Vec::with_capacity(disposable.len());
        for id in disposable {
            match self.remove(&id) {
                Ok(_) => removed.push(id),
                Err(RegistryError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(removed)
    }

    pub fn get(&self, id: &TargetId) -> Result<ManagedTarget, RegistryError> {
        self.targets
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RegistryError::NotFound(id.clone()))
    }

    /// All targets, oldest first
    pub fn list(&self) -> Vec<ManagedTarget> {
        let mut targets: Vec<ManagedTarget> =
            self.targets.iter().map(|entry| entry.value().clone()).collect();
        targets.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Derived sync status at `now`
    pub fn status(&self, id: &TargetId, now: DateTime<Utc>) -> SyncStatus {
        self.sync
            .get(id)
            .map(|record| record.status(now, self.stale_threshold))
            .unwrap_or_else(|| SyncRecord::default().status(now, self.stale_threshold))
    }

    pub fn view(&self, id: &TargetId, now: DateTime<Utc>) -> Result<TargetView, RegistryError> {
        let target = self.get(id)?;
        Ok(TargetView {
            status: self.status(id, now),
            target,
        })
    }

    /// Every target with its status
    pub fn views(&self, now: DateTime<Utc>) -> Vec<TargetView> {
        self.list()
            .into_iter()
            .map(|target| TargetView {
                status: self.status(&target.id, now),
                target,
            })
            .collect()
    }

    /// Mark the sync loop as started or stopped
    pub fn set_running(&self, id: &TargetId, running: bool) {
        if !self.targets.contains_key(id) {
            return;
        }
        self.sync.entry(id.clone()).or_default().running = running;
    }

    pub fn record_sync_success(&self, id: &TargetId, at: DateTime<Utc>) {
        if !self.targets.contains_key(id) {
            return;
        }
        self.sync.entry(id.clone()).or_default().record_success(at);
    }

    /// Returns the new consecutive failure count
    pub fn record_sync_failure(&self, id: &TargetId, at: DateTime<Utc>, error: impl Into<String>) -> u32 {
        if !self.targets.contains_key(id) {
            return 0;
        }
        let mut record = self.sync.entry(id.clone()).or_default();
        record.record_failure(at, error);
        record.consecutive_failure_count
    }

    /// Named health checks for one target
    pub fn health_checks(&self, id: &TargetId, now: DateTime<Utc>) -> Result<Vec<NamedCheck>, RegistryError> {
        let target = self.get(id)?;
        let status = self.status(id, now);
        Ok(health_checks(&target, &status, self.stale_threshold))
    }
}

fn health_checks(target: &ManagedTarget, status: &SyncStatus, stale_threshold: Duration) -> Vec<NamedCheck> {
    let mut checks = Vec::with_capacity(5);

    checks.push(if target.enabled {
        NamedCheck::ok("enabled", "target is enabled")
    } else {
        NamedCheck::warn("enabled", "target is disabled; it is never reconciled")
    });

    checks.push(if status.running {
        NamedCheck::ok(
            "sync_loop",
            format!("polling every {}", format_secs(target.poll_interval)),
        )
    } else {
        NamedCheck::error("sync_loop", "sync loop is not running")
    });

    checks.push(match (status.available, &status.last_error) {
        (true, _) => NamedCheck::ok("availability", "last poll succeeded"),
        (false, Some(error)) => NamedCheck::error("availability", error.clone()),
        (false, None) => NamedCheck::warn("availability", "no successful poll yet"),
    });

    checks.push(match (status.stale, status.last_successful_sync_at) {
        (false, Some(at)) => NamedCheck::ok("freshness", format!("last sync at {}", at.to_rfc3339())),
        (false, None) => NamedCheck::warn("freshness", "waiting for first sync"),
        (true, Some(at)) => NamedCheck::error(
            "freshness",
            format!(
                "last sync at {} is older than {}",
                at.to_rfc3339(),
                format_secs(stale_threshold)
            ),
        ),
        (true, None) => NamedCheck::error("freshness", "never synced"),
    });

    checks.push(match status.consecutive_failure_count {
        0 => NamedCheck::ok("failures", "no consecutive failures"),
        n => NamedCheck::warn("failures", format!("{} consecutive failures", n)),
    });

    checks
}

fn format_secs(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use fd_core::types::{CheckStatus, TargetOrigin, TargetPurpose};

    fn registry(store: Arc<dyn KvStore>) -> TargetRegistry {
        TargetRegistry::open(store, Duration::from_secs(300), Duration::from_secs(30)).unwrap()
    }

    fn new_target(id: &str) -> NewTarget {
        NewTarget {
            id: Some(TargetId::new(id)),
            ..NewTarget::new(id, "/srv/agent")
        }
    }

    #[test]
    fn test_register_and_reload() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let reg = registry(Arc::clone(&store));
        let target = reg.register(new_target("t1")).unwrap();
        assert_eq!(target.poll_interval, Duration::from_secs(30));
        assert!(matches!(
            reg.register(new_target("t1")),
            Err(RegistryError::AlreadyExists(_))
        ));

        let reloaded = registry(store);
        assert_eq!(reloaded.get(&TargetId::new("t1")).unwrap(), target);
    }

    /// Parks `delete` until released so a racing update can be lined up
    struct GatedStore {
        inner: MemoryStore,
        entered: std::sync::mpsc::SyncSender<()>,
        release: parking_lot::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl KvStore for GatedStore {
        fn get(&self, namespace: &str, key: &str) -> Result<Option<serde_json::Value>, fd_core::error::StoreError> {
            self.inner.get(namespace, key)
        }

        fn put(&self, namespace: &str, key: &str, value: serde_json::Value) -> Result<(), fd_core::error::StoreError> {
            self.inner.put(namespace, key, value)
        }

        fn delete(&self, namespace: &str, key: &str) -> Result<bool, fd_core::error::StoreError> {
            let _ = self.entered.send(());
            let _ = self.release.lock().recv();
            self.inner.delete(namespace, key)
        }

        fn list(&self, namespace: &str) -> Result<Vec<(String, serde_json::Value)>, fd_core::error::StoreError> {
            self.inner.list(namespace)
        }
    }

    #[test]
    fn test_update_racing_remove_does_not_resurrect() {
        let (entered_tx, entered_rx) = std::sync::mpsc::sync_channel(1);
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let store = Arc::new(GatedStore {
            inner: MemoryStore::new(),
            entered: entered_tx,
            release: parking_lot::Mutex::new(release_rx),
        });
        let reg = Arc::new(registry(store.clone()));
        let id = TargetId::new("t1");
        reg.register(new_target("t1")).unwrap();

        let remover = {
            let reg = Arc::clone(&reg);
            let id = id.clone();
            std::thread::spawn(move || reg.remove(&id))
        };
        entered_rx.recv().unwrap();

        let updater = {
            let reg = Arc::clone(&reg);
            let id = id.clone();
            std::thread::spawn(move || {
                let patch = TargetPatch {
                    label: Some("renamed".to_string()),
                    ..Default::default()
                };
                reg.update(&id, &patch)
            })
        };
        std::thread::sleep(std::time::Duration::from_millis(50));
        release_tx.send(()).unwrap();

        assert!(remover.join().unwrap().is_ok());
        assert!(matches!(
            updater.join().unwrap(),
            Err(RegistryError::NotFound(_))
        ));
        assert!(store.inner.get(store::TARGETS, "t1").unwrap().is_none());
        assert!(registry(store).get(&id).is_err());
    }

    #[test]
    fn test_register_rejects_invalid() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let mut bad = new_target("t1");
        bad.label = String::new();
        assert!(matches!(reg.register(bad), Err(RegistryError::Validation(_))));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_update_and_remove() {
        let store: Arc<dyn KvStore> = Arc::new(MemoryStore::new());
        let reg = registry(Arc::clone(&store));
        let id = TargetId::new("t1");
        reg.register(new_target("t1")).unwrap();

        let patch = TargetPatch {
            label: Some("renamed".to_string()),
            ..Default::default()
        };
        assert_eq!(reg.update(&id, &patch).unwrap().label, "renamed");
        assert_eq!(registry(Arc::clone(&store)).get(&id).unwrap().label, "renamed");

        reg.remove(&id).unwrap();
        assert!(matches!(reg.get(&id), Err(RegistryError::NotFound(_))));
        assert!(registry(store).is_empty());
        assert!(matches!(
            reg.update(&id, &patch),
            Err(RegistryError::NotFound(_))
        ));
    }

    #[test]
    fn test_cleanup_only_removes_disposable_targets() {
        let reg = registry(Arc::new(MemoryStore::new()));
        reg.register(new_target("prod")).unwrap();
        reg.register(NewTarget {
            origin: TargetOrigin::Smoke,
            ..new_target("smoke")
        })
        .unwrap();
        reg.register(NewTarget {
            purpose: TargetPurpose::Test,
            ..new_target("test")
        })
        .unwrap();

        let mut removed = reg.cleanup_test_targets().unwrap();
        removed.sort();
        assert_eq!(removed, vec![TargetId::new("smoke"), TargetId::new("test")]);
        assert_eq!(reg.len(), 1);
        assert!(reg.get(&TargetId::new("prod")).is_ok());
    }

    #[test]
    fn test_sync_records_feed_status() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let id = TargetId::new("t1");
        reg.register(new_target("t1")).unwrap();
        let now = Utc::now();

        // Not running and never synced
        assert!(reg.status(&id, now).stale);

        reg.set_running(&id, true);
        assert!(!reg.status(&id, now).stale);
        assert_eq!(reg.record_sync_failure(&id, now, "refused"), 1);
        assert_eq!(reg.record_sync_failure(&id, now, "refused"), 2);
        reg.record_sync_success(&id, now);
        let status = reg.status(&id, now);
        assert!(status.is_healthy());
        assert_eq!(status.consecutive_failure_count, 0);

        // Unknown targets are ignored
        let ghost = TargetId::new("ghost");
        assert_eq!(reg.record_sync_failure(&ghost, now, "x"), 0);
        assert!(reg.status(&ghost, now).stale);
    }

    #[test]
    fn test_health_checks() {
        let reg = registry(Arc::new(MemoryStore::new()));
        let id = TargetId::new("t1");
        reg.register(new_target("t1")).unwrap();
        let now = Utc::now();
        reg.set_running(&id, true);
        reg.record_sync_failure(&id, now, "connection refused");

        let checks = reg.health_checks(&id, now).unwrap();
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["enabled", "sync_loop", "availability", "freshness", "failures"]
        );
        assert_eq!(checks[1].status, CheckStatus::Ok);
        assert_eq!(checks[2].status, CheckStatus::Error);
        assert_eq!(checks[2].detail, "connection refused");
        assert_eq!(checks[4].detail, "1 consecutive failures");
    }
}
