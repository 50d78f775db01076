//! Per-target sync loops

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use fd_core::config::SyncConfig;
use fd_core::error::RegistryError;
use fd_core::model::FleetEvent;
use fd_core::types::{Severity, TargetId};

use super::probe::TargetProbe;
use crate::events::EventBus;
use crate::registry::TargetRegistry;

struct SyncLoop {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owns one polling task per enabled target
pub struct SyncSupervisor {
    registry: Arc<TargetRegistry>,
    probe: Arc<dyn TargetProbe>,
    events: EventBus,
    config: SyncConfig,
    loops: DashMap<TargetId, SyncLoop>,
}

impl SyncSupervisor {
    pub fn new(
        registry: Arc<TargetRegistry>,
        probe: Arc<dyn TargetProbe>,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            events,
            config,
            loops: DashMap::new(),
        }
    }

    /// Start loops for every enabled target
    pub fn start_all(&self) {
        for target in self.registry.list() {
            if target.enabled {
                self.start(&target.id);
            }
        }
        tracing::info!("Started {} sync loops", self.loops.len());
    }

    /// Start the loop for one target if it is not already polling
    pub fn start(&self, id: &TargetId) {
        let entry = self.loops.entry(id.clone());
        if let dashmap::mapref::entry::Entry::Vacant(slot) = entry {
            let cancel = CancellationToken::new();
            let task = tokio::spawn(run_loop(
                Arc::clone(&self.registry),
                Arc::clone(&self.probe),
                self.events.clone(),
                self.config.clone(),
                id.clone(),
                cancel.clone(),
            ));
            // Marked here so the status is accurate before the task first runs
            self.registry.set_running(id, true);
            slot.insert(SyncLoop { cancel, task });
            tracing::debug!(target_id = %id, "Sync loop started");
        }
    }

    /// Stop a target's loop and wait for it to exit
    pub async fn stop(&self, id: &TargetId) {
        if let Some((_, sync_loop)) = self.loops.remove(id) {
            sync_loop.cancel.cancel();
            if let Err(e) = sync_loop.task.await {
                tracing::error!(target_id = %id, "Sync loop panicked: {}", e);
            }
            tracing::debug!(target_id = %id, "Sync loop stopped");
        }
        self.registry.set_running(id, false);
    }

    /// Cancel and respawn a target's loop. Returns `false` for disabled
    /// targets, which are left stopped.
    pub async fn restart(&self, id: &TargetId) -> Result<bool, RegistryError> {
        let target = self.registry.get(id)?;
        self.stop(id).await;
        if !target.enabled {
            return Ok(false);
        }
        self.start(id);
        tracing::info!(target_id = %id, "Sync loop restarted");
        Ok(true)
    }

    /// Bring a target's loop in line with its registry entry after an edit
    pub async fn refresh(&self, id: &TargetId) {
        match self.registry.get(id) {
            Ok(target) if target.enabled => {
                self.stop(id).await;
                self.start(id);
            }
            _ => self.stop(id).await,
        }
    }

    pub fn is_polling(&self, id: &TargetId) -> bool {
        self.loops.contains_key(id)
    }

    pub fn loop_count(&self) -> usize {
        self.loops.len()
    }

    /// Stop every loop
    pub async fn shutdown(&self) {
        let ids: Vec<TargetId> = self.loops.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.stop(&id).await;
        }
    }
}

async fn run_loop(
    registry: Arc<TargetRegistry>,
    probe: Arc<dyn TargetProbe>,
    events: EventBus,
    config: SyncConfig,
    id: TargetId,
    cancel: CancellationToken,
) {
    let interval = match registry.get(&id) {
        Ok(target) => target.poll_interval,
        Err(_) => return,
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Ok(target) = registry.get(&id) else {
            break;
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = tokio::time::timeout(config.probe_timeout, probe.probe(&target)) => r,
        };
        let now = Utc::now();

        match result {
            Ok(Ok(())) => {
                let previous = registry.status(&id, now).consecutive_failure_count;
                registry.record_sync_success(&id, now);
                if previous >= config.unavailable_alert_threshold {
                    tracing::info!(target_id = %id, "Target recovered after {} failures", previous);
                }
            }
            Ok(Err(reason)) => record_failure(&registry, &events, &config, &target.label, &id, reason),
            Err(_) => record_failure(
                &registry,
                &events,
                &config,
                &target.label,
                &id,
                format!("probe timed out after {}s", config.probe_timeout.as_secs()),
            ),
        }
    }
}

fn record_failure(
    registry: &TargetRegistry,
    events: &EventBus,
    config: &SyncConfig,
    label: &str,
    id: &TargetId,
    reason: String,
) {
    let count = registry.record_sync_failure(id, Utc::now(), reason.clone());
    tracing::debug!(target_id = %id, failures = count, "Sync failed: {}", reason);

    // The counter survives restarts, so crossing the threshold happens once per outage
    if count == config.unavailable_alert_threshold {
        tracing::warn!(target_id = %id, failures = count, "Target unavailable");
        events.publish(FleetEvent::new(
            Severity::Critical,
            "target.unavailable",
            id.as_str(),
            Some(id.clone()),
            format!("Target {} unavailable", label),
            format!("{} consecutive sync failures; last error: {}", count, reason),
        ));
    }
}
