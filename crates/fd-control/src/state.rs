//! Global control-plane state

use std::sync::Arc;

use fd_core::config::ControlConfig;
use fd_core::error::FdError;

use crate::alerts::{AlertCatalog, AlertRouter, HttpWebhookSender, WebhookSender};
use crate::bridge::BridgeManager;
use crate::events::EventBus;
use crate::journal::{OperationJournal, DEFAULT_JOURNAL_CAPACITY};
use crate::preflight::{PreflightService, Prober};
use crate::reconcile::ReconcileEngine;
use crate::registry::TargetRegistry;
use crate::ssh::{ProcessRunner, SshRunner};
use crate::store::{JsonFileStore, KvStore};
use crate::sync::{HttpProbe, SyncSupervisor, TargetProbe};

/// The outside world the services talk to
pub struct Backends {
    pub store: Arc<dyn KvStore>,
    pub journal: Arc<OperationJournal>,
    pub runner: Arc<dyn SshRunner>,
    pub probe: Arc<dyn TargetProbe>,
    pub webhooks: Arc<dyn WebhookSender>,
}

/// Global state for the control-plane daemon
pub struct ControlState {
    /// Configuration
    pub config: ControlConfig,
    /// Append-only operation journal
    pub journal: Arc<OperationJournal>,
    /// Fleet event fan-out
    pub events: EventBus,
    /// Managed targets and their sync records
    pub registry: Arc<TargetRegistry>,
    /// Per-target polling loops
    pub sync: Arc<SyncSupervisor>,
    /// Plan/apply/verify
    pub reconcile: Arc<ReconcileEngine>,
    /// Alert catalog and dispatch
    pub alerts: Arc<AlertRouter>,
    /// Preflight sessions
    pub preflight: Arc<PreflightService>,
    /// Bridges and their lifecycle tasks
    pub bridges: Arc<BridgeManager>,
}

impl ControlState {
    /// Open persisted state under `config.data_dir` and wire up real backends
    pub fn open(config: ControlConfig) -> Result<Self, FdError> {
        let store = JsonFileStore::open(&config.data_dir)?;
        let journal = OperationJournal::open(&config.journal_path(), DEFAULT_JOURNAL_CAPACITY)?;
        let backends = Backends {
            store: Arc::new(store),
            journal: Arc::new(journal),
            runner: Arc::new(ProcessRunner),
            probe: Arc::new(HttpProbe::new(config.sync.probe_timeout)),
            webhooks: Arc::new(HttpWebhookSender::new(config.alerts.webhook_timeout)),
        };
        Self::with_backends(config, backends)
    }

    pub fn with_backends(config: ControlConfig, backends: Backends) -> Result<Self, FdError> {
        let Backends {
            store,
            journal,
            runner,
            probe,
            webhooks,
        } = backends;
        let events = EventBus::default();

        let registry = Arc::new(TargetRegistry::open(
            Arc::clone(&store),
            config.sync.stale_threshold,
            config.sync.default_poll_interval,
        )?);
        let sync = Arc::new(SyncSupervisor::new(
            Arc::clone(&registry),
            probe,
            events.clone(),
            config.sync.clone(),
        ));
        let reconcile = Arc::new(ReconcileEngine::new(
            Arc::clone(&registry),
            Arc::clone(&sync) as _,
            Arc::clone(&journal),
            events.clone(),
            config.reconcile.settle_delay,
        ));

        let catalog = Arc::new(AlertCatalog::open(store)?);
        let alerts = Arc::new(AlertRouter::new(
            catalog,
            webhooks,
            Arc::clone(&journal),
            &config.alerts,
        ));

        let prober = Prober::new(
            Arc::clone(&runner),
            config.ssh_binary.clone(),
            config.preflight.clone(),
        );
        let preflight = Arc::new(PreflightService::new(prober));
        let bridges = Arc::new(BridgeManager::new(
            runner,
            config.ssh_binary.clone(),
            config.bridge.clone(),
            Arc::clone(&journal),
            events.clone(),
        ));

        Ok(Self {
            config,
            journal,
            events,
            registry,
            sync,
            reconcile,
            alerts,
            preflight,
            bridges,
        })
    }

    /// Stop every bridge and sync loop
    pub async fn shutdown(&self) {
        self.bridges.shutdown().await;
        self.sync.shutdown().await;
    }
}
