//! Event routing with per-destination cooldown

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use fd_core::config::AlertConfig;
use fd_core::error::{AlertError, ErrorCode};
use fd_core::model::{
    AlertDestination, DeliveryOutcome, DeliveryRecord, DispatchReport, FleetEvent,
};
use fd_core::types::{DestinationId, OperationStatus};

use super::catalog::AlertCatalog;
use super::webhook::{payload, WebhookSender};
use crate::journal::OperationJournal;

/// Routes fleet events to destinations.
///
/// A (destination, signature) pair is reserved when an attempt starts, so
/// concurrent duplicates inside the cooldown are suppressed rather than sent
/// twice. Failed attempts keep their reservation; nothing is retried.
pub struct AlertRouter {
    catalog: Arc<AlertCatalog>,
    sender: Arc<dyn WebhookSender>,
    journal: Arc<OperationJournal>,
    cooldown: Duration,
    last_attempt: Mutex<HashMap<(DestinationId, String), DateTime<Utc>>>,
    history: Mutex<VecDeque<DeliveryRecord>>,
    history_capacity: usize,
}

impl AlertRouter {
    pub fn new(
        catalog: Arc<AlertCatalog>,
        sender: Arc<dyn WebhookSender>,
        journal: Arc<OperationJournal>,
        config: &AlertConfig,
    ) -> Self {
        Self {
            catalog,
            sender,
            journal,
            cooldown: config.cooldown,
            last_attempt: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            history_capacity: config.delivery_history.max(1),
        }
    }

    pub fn catalog(&self) -> &AlertCatalog {
        &self.catalog
    }

    pub async fn dispatch(&self, event: &FleetEvent) -> DispatchReport {
        self.dispatch_at(event, Utc::now()).await
    }

    /// Route and deliver an event as of `now`
    pub async fn dispatch_at(&self, event: &FleetEvent, now: DateTime<Utc>) -> DispatchReport {
        let destinations = self.catalog.route(event);
        if destinations.is_empty() {
            tracing::debug!(kind = %event.kind, "No destination routed");
            return DispatchReport::default();
        }

        let body = payload(event, false);
        let records = join_all(destinations.iter().map(|destination| {
            let body = &body;
            async move {
                let outcome = if self.reserve(&destination.id, &event.signature, now) {
                    self.deliver(destination, &event.kind, body).await
                } else {
                    DeliveryOutcome::Suppressed
                };
                DeliveryRecord {
                    destination_id: destination.id.clone(),
                    signature: event.signature.clone(),
                    severity: event.severity,
                    outcome,
                    at: now,
                    test: false,
                }
            }
        }))
        .await;

        let mut report = DispatchReport::default();
        for record in &records {
            match record.outcome {
                DeliveryOutcome::Delivered { .. } => report.delivered += 1,
                DeliveryOutcome::Failed { .. } => report.failed += 1,
                DeliveryOutcome::Suppressed => report.suppressed += 1,
            }
        }
        if report.delivered + report.failed > 0 {
            let status = if report.failed == 0 {
                OperationStatus::Succeeded
            } else {
                OperationStatus::Failed
            };
            self.journal.record(
                "alert.dispatch",
                event.target_id.clone(),
                status,
                format!(
                    "{}: {} delivered, {} failed, {} suppressed",
                    event.kind, report.delivered, report.failed, report.suppressed
                ),
                None,
            );
        }

        self.remember(&records);
        report.records = records;
        report
    }

    /// Send a test alert to one destination, ignoring rules, minimum
    /// severity and cooldown. Non-2xx answers are returned as errors.
    pub async fn send_test(&self, id: &DestinationId) -> Result<u16, AlertError> {
        let destination = self.catalog.get_destination(id)?;
        let event = FleetEvent::new(
            destination.minimum_severity,
            "alert.test",
            id.as_str(),
            None,
            "Fleetdeck test alert",
            format!("Test delivery to {}", destination.name),
        );

        let result = self
            .sender
            .send(&destination.url, &event.kind, &payload(&event, true))
            .await;
        let outcome = match &result {
            Ok(status) => DeliveryOutcome::Delivered { status: *status },
            Err(e) => DeliveryOutcome::Failed {
                code: e.code().to_string(),
                error: e.to_string(),
            },
        };
        self.remember(&[DeliveryRecord {
            destination_id: id.clone(),
            signature: event.signature.clone(),
            severity: event.severity,
            outcome,
            at: Utc::now(),
            test: true,
        }]);

        let (status, error) = match &result {
            Ok(_) => (OperationStatus::Succeeded, None),
            Err(e) => (OperationStatus::Failed, Some(e.to_string())),
        };
        self.journal.record(
            "alert.test",
            None,
            status,
            format!("test alert to {}", destination.name),
            error,
        );
        result
    }

    /// Most recent deliveries first
    pub fn recent_deliveries(&self, limit: usize) -> Vec<DeliveryRecord> {
        self.history.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Dispatch events from the bus until cancelled
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<FleetEvent>, cancel: CancellationToken) {
        tracing::info!("Alert router started");
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                received = events.recv() => match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("Alert router lagged; {} events dropped", skipped);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            };
            let report = self.dispatch(&event).await;
            if report.failed > 0 {
                tracing::warn!(kind = %event.kind, failed = report.failed, "Alert delivery failed");
            }
        }
        tracing::info!("Alert router stopped");
    }

    /// Claim the cooldown slot; `false` when an attempt is still cooling down
    fn reserve(&self, destination: &DestinationId, signature: &str, now: DateTime<Utc>) -> bool {
        let cooldown = chrono::Duration::from_std(self.cooldown).unwrap_or(chrono::Duration::MAX);
        let mut last = self.last_attempt.lock();
        // Expired pairs can no longer suppress anything
        last.retain(|_, at| now.signed_duration_since(*at) < cooldown);
        let key = (destination.clone(), signature.to_string());
        if last.contains_key(&key) {
            return false;
        }
        last.insert(key, now);
        true
    }

    async fn deliver(
        &self,
        destination: &AlertDestination,
        kind: &str,
        body: &serde_json::Value,
    ) -> DeliveryOutcome {
        match self.sender.send(&destination.url, kind, body).await {
            Ok(status) => {
                tracing::info!(destination_id = %destination.id, status, "Alert delivered");
                DeliveryOutcome::Delivered { status }
            }
            Err(e) => {
                tracing::warn!(destination_id = %destination.id, "Alert delivery failed: {}", e);
                DeliveryOutcome::Failed {
                    code: e.code().to_string(),
                    error: e.to_string(),
                }
            }
        }
    }

    fn remember(&self, records: &[DeliveryRecord]) {
        let mut history = self.history.lock();
        for record in records {
            history.push_back(record.clone());
        }
        while history.len() > self.history_capacity {
            history.pop_front();
        }
    }
}
