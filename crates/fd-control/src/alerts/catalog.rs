//! Alert destinations and routing rules

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;

use fd_core::error::AlertError;
use fd_core::model::{
    AlertDestination, AlertRoutingRule, DestinationPatch, FleetEvent, NewDestination, NewRule,
    RulePatch,
};
use fd_core::types::{DestinationId, RuleId};

use crate::store::{self, KvStore};

/// Persistent set of destinations and rules
pub struct AlertCatalog {
    destinations: DashMap<DestinationId, AlertDestination>,
    rules: DashMap<RuleId, AlertRoutingRule>,
    store: Arc<dyn KvStore>,
}

impl AlertCatalog {
    pub fn open(store: Arc<dyn KvStore>) -> Result<Self, AlertError> {
        let destinations = DashMap::new();
        for d in store::load_all::<AlertDestination>(store.as_ref(), store::ALERT_DESTINATIONS)? {
            destinations.insert(d.id.clone(), d);
        }
        let rules = DashMap::new();
        for r in store::load_all::<AlertRoutingRule>(store.as_ref(), store::ALERT_RULES)? {
            rules.insert(r.id.clone(), r);
        }
        tracing::info!(
            "Loaded {} alert destinations and {} routing rules",
            destinations.len(),
            rules.len()
        );

        Ok(Self {
            destinations,
            rules,
            store,
        })
    }

    pub fn create_destination(&self, new: NewDestination) -> Result<AlertDestination, AlertError> {
        new.validate()?;
        let now = Utc::now();
        let destination = AlertDestination {
            id: DestinationId::generate(),
            name: new.name.trim().to_string(),
            kind: new.kind,
            url: new.url,
            minimum_severity: new.minimum_severity,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        };
        store::save(
            self.store.as_ref(),
            store::ALERT_DESTINATIONS,
            destination.id.as_str(),
            &destination,
        )?;
        self.destinations
            .insert(destination.id.clone(), destination.clone());

        tracing::info!(destination_id = %destination.id, name = %destination.name, "Alert destination created");
        Ok(destination)
    }

    pub fn patch_destination(
        &self,
        id: &DestinationId,
        patch: &DestinationPatch,
    ) -> Result<AlertDestination, AlertError> {
        patch.validate()?;
        let mut entry = self
            .destinations
            .get_mut(id)
            .ok_or_else(|| AlertError::DestinationNotFound(id.clone()))?;
        let mut updated = entry.clone();
        patch.apply_to(&mut updated, Utc::now());
        store::save(self.store.as_ref(), store::ALERT_DESTINATIONS, id.as_str(), &updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    pub fn get_destination(&self, id: &DestinationId) -> Result<AlertDestination, AlertError> {
        self.destinations
            .get(id)
            .map(|d| d.value().clone())
            .ok_or_else(|| AlertError::DestinationNotFound(id.clone()))
    }

    pub fn list_destinations(&self) -> Vec<AlertDestination> {
        let mut all: Vec<AlertDestination> =
            self.destinations.iter().map(|d| d.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    pub fn create_rule(&self, new: NewRule) -> Result<AlertRoutingRule, AlertError> {
        new.validate()?;
        self.check_destinations(&new.destination_ids)?;
        let now = Utc::now();
        let rule = AlertRoutingRule {
            id: RuleId::generate(),
            name: new.name.trim().to_string(),
            minimum_severity: new.minimum_severity,
            target_scope: new.target_scope,
            destination_ids: new.destination_ids,
            enabled: new.enabled,
            created_at: now,
            updated_at: now,
        };
        store::save(self.store.as_ref(), store::ALERT_RULES, rule.id.as_str(), &rule)?;
        self.rules.insert(rule.id.clone(), rule.clone());

        tracing::info!(rule_id = %rule.id, name = %rule.name, "Alert routing rule created");
        Ok(rule)
    }

    pub fn patch_rule(&self, id: &RuleId, patch: &RulePatch) -> Result<AlertRoutingRule, AlertError> {
        patch.validate()?;
        if let Some(ids) = &patch.destination_ids {
            self.check_destinations(ids)?;
        }
        let mut entry = self
            .rules
            .get_mut(id)
            .ok_or_else(|| AlertError::RuleNotFound(id.clone()))?;
        let mut updated = entry.clone();
        patch.apply_to(&mut updated, Utc::now());
        store::save(self.store.as_ref(), store::ALERT_RULES, id.as_str(), &updated)?;
        *entry = updated.clone();
        Ok(updated)
    }

    pub fn list_rules(&self) -> Vec<AlertRoutingRule> {
        let mut all: Vec<AlertRoutingRule> = self.rules.iter().map(|r| r.value().clone()).collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Destinations an event fans out to, each at most once
    pub fn route(&self, event: &FleetEvent) -> Vec<AlertDestination> {
        let mut seen = HashSet::new();
        let mut routed = Vec::new();
        for rule in self.list_rules() {
            if !rule.matches(event) {
                continue;
            }
            for id in &rule.destination_ids {
                if !seen.insert(id.clone()) {
                    continue;
                }
                match self.destinations.get(id) {
                    Some(d) if d.accepts(event.severity) => routed.push(d.value().clone()),
                    Some(_) => {}
                    None => tracing::warn!(rule_id = %rule.id, destination_id = %id, "Rule references a missing destination"),
                }
            }
        }
        routed
    }

    fn check_destinations(&self, ids: &[DestinationId]) -> Result<(), AlertError> {
        match ids.iter().find(|id| !self.destinations.contains_key(*id)) {
            Some(missing) => Err(AlertError::DestinationNotFound(missing.clone())),
            None => Ok(()),
        }
    }
}
