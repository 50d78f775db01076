//! Alert destination, rule and delivery commands

use anyhow::Result;

use fd_core::model::{DestinationKind, NewDestination, NewRule, TargetScope};
use fd_core::types::{DestinationId, Severity, TargetId};

use crate::ipc::ControlClient;
use crate::output::{format_deliveries, format_destinations, format_rules, print_success};

pub async fn destinations_command(client: &mut ControlClient) -> Result<()> {
    let destinations = client.list_destinations().await?;
    println!("{}", format_destinations(&destinations));
    Ok(())
}

pub async fn add_destination_command(
    client: &mut ControlClient,
    name: &str,
    url: &str,
    minimum_severity: Severity,
) -> Result<()> {
    let destination = client
        .create_destination(NewDestination {
            name: name.to_string(),
            kind: DestinationKind::Webhook,
            url: url.to_string(),
            minimum_severity,
            enabled: true,
        })
        .await?;
    print_success(&format!("Destination {} created ({})", destination.name, destination.id));
    Ok(())
}

pub async fn rules_command(client: &mut ControlClient) -> Result<()> {
    let rules = client.list_rules().await?;
    println!("{}", format_rules(&rules));
    Ok(())
}

/// Create a rule; an empty `targets` list scopes it to the whole fleet
pub async fn add_rule_command(
    client: &mut ControlClient,
    name: &str,
    minimum_severity: Severity,
    destinations: &[String],
    targets: &[String],
) -> Result<()> {
    let target_scope = if targets.is_empty() {
        TargetScope::All
    } else {
        TargetScope::Targets(targets.iter().map(TargetId::new).collect())
    };
    let rule = client
        .create_rule(NewRule {
            name: name.to_string(),
            minimum_severity,
            target_scope,
            destination_ids: destinations.iter().map(DestinationId::new).collect(),
            enabled: true,
        })
        .await?;
    print_success(&format!("Rule {} created ({})", rule.name, rule.id));
    Ok(())
}

pub async fn test_alert_command(client: &mut ControlClient, destination_id: &str) -> Result<()> {
    let status = client
        .send_test_alert(&DestinationId::new(destination_id))
        .await?;
    print_success(&format!("Test alert delivered (HTTP {})", status));
    Ok(())
}

pub async fn deliveries_command(client: &mut ControlClient, limit: usize) -> Result<()> {
    let records = client.deliveries(limit).await?;
    println!("{}", format_deliveries(&records));
    Ok(())
}
