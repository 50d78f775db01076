//! Target listing and health

use anyhow::Result;
use chrono::Utc;

use fd_core::types::{CheckStatus, TargetId};

use crate::ipc::ControlClient;
use crate::output::{format_checks, format_targets};

pub async fn targets_command(client: &mut ControlClient) -> Result<()> {
    let targets = client.list_targets().await?;
    println!("{}", format_targets(&targets, Utc::now()));
    Ok(())
}

/// Print a target's named checks; fails when any check is in error
pub async fn health_command(client: &mut ControlClient, target_id: &str) -> Result<()> {
    let checks = client.target_health(&TargetId::new(target_id)).await?;
    println!("{}", format_checks(&checks));

    let errors = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Error)
        .count();
    if errors > 0 {
        anyhow::bail!("{} of {} checks failing", errors, checks.len());
    }
    Ok(())
}
