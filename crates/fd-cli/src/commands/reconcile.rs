//! Reconciliation commands

use anyhow::Result;
use clap::Args;

use fd_core::model::ReconcileFilter;
use fd_core::types::{OperationId, TargetId};

use crate::ipc::ControlClient;
use crate::output::{format_apply, format_candidates, format_verify, print_info, print_warning};

/// Which unhealthy targets to consider
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Failure count at or above which a target is a candidate (0 disables)
    #[arg(long)]
    pub min_failures: Option<u32>,

    /// Ignore stale targets
    #[arg(long)]
    pub no_stale: bool,

    /// Ignore unavailable targets
    #[arg(long)]
    pub no_unavailable: bool,
}

impl FilterArgs {
    pub fn to_filter(&self) -> ReconcileFilter {
        let defaults = ReconcileFilter::default();
        ReconcileFilter {
            min_consecutive_failures: self
                .min_failures
                .unwrap_or(defaults.min_consecutive_failures),
            include_stale: !self.no_stale,
            include_unavailable: !self.no_unavailable,
        }
    }
}

pub async fn plan_command(client: &mut ControlClient, filter: &FilterArgs) -> Result<()> {
    let candidates = client.plan(filter.to_filter()).await?;
    println!("{}", format_candidates(&candidates));
    Ok(())
}

pub async fn apply_command(client: &mut ControlClient, filter: &FilterArgs) -> Result<()> {
    let summary = client.apply(filter.to_filter()).await?;
    print!("{}", format_apply(&summary));

    if !summary.baseline.is_empty() {
        let baseline: Vec<&str> = summary.baseline.iter().map(|id| id.as_str()).collect();
        print_info(&format!(
            "Check convergence with: fleetdeck reconcile verify --apply-op {} {}",
            summary.operation_id,
            baseline.join(" ")
        ));
    }
    Ok(())
}

pub async fn verify_command(
    client: &mut ControlClient,
    baseline: &[String],
    apply_op: Option<&str>,
    filter: &FilterArgs,
) -> Result<()> {
    let baseline = baseline.iter().map(TargetId::new).collect();
    let summary = client
        .verify(baseline, filter.to_filter(), apply_op.map(OperationId::new))
        .await?;
    print!("{}", format_verify(&summary));
    Ok(())
}

/// Plan, apply and verify in one round trip
pub async fn run_command(client: &mut ControlClient, filter: &FilterArgs) -> Result<()> {
    let report = client.run_reconciliation(filter.to_filter()).await?;
    println!("{}", format_candidates(&report.plan));
    if report.plan.is_empty() {
        return Ok(());
    }
    print!("{}", format_apply(&report.apply));
    print!("{}", format_verify(&report.verify));
    if report.verify.remaining > 0 {
        print_warning(&format!(
            "{} targets still unhealthy after reconciliation",
            report.verify.remaining
        ));
    }
    Ok(())
}
