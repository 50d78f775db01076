//! Output formatting utilities for the CLI
//!
//! Tables for targets, bridges, reconciliation results, alerts and the
//! operation journal, plus colored status messages.

use chrono::{DateTime, Utc};
use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use fd_core::model::{
    AlertDestination, AlertRoutingRule, ApplySummary, BridgeSnapshot, DeliveryOutcome,
    DeliveryRecord, NamedCheck, OperationJournalEntry, PreflightDiagnosis, QuickFix,
    ReconcileCandidate, RemediationResult, TargetScope, TargetView, VerifySummary,
};

use crate::ipc::ControlStatus;

/// Format control-plane status as a human-readable string
pub fn format_status(status: &ControlStatus) -> String {
    let mut output = String::new();

    output.push_str(&format!(
        "Control Plane: {}\n",
        if status.running { "Running" } else { "Stopped" }
    ));
    output.push_str(&format!("Version: {}\n", status.version));
    output.push_str(&format!("Uptime: {}\n", format_duration(status.uptime_secs)));
    output.push_str(&format!("IPC Address: {}\n", status.ipc_address));
    output.push_str(&format!("Targets: {}\n", status.target_count));
    output.push_str(&format!(
        "Bridges: {} ({} active)\n",
        status.bridge_count, status.active_bridge_count
    ));

    output
}

/// Format targets with their sync status
pub fn format_targets(targets: &[TargetView], now: DateTime<Utc>) -> String {
    if targets.is_empty() {
        return "No targets registered".to_string();
    }

    #[derive(Tabled)]
    struct TargetRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "LABEL")]
        label: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
        #[tabled(rename = "HEALTH")]
        health: String,
        #[tabled(rename = "FAILURES")]
        failures: u32,
        #[tabled(rename = "LAST SYNC")]
        last_sync: String,
    }

    let rows: Vec<TargetRow> = targets
        .iter()
        .map(|view| TargetRow {
            id: truncate(view.target.id.as_str(), 12),
            label: view.target.label.clone(),
            enabled: yes_no(view.target.enabled),
            health: target_health(view),
            failures: view.status.consecutive_failure_count,
            last_sync: format_age(view.status.last_successful_sync_at, now),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

fn target_health(view: &TargetView) -> String {
    let status = &view.status;
    if !view.target.enabled {
        "disabled"
    } else if status.is_healthy() {
        "healthy"
    } else if !status.running {
        "stopped"
    } else if !status.available {
        "unavailable"
    } else {
        "stale"
    }
    .to_string()
}

/// Format named checks
pub fn format_checks(checks: &[NamedCheck]) -> String {
    #[derive(Tabled)]
    struct CheckRow {
        #[tabled(rename = "CHECK")]
        name: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "DETAIL")]
        detail: String,
    }

    let rows: Vec<CheckRow> = checks
        .iter()
        .map(|c| CheckRow {
            name: c.name.clone(),
            status: c.status.to_string(),
            detail: c.detail.clone(),
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(100))
        .to_string()
}

/// Format a preflight diagnosis: verdict, explanation, checks and hints
pub fn format_diagnosis(diagnosis: &PreflightDiagnosis) -> String {
    let mut output = String::new();
    output.push_str(&format!(
        "{} [{}] {} ({} ms)\n",
        diagnosis.params.display_target(),
        diagnosis.code,
        diagnosis.title,
        diagnosis.duration_ms
    ));
    output.push_str(&format!("{}\n", diagnosis.message));

    if !diagnosis.checks.is_empty() {
        output.push('\n');
        output.push_str(&format_checks(&diagnosis.checks));
        output.push('\n');
    }

    if !diagnosis.hints.is_empty() {
        output.push_str("\nHints:\n");
        for hint in &diagnosis.hints {
            output.push_str(&format!("  - {}\n", hint));
        }
    }

    match &diagnosis.quick_fix {
        Some(QuickFix::TryKeyPath { path }) => {
            output.push_str(&format!("\nQuick fix: retry with --key {}\n", path));
        }
        Some(QuickFix::RevertUserAndPort { user, port }) => {
            output.push_str(&format!(
                "\nQuick fix: retry with --user {} --port {}\n",
                user, port
            ));
        }
        None => {}
    }

    output
}

/// Format bridges as a table
pub fn format_bridges(bridges: &[BridgeSnapshot]) -> String {
    if bridges.is_empty() {
        return "No bridges".to_string();
    }

    #[derive(Tabled)]
    struct BridgeRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "LABEL")]
        label: String,
        #[tabled(rename = "SSH")]
        ssh: String,
        #[tabled(rename = "PHASE")]
        phase: String,
        #[tabled(rename = "REMOTE PORT")]
        remote_port: u16,
        #[tabled(rename = "MACHINE")]
        machine: String,
    }

    let rows: Vec<BridgeRow> = bridges
        .iter()
        .map(|b| BridgeRow {
            id: truncate(b.id.as_str(), 12),
            label: b.label.clone(),
            ssh: b.ssh.display_target(),
            phase: format_phase(b),
            remote_port: b.remote_port,
            machine: b
                .reported_machine_id
                .clone()
                .unwrap_or_else(|| "-".to_string()),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Phase with its progress slot, e.g. `installing (4/6)`
pub fn format_phase(bridge: &BridgeSnapshot) -> String {
    match &bridge.error {
        Some(failure) => format!("error at {}", failure.phase),
        None if bridge.phase.index() == 0 => bridge.phase.to_string(),
        None => format!("{} ({}/6)", bridge.phase, bridge.phase.index()),
    }
}

/// One bridge with its failure and recent log lines
pub fn format_bridge(bridge: &BridgeSnapshot, log_lines: usize) -> String {
    let mut output = String::new();
    output.push_str(&format!("Bridge {}\n", bridge.id));
    output.push_str(&format!("Label: {}\n", bridge.label));
    output.push_str(&format!("SSH: {}\n", bridge.ssh.display_target()));
    output.push_str(&format!("Phase: {}\n", format_phase(bridge)));
    output.push_str(&format!("Remote Port: {}\n", bridge.remote_port));
    if let Some(machine) = &bridge.reported_machine_id {
        output.push_str(&format!("Machine: {}\n", machine));
    }
    if let Some(failure) = &bridge.error {
        output.push_str(&format!("Error: {}\n", failure.message));
        if let Some(code) = &failure.code {
            output.push_str(&format!("Diagnosis: {}\n", code));
        }
    }

    let skip = bridge.log.len().saturating_sub(log_lines);
    if skip < bridge.log.len() {
        output.push_str("\nLog:\n");
        for line in &bridge.log[skip..] {
            output.push_str(&format!("  {}\n", line));
        }
    }
    output
}

/// Format a reconciliation plan
pub fn format_candidates(candidates: &[ReconcileCandidate]) -> String {
    if candidates.is_empty() {
        return "No targets need reconciliation".to_string();
    }

    #[derive(Tabled)]
    struct CandidateRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "LABEL")]
        label: String,
        #[tabled(rename = "REASONS")]
        reasons: String,
    }

    let rows: Vec<CandidateRow> = candidates
        .iter()
        .map(|c| CandidateRow {
            id: truncate(c.target_id.as_str(), 12),
            label: c.label.clone(),
            reasons: c.reasons.join(", "),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_apply(summary: &ApplySummary) -> String {
    let mut output = format!(
        "Apply {}: {} attempted, {} restarted, {} skipped\n",
        summary.operation_id, summary.attempted, summary.restarted, summary.skipped
    );
    for outcome in &summary.outcomes {
        let line = match &outcome.result {
            RemediationResult::Restarted => format!("  {} restarted\n", outcome.target_id),
            RemediationResult::Skipped { reason } => {
                format!("  {} skipped: {}\n", outcome.target_id, reason)
            }
        };
        output.push_str(&line);
    }
    output
}

pub fn format_verify(summary: &VerifySummary) -> String {
    let mut output = format!(
        "Verify: {} resolved, {} remaining\n",
        summary.resolved, summary.remaining
    );
    for id in &summary.remaining_ids {
        output.push_str(&format!("  still unhealthy: {}\n", id));
    }
    output
}

/// Format journal entries
pub fn format_operations(operations: &[OperationJournalEntry]) -> String {
    if operations.is_empty() {
        return "No operations recorded".to_string();
    }

    #[derive(Tabled)]
    struct OperationRow {
        #[tabled(rename = "STARTED")]
        started: String,
        #[tabled(rename = "TYPE")]
        kind: String,
        #[tabled(rename = "TARGET")]
        target: String,
        #[tabled(rename = "STATUS")]
        status: String,
        #[tabled(rename = "MESSAGE")]
        message: String,
    }

    let rows: Vec<OperationRow> = operations
        .iter()
        .map(|op| OperationRow {
            started: op.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            kind: op.kind.clone(),
            target: op
                .target_id
                .as_ref()
                .map(|id| truncate(id.as_str(), 12))
                .unwrap_or_else(|| "-".to_string()),
            status: op.status.to_string(),
            message: match &op.error {
                Some(error) => format!("{} ({})", op.message, error),
                None => op.message.clone(),
            },
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(120))
        .to_string()
}

pub fn format_destinations(destinations: &[AlertDestination]) -> String {
    if destinations.is_empty() {
        return "No alert destinations".to_string();
    }

    #[derive(Tabled)]
    struct DestinationRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "URL")]
        url: String,
        #[tabled(rename = "MIN SEVERITY")]
        minimum: String,
        #[tabled(rename = "ENABLED")]
        enabled: String,
    }

    let rows: Vec<DestinationRow> = destinations
        .iter()
        .map(|d| DestinationRow {
            id: d.id.to_string(),
            name: d.name.clone(),
            url: truncate(&d.url, 48),
            minimum: d.minimum_severity.to_string(),
            enabled: yes_no(d.enabled),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_rules(rules: &[AlertRoutingRule]) -> String {
    if rules.is_empty() {
        return "No routing rules".to_string();
    }

    #[derive(Tabled)]
    struct RuleRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "MIN SEVERITY")]
        minimum: String,
        #[tabled(rename = "SCOPE")]
        scope: String,
        #[tabled(rename = "DESTINATIONS")]
        destinations: usize,
        #[tabled(rename = "ENABLED")]
        enabled: String,
    }

    let rows: Vec<RuleRow> = rules
        .iter()
        .map(|r| RuleRow {
            id: r.id.to_string(),
            name: r.name.clone(),
            minimum: r.minimum_severity.to_string(),
            scope: match &r.target_scope {
                TargetScope::All => "all".to_string(),
                TargetScope::Targets(ids) => format!("{} targets", ids.len()),
            },
            destinations: r.destination_ids.len(),
            enabled: yes_no(r.enabled),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

pub fn format_deliveries(records: &[DeliveryRecord]) -> String {
    if records.is_empty() {
        return "No deliveries recorded".to_string();
    }

    #[derive(Tabled)]
    struct DeliveryRow {
        #[tabled(rename = "AT")]
        at: String,
        #[tabled(rename = "DESTINATION")]
        destination: String,
        #[tabled(rename = "SIGNATURE")]
        signature: String,
        #[tabled(rename = "OUTCOME")]
        outcome: String,
    }

    let rows: Vec<DeliveryRow> = records
        .iter()
        .map(|r| DeliveryRow {
            at: r.at.format("%Y-%m-%d %H:%M:%S").to_string(),
            destination: truncate(r.destination_id.as_str(), 12),
            signature: if r.test {
                format!("{} (test)", r.signature)
            } else {
                r.signature.clone()
            },
            outcome: match &r.outcome {
                DeliveryOutcome::Delivered { status } => format!("delivered ({})", status),
                DeliveryOutcome::Failed { code, .. } => format!("failed ({})", code),
                DeliveryOutcome::Suppressed => "suppressed".to_string(),
            },
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Format duration in human-readable form
pub fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// `5m ago`, or `never`
pub fn format_age(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    match at {
        Some(at) => {
            let secs = (now - at).num_seconds().max(0) as u64;
            format!("{} ago", format_duration(secs))
        }
        None => "never".to_string(),
    }
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_core::model::{BridgeFailure, SshParams};
    use fd_core::types::{BridgeId, BridgePhase, DiagnosisCode};

    fn bridge(phase: BridgePhase) -> BridgeSnapshot {
        let now = Utc::now();
        BridgeSnapshot {
            id: BridgeId::new("b1"),
            label: "lab".to_string(),
            ssh: SshParams::explicit("lab.lan", "root", "~/.ssh/id_ed25519"),
            remote_port: 19700,
            auth_token: "secret".to_string(),
            phase,
            reported_machine_id: None,
            error: None,
            log: (0..5).map(|i| format!("line {}", i)).collect(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(61), "1m 1s");
        assert_eq!(format_duration(3661), "1h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 12), "short");
        assert_eq!(truncate("abcdefghijklmnop", 8), "abcde...");
        assert_eq!(truncate("ééééééééé", 5), "éé...");
    }

    #[test]
    fn test_format_phase() {
        assert_eq!(format_phase(&bridge(BridgePhase::Installing)), "installing (4/6)");
        assert_eq!(format_phase(&bridge(BridgePhase::Disconnected)), "disconnected");

        let mut failed = bridge(BridgePhase::Error);
        failed.error = Some(BridgeFailure {
            message: "tunnel exited".to_string(),
            phase: BridgePhase::TunnelOpen,
            phase_index: 3,
            code: None,
        });
        assert_eq!(format_phase(&failed), "error at tunnel_open");
    }

    #[test]
    fn test_bridge_detail_tails_log_and_hides_token() {
        let out = format_bridge(&bridge(BridgePhase::Running), 2);
        assert!(out.contains("line 3"));
        assert!(out.contains("line 4"));
        assert!(!out.contains("line 2"));
        assert!(!out.contains("secret"));
    }

    #[test]
    fn test_format_diagnosis_suggests_quick_fix() {
        let params = SshParams::explicit("lab.lan", "deploy", "~/.ssh/id_rsa");
        let diagnosis = PreflightDiagnosis {
            code: DiagnosisCode::SshAuthFailed,
            title: "Authentication failed".to_string(),
            message: "The server rejected the key".to_string(),
            hints: vec!["Check authorized_keys".to_string()],
            checks: vec![],
            params,
            checked_at: Utc::now(),
            duration_ms: 120,
            quick_fix: Some(QuickFix::RevertUserAndPort {
                user: "root".to_string(),
                port: 22,
            }),
        };
        let out = format_diagnosis(&diagnosis);
        assert!(out.contains("deploy@lab.lan:22"));
        assert!(out.contains("Check authorized_keys"));
        assert!(out.contains("--user root --port 22"));
    }

    #[test]
    fn test_empty_tables() {
        assert_eq!(format_targets(&[], Utc::now()), "No targets registered");
        assert_eq!(format_bridges(&[]), "No bridges");
        assert_eq!(format_candidates(&[]), "No targets need reconciliation");
        assert_eq!(format_operations(&[]), "No operations recorded");
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(None, now), "never");
        assert_eq!(
            format_age(Some(now - chrono::Duration::seconds(90)), now),
            "1m 30s ago"
        );
    }
}
