//! Preflight and bridge commands

use std::io::BufRead;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;

use fd_core::model::{AuthMaterial, BridgeRequest, BridgeSnapshot, SshParams};
use fd_core::types::{BridgeId, BridgePhase, ConnectionMode};

use crate::ipc::ControlClient;
use crate::output::{
    format_bridge, format_bridges, format_diagnosis, format_phase, print_error, print_info,
    print_success, print_warning,
};

/// Key tried when neither `--key` nor `--agent` is given
const DEFAULT_KEY: &str = "~/.ssh/id_ed25519";

/// How to reach a host over SSH
#[derive(Args, Debug, Clone)]
pub struct SshArgs {
    /// Host name, address, or `~/.ssh/config` alias with --alias
    pub host: String,

    /// Login user
    #[arg(short, long, default_value = "root")]
    pub user: String,

    /// SSH port
    #[arg(short, long, default_value_t = 22)]
    pub port: u16,

    /// Private key path
    #[arg(short, long, conflicts_with = "agent")]
    pub key: Option<String>,

    /// Authenticate with identities from the running ssh-agent
    #[arg(long)]
    pub agent: bool,

    /// Treat the host as an ssh config alias; the config supplies the rest
    #[arg(long)]
    pub alias: bool,
}

impl SshArgs {
    pub fn to_params(&self) -> SshParams {
        let auth = if self.agent {
            AuthMaterial::SshAgent
        } else {
            AuthMaterial::KeyPath(self.key.clone().unwrap_or_else(|| DEFAULT_KEY.to_string()))
        };
        SshParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            auth,
            mode: if self.alias {
                ConnectionMode::Alias
            } else {
                ConnectionMode::Explicit
            },
        }
    }
}

/// Connect flags beyond the SSH parameters
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub label: Option<String>,
    pub remote_port: Option<u16>,
    /// Connect without a passing preflight
    pub bypass: bool,
    /// Poll until the bridge settles, up to this long
    pub wait: Option<Duration>,
}

/// Run a preflight probe and print the diagnosis. Fails when the probe does.
pub async fn preflight_command(client: &mut ControlClient, ssh: &SshArgs) -> Result<()> {
    let session = new_session_id();
    let diagnosis = client.preflight(&session, ssh.to_params()).await?;
    print!("{}", format_diagnosis(&diagnosis));

    if !diagnosis.passed() {
        anyhow::bail!("preflight failed: {}", diagnosis.code);
    }
    Ok(())
}

/// Preflight then connect in one client session
pub async fn connect_command(
    client: &mut ControlClient,
    ssh: &SshArgs,
    options: &ConnectOptions,
) -> Result<()> {
    let session = new_session_id();
    let params = ssh.to_params();

    if options.bypass {
        print_warning("Connecting without a passing preflight (--bypass)");
    } else {
        let diagnosis = client.preflight(&session, params.clone()).await?;
        if !diagnosis.passed() {
            print!("{}", format_diagnosis(&diagnosis));
            print_error("Preflight failed; fix the issue above or pass --bypass to connect anyway");
            anyhow::bail!("preflight failed: {}", diagnosis.code);
        }
        print_success(&format!("Preflight passed: {}", diagnosis.title));
    }

    let request = BridgeRequest {
        label: options.label.clone(),
        ssh: params,
        remote_port: options.remote_port,
    };
    let bridge_id = client
        .connect_bridge(&session, request, options.bypass)
        .await?;
    print_success(&format!("Bridge {} connecting", bridge_id));

    let Some(wait) = options.wait else {
        print_info(&format!("Follow progress with: fleetdeck bridge {}", bridge_id));
        return Ok(());
    };

    let bridge = wait_for_settle(client, &bridge_id, wait).await?;
    print!("{}", format_bridge(&bridge, 10));
    match bridge.phase {
        BridgePhase::Error => anyhow::bail!("bridge failed"),
        BridgePhase::NeedsSudoPassword => {
            print_warning(&format!(
                "Install needs elevated privileges. Run: fleetdeck sudo {} (password on stdin) or --skip",
                bridge_id
            ));
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Poll until the bridge leaves its in-progress phases or `wait` elapses
async fn wait_for_settle(
    client: &mut ControlClient,
    bridge_id: &BridgeId,
    wait: Duration,
) -> Result<BridgeSnapshot> {
    let deadline = tokio::time::Instant::now() + wait;
    let mut last_phase = None;
    loop {
        let bridge = client.get_bridge(bridge_id).await?;
        if last_phase != Some(bridge.phase) {
            tracing::info!("{}", format_phase(&bridge));
            last_phase = Some(bridge.phase);
        }
        let settled = matches!(
            bridge.phase,
            BridgePhase::Running
                | BridgePhase::TelemetryActive
                | BridgePhase::NeedsSudoPassword
                | BridgePhase::Error
                | BridgePhase::Disconnected
        );
        if settled || tokio::time::Instant::now() >= deadline {
            return Ok(bridge);
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}

pub async fn bridges_command(client: &mut ControlClient) -> Result<()> {
    let bridges = client.list_bridges().await?;
    println!("{}", format_bridges(&bridges));
    Ok(())
}

/// Details and log tail of one bridge
pub async fn bridge_command(client: &mut ControlClient, bridge_id: &str, log_lines: usize) -> Result<()> {
    let bridge = client.get_bridge(&BridgeId::new(bridge_id)).await?;
    print!("{}", format_bridge(&bridge, log_lines));
    Ok(())
}

pub async fn disconnect_command(client: &mut ControlClient, bridge_id: &str, remove: bool) -> Result<()> {
    let id = BridgeId::new(bridge_id);
    if remove {
        client.remove_bridge(&id).await?;
        print_success(&format!("Bridge {} removed", id));
    } else {
        let bridge = client.disconnect_bridge(&id).await?;
        print_success(&format!("Bridge {} {}", id, bridge.phase));
    }
    Ok(())
}

/// Resume a paused install, reading the password from stdin unless skipping
pub async fn sudo_command(client: &mut ControlClient, bridge_id: &str, skip: bool) -> Result<()> {
    let id = BridgeId::new(bridge_id);
    if skip {
        client.skip_sudo(&id).await?;
        print_success("Continuing install in user mode");
        return Ok(());
    }

    let mut password = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut password)
        .context("Failed to read password from stdin")?;
    let password = password.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        anyhow::bail!("empty password; pass --skip to continue without sudo");
    }

    client.submit_sudo_password(&id, password).await?;
    print_success("Password submitted; install resumed");
    Ok(())
}

fn new_session_id() -> String {
    format!("cli-{}", uuid::Uuid::new_v4())
}
