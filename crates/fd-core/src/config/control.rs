//! Control-plane configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Default port for the localhost IPC server
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Configuration for the control-plane daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// IPC port for CLI/desktop communication (localhost only)
    pub ipc_port: u16,

    /// Directory holding persisted targets, alert settings and the journal
    pub data_dir: PathBuf,

    /// SSH client binary
    pub ssh_binary: String,

    /// Preflight probe settings
    pub preflight: PreflightConfig,

    /// Bridge lifecycle settings
    pub bridge: BridgeConfig,

    /// Target sync polling settings
    pub sync: SyncConfig,

    /// Reconciliation settings
    pub reconcile: ReconcileConfig,

    /// Alert dispatch settings
    pub alerts: AlertConfig,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            ipc_port: DEFAULT_IPC_PORT,
            data_dir: super::default_data_dir(),
            ssh_binary: "ssh".to_string(),
            preflight: PreflightConfig::default(),
            bridge: BridgeConfig::default(),
            sync: SyncConfig::default(),
            reconcile: ReconcileConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl ControlConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Path of the append-only operation journal
    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("journal.jsonl")
    }
}

/// Preflight probe configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Hard bound on the network round trip
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Bound on local `ssh -G` alias resolution
    #[serde(with = "duration_secs")]
    pub config_lookup_timeout: Duration,

    /// How long a passing diagnosis clears a connect
    #[serde(with = "duration_secs")]
    pub ttl: Duration,

    /// Diagnoses kept per session
    pub history_capacity: usize,

    /// User suggested when a quick fix reverts the user; falls back to `root`
    pub default_user: Option<String>,

    /// Key paths suggested when the configured key is unusable
    pub alternate_key_paths: Vec<String>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_secs(35),
            config_lookup_timeout: Duration::from_secs(5),
            ttl: Duration::from_secs(120),
            history_capacity: 10,
            default_user: None,
            alternate_key_paths: vec![
                "~/.ssh/id_ed25519".to_string(),
                "~/.ssh/id_rsa".to_string(),
                "~/.ssh/id_ecdsa".to_string(),
            ],
        }
    }
}

impl PreflightConfig {
    /// User a quick fix should revert to
    pub fn default_user(&self) -> &str {
        self.default_user.as_deref().unwrap_or("root")
    }
}

/// Bridge lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Bound on the SSH handshake test
    #[serde(with = "duration_secs")]
    pub ssh_test_timeout: Duration,

    /// How long the tunnel process must stay up before the forward counts as listening
    #[serde(with = "duration_millis")]
    pub tunnel_confirm_window: Duration,

    /// Bound on a single run of the remote install command
    #[serde(with = "duration_secs")]
    pub install_timeout: Duration,

    /// Grace period between SIGTERM and SIGKILL when stopping subprocesses
    #[serde(with = "duration_secs")]
    pub terminate_grace: Duration,

    /// Local port the reverse tunnel forwards to
    pub local_port: u16,

    /// Remote port used when a connect request does not pick one
    pub default_remote_port: u16,

    /// Remote command that installs and verifies the agent
    pub install_command: String,

    /// Log lines kept per bridge
    pub max_log_lines: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            ssh_test_timeout: Duration::from_secs(35),
            tunnel_confirm_window: Duration::from_millis(1500),
            install_timeout: Duration::from_secs(600),
            terminate_grace: Duration::from_secs(5),
            local_port: 22241,
            default_remote_port: 19700,
            install_command: "sh -c \"$(curl -fsSL https://get.fleetdeck.dev/agent.sh)\""
                .to_string(),
            max_log_lines: 500,
        }
    }
}

/// Target sync polling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Time since last success after which a target is stale
    #[serde(with = "duration_secs")]
    pub stale_threshold: Duration,

    /// Bound on a single health probe
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Poll interval for targets registered without one
    #[serde(with = "duration_secs")]
    pub default_poll_interval: Duration,

    /// Consecutive failures that raise a `target.unavailable` alert
    pub unavailable_alert_threshold: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            stale_threshold: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            default_poll_interval: Duration::from_secs(30),
            unavailable_alert_threshold: 3,
        }
    }
}

/// Reconciliation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Delay between apply and verify so restarted loops can report
    #[serde(with = "duration_millis")]
    pub settle_delay: Duration,

    /// Default failure threshold for plan filters
    pub min_consecutive_failures: u32,

    /// Default for including stale targets
    pub include_stale: bool,

    /// Default for including unavailable targets
    pub include_unavailable: bool,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(1500),
            min_consecutive_failures: 2,
            include_stale: true,
            include_unavailable: true,
        }
    }
}

/// Alert dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Minimum time between deliveries of the same signature to the same destination
    #[serde(with = "duration_secs")]
    pub cooldown: Duration,

    /// Bound on a single webhook request
    #[serde(with = "duration_secs")]
    pub webhook_timeout: Duration,

    /// Delivery records kept for inspection
    pub delivery_history: usize,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(900),
            webhook_timeout: Duration::from_secs(10),
            delivery_history: 200,
        }
    }
}
