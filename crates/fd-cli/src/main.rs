//! Fleetdeck CLI
//!
//! Management commands for a running `fd-control` daemon:
//! - Preflight probes and bridge connections
//! - Target health and reconciliation
//! - Alert destinations, routing rules and test deliveries

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fd_core::types::Severity;
use fleetdeck::commands::{self, ConnectOptions, FilterArgs, SshArgs};
use fleetdeck::ipc::ControlClient;
use fleetdeck::output::print_error;

#[derive(Parser)]
#[command(name = "fleetdeck")]
#[command(author, version, about = "Fleet bridge and health control")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, env = "FLEETDECK_CONFIG")]
    config: Option<PathBuf>,

    /// Control-plane IPC address (overrides config)
    #[arg(long, global = true, env = "FLEETDECK_ADDRESS")]
    address: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show control-plane status
    Status,

    /// Stop the control plane
    Stop,

    /// List managed targets with their sync status
    Targets,

    /// Show named health checks for a target
    Health {
        /// Target ID
        target: String,
    },

    /// Probe SSH reachability without connecting
    Preflight {
        #[command(flatten)]
        ssh: SshArgs,
    },

    /// List bridges
    Bridges,

    /// Show one bridge with its recent log
    Bridge {
        /// Bridge ID
        bridge: String,
        /// Log lines to show
        #[arg(short = 'n', long, default_value_t = 20)]
        lines: usize,
    },

    /// Preflight a host, then open a bridge to it
    Connect {
        #[command(flatten)]
        ssh: SshArgs,
        /// Display label (defaults to the SSH target)
        #[arg(long)]
        label: Option<String>,
        /// Remote port for the reverse tunnel
        #[arg(long)]
        remote_port: Option<u16>,
        /// Connect even without a passing preflight
        #[arg(long)]
        bypass: bool,
        /// Wait up to this many seconds for the bridge to settle
        #[arg(short, long)]
        wait: Option<u64>,
    },

    /// Disconnect a bridge
    Disconnect {
        /// Bridge ID
        bridge: String,
        /// Forget the bridge after disconnecting
        #[arg(long)]
        remove: bool,
    },

    /// Resume an install waiting for a sudo password (read from stdin)
    Sudo {
        /// Bridge ID
        bridge: String,
        /// Continue the install in user mode instead
        #[arg(long)]
        skip: bool,
    },

    /// Remediate unhealthy targets
    Reconcile {
        #[command(subcommand)]
        action: ReconcileAction,
    },

    /// Show recent operations from the journal
    Ops {
        /// Maximum entries
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },

    /// Manage alerting
    Alerts {
        #[command(subcommand)]
        action: AlertsAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ReconcileAction {
    /// List targets that would be remediated
    Plan {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Restart sync for current candidates
    Apply {
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Compare current health against an apply baseline
    Verify {
        /// Target IDs from the apply baseline
        baseline: Vec<String>,
        /// Apply operation to complete in the journal
        #[arg(long)]
        apply_op: Option<String>,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Plan, apply and verify in one step
    Run {
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(Subcommand)]
enum AlertsAction {
    /// List or add destinations
    Destinations {
        #[command(subcommand)]
        action: Option<DestinationAction>,
    },
    /// List or add routing rules
    Rules {
        #[command(subcommand)]
        action: Option<RuleAction>,
    },
    /// Send a test alert to a destination
    Test {
        /// Destination ID
        destination: String,
    },
    /// Recent delivery attempts
    Deliveries {
        #[arg(short = 'n', long, default_value_t = 50)]
        limit: usize,
    },
}

#[derive(Subcommand)]
enum DestinationAction {
    /// Add a webhook destination
    Add {
        name: String,
        url: String,
        /// Lowest severity delivered (warning, high, critical)
        #[arg(long, default_value = "high")]
        min_severity: Severity,
    },
}

#[derive(Subcommand)]
enum RuleAction {
    /// Add a routing rule
    Add {
        name: String,
        /// Destination IDs
        #[arg(short, long = "destination", required = true)]
        destinations: Vec<String>,
        /// Lowest severity routed (warning, high, critical)
        #[arg(long, default_value = "warning")]
        min_severity: Severity,
        /// Restrict to these target IDs
        #[arg(short, long = "target")]
        targets: Vec<String>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration
    Show,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    if let Err(e) = run(cli).await {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();

    // Config commands work without a running daemon
    let command = match cli.command {
        Commands::Config { action } => {
            return match action {
                ConfigAction::Show => commands::config_show(config_path),
                ConfigAction::Init { force } => commands::config_init(config_path, force),
                ConfigAction::Path => {
                    println!("{}", commands::config_path(config_path).display());
                    Ok(())
                }
            };
        }
        other => other,
    };

    let address = match cli.address {
        Some(address) => address,
        None => commands::load_or_default(config_path)?.ipc_address(),
    };
    let mut client = ControlClient::with_address(address);

    match command {
        Commands::Status => commands::status_command(&mut client).await,
        Commands::Stop => commands::stop_command(&mut client).await,
        Commands::Targets => commands::targets_command(&mut client).await,
        Commands::Health { target } => commands::health_command(&mut client, &target).await,
        Commands::Preflight { ssh } => commands::preflight_command(&mut client, &ssh).await,
        Commands::Bridges => commands::bridges_command(&mut client).await,
        Commands::Bridge { bridge, lines } => {
            commands::bridge_command(&mut client, &bridge, lines).await
        }
        Commands::Connect {
            ssh,
            label,
            remote_port,
            bypass,
            wait,
        } => {
            let options = ConnectOptions {
                label,
                remote_port,
                bypass,
                wait: wait.map(Duration::from_secs),
            };
            commands::connect_command(&mut client, &ssh, &options).await
        }
        Commands::Disconnect { bridge, remove } => {
            commands::disconnect_command(&mut client, &bridge, remove).await
        }
        Commands::Sudo { bridge, skip } => commands::sudo_command(&mut client, &bridge, skip).await,
        Commands::Reconcile { action } => match action {
            ReconcileAction::Plan { filter } => commands::plan_command(&mut client, &filter).await,
            ReconcileAction::Apply { filter } => commands::apply_command(&mut client, &filter).await,
            ReconcileAction::Verify {
                baseline,
                apply_op,
                filter,
            } => commands::verify_command(&mut client, &baseline, apply_op.as_deref(), &filter).await,
            ReconcileAction::Run { filter } => commands::run_command(&mut client, &filter).await,
        },
        Commands::Ops { limit } => commands::ops_command(&mut client, limit).await,
        Commands::Alerts { action } => match action {
            AlertsAction::Destinations { action: None } => {
                commands::destinations_command(&mut client).await
            }
            AlertsAction::Destinations {
                action:
                    Some(DestinationAction::Add {
                        name,
                        url,
                        min_severity,
                    }),
            } => commands::add_destination_command(&mut client, &name, &url, min_severity).await,
            AlertsAction::Rules { action: None } => commands::rules_command(&mut client).await,
            AlertsAction::Rules {
                action:
                    Some(RuleAction::Add {
                        name,
                        destinations,
                        min_severity,
                        targets,
                    }),
            } => {
                commands::add_rule_command(&mut client, &name, min_severity, &destinations, &targets)
                    .await
            }
            AlertsAction::Test { destination } => {
                commands::test_alert_command(&mut client, &destination).await
            }
            AlertsAction::Deliveries { limit } => {
                commands::deliveries_command(&mut client, limit).await
            }
        },
        Commands::Config { .. } => Ok(()),
    }
}
