//! CLI command implementations

mod alerts;
mod bridges;
mod config;
mod ops;
mod reconcile;
mod status;
mod targets;

pub use alerts::{
    add_destination_command, add_rule_command, deliveries_command, destinations_command,
    rules_command, test_alert_command,
};
pub use bridges::{
    bridge_command, bridges_command, connect_command, disconnect_command, preflight_command,
    sudo_command, ConnectOptions, SshArgs,
};
pub use config::{config_init, config_path, config_show, load_or_default};
pub use ops::ops_command;
pub use reconcile::{apply_command, plan_command, run_command, verify_command, FilterArgs};
pub use status::{status_command, stop_command};
pub use targets::{health_command, targets_command};
