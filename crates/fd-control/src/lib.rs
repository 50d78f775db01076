//! fd-control: Fleetdeck control-plane daemon
//!
//! The control plane runs on the operator's machine. It proves SSH
//! reachability with preflight probes, drives reverse-tunnel bridges
//! through their lifecycle, polls managed targets, reconciles unhealthy
//! ones and routes alerts to webhooks. The CLI and desktop app talk to
//! it over the localhost IPC interface.

pub mod alerts;
pub mod bridge;
pub mod events;
pub mod ipc;
pub mod journal;
pub mod preflight;
pub mod reconcile;
pub mod registry;
pub mod ssh;
pub mod state;
pub mod store;
pub mod sync;

pub use state::{Backends, ControlState};
