//! fleetdeck: Command-line interface for Fleetdeck
//!
//! Talks to the `fd-control` daemon over its localhost IPC interface to run
//! preflight probes, manage bridges, inspect targets, reconcile unhealthy
//! ones and configure alerting.

pub mod commands;
pub mod ipc;
pub mod output;
