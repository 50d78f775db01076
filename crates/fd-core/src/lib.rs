//! fd-core: Core types and configuration for Fleetdeck
//!
//! This crate provides the shared domain model, error taxonomy,
//! configuration structures and IPC protocol used by the control-plane
//! daemon and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod model;
pub mod types;

pub use error::{ErrorCode, FdError};
pub use types::{BridgeId, OperationId, Severity, TargetId};
