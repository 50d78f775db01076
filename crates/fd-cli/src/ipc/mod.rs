//! IPC client for communicating with the control plane
//!
//! Uses TCP on localhost, one JSON line per request and response.

mod client;

pub use client::{ControlClient, ControlError};

pub use fd_core::ipc::{default_ipc_address, ControlStatus};
