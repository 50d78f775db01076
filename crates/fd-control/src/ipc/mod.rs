//! IPC server for CLI/GUI communication
//!
//! Provides the localhost TCP server that the desktop app and CLI
//! use to drive the running control plane.

mod server;

pub use server::IpcServer;
