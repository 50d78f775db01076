//! Bridge lifecycle
//!
//! A bridge connects this control plane to a remote machine over SSH: it
//! verifies the handshake, opens a reverse tunnel for telemetry, installs the
//! remote agent and waits for its first telemetry frame.

mod install;
mod lifecycle;
mod manager;
mod phase;

pub use install::{parse_marker, remote_command, InstallMarker, InstallMode, InstallOutcome};
pub use manager::BridgeManager;
pub use phase::{check_transition, is_legal_transition};
