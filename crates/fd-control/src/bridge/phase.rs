//! Bridge phase transition rules

use fd_core::error::BridgeError;
use fd_core::types::BridgePhase;

/// Whether `from -> to` is a legal phase change.
///
/// `error` is absorbing except for explicit disconnect, and every live phase
/// may fail into it. Disconnect is legal from anywhere but `disconnected`.
pub fn is_legal_transition(from: BridgePhase, to: BridgePhase) -> bool {
    use BridgePhase::*;

    match (from, to) {
        (Disconnected, Connecting)
        | (Connecting, SshTest)
        | (SshTest, TunnelOpen)
        | (TunnelOpen, Installing)
        | (Installing, NeedsSudoPassword)
        | (NeedsSudoPassword, Installing)
        | (Installing, Running)
        | (Running, TelemetryActive) => true,
        (from, Error) => from.is_live(),
        (from, Disconnected) => from != Disconnected,
        _ => false,
    }
}

/// [`is_legal_transition`] as a result
pub fn check_transition(from: BridgePhase, to: BridgePhase) -> Result<(), BridgeError> {
    if is_legal_transition(from, to) {
        Ok(())
    } else {
        Err(BridgeError::IllegalTransition { from, to })
    }
}
