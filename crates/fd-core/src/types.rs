//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            /// Create an ID from any string
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random ID
            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            /// Get the raw ID string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

string_id!(
    /// Unique identifier for a managed target
    TargetId
);
string_id!(
    /// Unique identifier for a bridge connection
    BridgeId
);
string_id!(
    /// Unique identifier for a journaled operation
    OperationId
);
string_id!(
    /// Unique identifier for an alert destination
    DestinationId
);
string_id!(
    /// Unique identifier for an alert routing rule
    RuleId
);

/// Ordered event importance: `Warning < High < Critical`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "warning" => Ok(Severity::Warning),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

/// Phase of a bridge connection's lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgePhase {
    Disconnected,
    Connecting,
    SshTest,
    TunnelOpen,
    Installing,
    NeedsSudoPassword,
    Running,
    TelemetryActive,
    Error,
}

impl BridgePhase {
    /// Position of the phase in the progress sequence shown to users.
    ///
    /// `NeedsSudoPassword` shares the slot of `Installing`; `Error` has no slot
    /// of its own and reports the index of the phase it interrupted.
    pub fn index(&self) -> u8 {
        match self {
            BridgePhase::Disconnected => 0,
            BridgePhase::Connecting => 1,
            BridgePhase::SshTest => 2,
            BridgePhase::TunnelOpen => 3,
            BridgePhase::Installing | BridgePhase::NeedsSudoPassword => 4,
            BridgePhase::Running => 5,
            BridgePhase::TelemetryActive => 6,
            BridgePhase::Error => 0,
        }
    }

    /// Whether a subprocess may be alive in this phase
    pub fn is_live(&self) -> bool {
        !matches!(self, BridgePhase::Disconnected | BridgePhase::Error)
    }
}

impl fmt::Display for BridgePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgePhase::Disconnected => "disconnected",
            BridgePhase::Connecting => "connecting",
            BridgePhase::SshTest => "ssh_test",
            BridgePhase::TunnelOpen => "tunnel_open",
            BridgePhase::Installing => "installing",
            BridgePhase::NeedsSudoPassword => "needs_sudo_password",
            BridgePhase::Running => "running",
            BridgePhase::TelemetryActive => "telemetry_active",
            BridgePhase::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of a preflight reachability probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosisCode {
    Ok,
    OkWithTofu,
    SshAuthMissing,
    SshKeyUnreadable,
    SshAuthFailed,
    SshNetworkUnreachable,
    SshTimeout,
}

impl DiagnosisCode {
    /// Whether this outcome clears a connection attempt
    pub fn is_pass(&self) -> bool {
        matches!(self, DiagnosisCode::Ok | DiagnosisCode::OkWithTofu)
    }

    /// Stable machine-readable code
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosisCode::Ok => "ok",
            DiagnosisCode::OkWithTofu => "ok_with_tofu",
            DiagnosisCode::SshAuthMissing => "ssh_auth_missing",
            DiagnosisCode::SshKeyUnreadable => "ssh_key_unreadable",
            DiagnosisCode::SshAuthFailed => "ssh_auth_failed",
            DiagnosisCode::SshNetworkUnreachable => "ssh_network_unreachable",
            DiagnosisCode::SshTimeout => "ssh_timeout",
        }
    }
}

impl fmt::Display for DiagnosisCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a named sub-check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckStatus::Ok => write!(f, "ok"),
            CheckStatus::Warn => write!(f, "warn"),
            CheckStatus::Error => write!(f, "error"),
        }
    }
}

/// How the SSH destination is addressed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// Host is an `~/.ssh/config` alias; port/user/key come from the config
    Alias,
    /// Host, port, user and key are passed explicitly
    #[default]
    Explicit,
}

/// Local or remote target host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Local,
    Remote,
}

/// How a target came to be registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOrigin {
    #[default]
    User,
    Auto,
    Smoke,
}

/// What a target is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetPurpose {
    #[default]
    Production,
    Test,
}

/// Journal status of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Started,
    Succeeded,
    Failed,
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationStatus::Started => write!(f, "started"),
            OperationStatus::Succeeded => write!(f, "succeeded"),
            OperationStatus::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Warning < Severity::High);
        assert!(Severity::High < Severity::Critical);
        assert_eq!("HIGH".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_phase_serializes_snake_case() {
        let json = serde_json::to_string(&BridgePhase::NeedsSudoPassword).unwrap();
        assert_eq!(json, "\"needs_sudo_password\"");
        assert_eq!(BridgePhase::TelemetryActive.to_string(), "telemetry_active");
    }

    #[test]
    fn test_phase_index_orders_progress() {
        assert!(BridgePhase::SshTest.index() < BridgePhase::Installing.index());
        assert_eq!(
            BridgePhase::NeedsSudoPassword.index(),
            BridgePhase::Installing.index()
        );
        assert!(BridgePhase::Running.index() < BridgePhase::TelemetryActive.index());
    }

    #[test]
    fn test_diagnosis_code_pass() {
        assert!(DiagnosisCode::Ok.is_pass());
        assert!(DiagnosisCode::OkWithTofu.is_pass());
        assert!(!DiagnosisCode::SshTimeout.is_pass());
        assert_eq!(DiagnosisCode::SshKeyUnreadable.as_str(), "ssh_key_unreadable");
    }

    #[test]
    fn test_ids_are_transparent() {
        let id = TargetId::new("t1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"t1\"");
        assert_ne!(BridgeId::generate(), BridgeId::generate());
    }
}
