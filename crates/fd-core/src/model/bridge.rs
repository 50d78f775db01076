//! SSH parameters and bridge connection records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::types::{BridgeId, BridgePhase, ConnectionMode};

/// Credential offered to the SSH server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "path", rename_all = "snake_case")]
pub enum AuthMaterial {
    /// Private key file; `~/` is expanded against the home directory
    KeyPath(String),
    /// Whatever identities the running ssh-agent offers
    SshAgent,
}

impl AuthMaterial {
    /// Key path with `~/` expanded, if this is key-based auth
    pub fn resolved_key_path(&self) -> Option<PathBuf> {
        match self {
            AuthMaterial::KeyPath(path) => Some(expand_tilde(path)),
            AuthMaterial::SshAgent => None,
        }
    }
}

impl std::fmt::Display for AuthMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMaterial::KeyPath(path) => write!(f, "{}", path),
            AuthMaterial::SshAgent => write!(f, "ssh-agent"),
        }
    }
}

/// Expand a leading `~/` to the current user's home directory
pub fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

/// The exact parameter tuple a probe or connection runs against
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    /// Login user; may be empty in alias mode where the ssh config supplies it
    pub user: String,
    pub auth: AuthMaterial,
    #[serde(default)]
    pub mode: ConnectionMode,
}

impl SshParams {
    /// Explicit-mode parameters with key auth
    pub fn explicit(host: impl Into<String>, user: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            auth: AuthMaterial::KeyPath(key.into()),
            mode: ConnectionMode::Explicit,
        }
    }

    /// `user@host:port` as shown to users
    pub fn display_target(&self) -> String {
        match (self.mode, self.user.is_empty()) {
            (ConnectionMode::Alias, _) => self.host.clone(),
            (ConnectionMode::Explicit, true) => format!("{}:{}", self.host, self.port),
            (ConnectionMode::Explicit, false) => {
                format!("{}@{}:{}", self.user, self.host, self.port)
            }
        }
    }

    /// Reject malformed parameters before anything is spawned
    pub fn validate(&self) -> Result<(), ValidationError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ValidationError::EmptyHost);
        }
        let host_ok = !host.starts_with('-')
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '[' | ']'));
        if !host_ok || host != self.host {
            return Err(ValidationError::InvalidHost(self.host.clone()));
        }

        if self.port == 0 {
            return Err(ValidationError::InvalidPort(0));
        }

        if self.mode == ConnectionMode::Explicit && self.user.is_empty() {
            return Err(ValidationError::InvalidUser(String::new()));
        }
        let user_ok = !self.user.starts_with('-')
            && self
                .user
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !user_ok {
            return Err(ValidationError::InvalidUser(self.user.clone()));
        }

        if let AuthMaterial::KeyPath(path) = &self.auth {
            if path.trim().is_empty() || path.ends_with('/') || path.contains('\0') {
                return Err(ValidationError::InvalidKeyPath(path.clone()));
            }
        }

        Ok(())
    }
}

/// User request to stand up a bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    /// Display label; defaults to the SSH target
    #[serde(default)]
    pub label: Option<String>,
    pub ssh: SshParams,
    /// Port opened on the remote side of the reverse tunnel
    #[serde(default)]
    pub remote_port: Option<u16>,
}

/// Failure recorded when a bridge enters `error`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeFailure {
    pub message: String,
    /// Phase that was interrupted
    pub phase: BridgePhase,
    /// Progress index of that phase
    pub phase_index: u8,
    /// Diagnosis code when the failure was classified as a connectivity error
    #[serde(default)]
    pub code: Option<String>,
}

/// Point-in-time view of a bridge connection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeSnapshot {
    pub id: BridgeId,
    pub label: String,
    pub ssh: SshParams,
    pub remote_port: u16,
    pub auth_token: String,
    pub phase: BridgePhase,
    pub reported_machine_id: Option<String>,
    pub error: Option<BridgeFailure>,
    pub log: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_explicit_params() {
        let params = SshParams::explicit("build-01.lan", "root", "~/.ssh/id_ed25519");
        assert!(params.validate().is_ok());
        assert_eq!(params.display_target(), "root@build-01.lan:22");
    }

    #[test]
    fn test_rejects_malformed_host() {
        let mut params = SshParams::explicit("", "root", "~/.ssh/id_rsa");
        assert_eq!(params.validate(), Err(ValidationError::EmptyHost));

        params.host = "-oProxyCommand=evil".to_string();
        assert!(matches!(params.validate(), Err(ValidationError::InvalidHost(_))));

        params.host = "host name".to_string();
        assert!(matches!(params.validate(), Err(ValidationError::InvalidHost(_))));

        params.host = " padded".to_string();
        assert!(matches!(params.validate(), Err(ValidationError::InvalidHost(_))));
    }

    #[test]
    fn test_rejects_port_zero_and_bad_key() {
        let mut params = SshParams::explicit("h", "root", "~/.ssh/id_rsa");
        params.port = 0;
        assert_eq!(params.validate(), Err(ValidationError::InvalidPort(0)));

        let params = SshParams::explicit("h", "root", "  ");
        assert!(matches!(params.validate(), Err(ValidationError::InvalidKeyPath(_))));

        let params = SshParams::explicit("h", "root", "/home/me/.ssh/");
        assert!(matches!(params.validate(), Err(ValidationError::InvalidKeyPath(_))));
    }

    #[test]
    fn test_alias_mode_allows_empty_user() {
        let params = SshParams {
            host: "lab".to_string(),
            port: 22,
            user: String::new(),
            auth: AuthMaterial::SshAgent,
            mode: ConnectionMode::Alias,
        };
        assert!(params.validate().is_ok());
        assert_eq!(params.display_target(), "lab");

        let explicit = SshParams {
            mode: ConnectionMode::Explicit,
            ..params
        };
        assert!(matches!(explicit.validate(), Err(ValidationError::InvalidUser(_))));
    }

    #[test]
    fn test_tuple_equality_tracks_every_field() {
        let a = SshParams::explicit("h", "root", "~/.ssh/id_rsa");
        let mut b = a.clone();
        assert_eq!(a, b);
        b.auth = AuthMaterial::KeyPath("~/.ssh/id_ed25519".to_string());
        assert_ne!(a, b);
        let mut c = a.clone();
        c.mode = ConnectionMode::Alias;
        assert_ne!(a, c);
    }

    #[test]
    fn test_expand_tilde() {
        assert_eq!(expand_tilde("/etc/key"), PathBuf::from("/etc/key"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde("~/.ssh/id_rsa"), home.join(".ssh/id_rsa"));
        }
    }
}
