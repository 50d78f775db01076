//! Mapping ssh client output onto diagnosis codes

use fd_core::config::PreflightConfig;
use fd_core::model::{AuthMaterial, QuickFix, SshParams};
use fd_core::types::{ConnectionMode, DiagnosisCode};

/// Marker the probe echoes back from the remote shell
pub const PROBE_MARKER: &str = "fleetdeck-preflight-ok";

/// Classify a failed ssh run from its stderr.
///
/// Patterns are checked most specific first; unrecognised failures are
/// reported as unreachable since ssh exits 255 for connection-level errors.
pub fn classify_stderr(stderr: &str) -> DiagnosisCode {
    let text = stderr.to_ascii_lowercase();
    let has = |needle: &str| text.contains(needle);

    if has("load key") || has("unprotected private key file") || has("bad permissions")
        || has("invalid format") || has("incorrect passphrase") || has("no such identity")
    {
        return DiagnosisCode::SshKeyUnreadable;
    }
    if has("could not open a connection to your authentication agent")
        || has("agent refused operation")
        || has("error connecting to agent")
    {
        return DiagnosisCode::SshAuthMissing;
    }
    if has("permission denied") || has("too many authentication failures")
        || has("no supported authentication methods") || has("host key verification failed")
    {
        return DiagnosisCode::SshAuthFailed;
    }
    if has("timed out") || has("timeout") {
        return DiagnosisCode::SshTimeout;
    }
    DiagnosisCode::SshNetworkUnreachable
}

/// Whether the probe trusted a new host key on first use
pub fn added_host_key(stderr: &str) -> bool {
    stderr.contains("Permanently added")
}

/// Fixed title, message and hints per outcome
pub fn describe(code: DiagnosisCode, params: &SshParams) -> (String, String, Vec<String>) {
    let target = params.display_target();
    let (title, message, hints): (&str, String, &[&str]) = match code {
        DiagnosisCode::Ok => (
            "SSH reachable",
            format!("Authenticated to {} and ran a remote command", target),
            &[],
        ),
        DiagnosisCode::OkWithTofu => (
            "SSH reachable (new host key trusted)",
            format!(
                "Authenticated to {}; its host key was not known and has been added to known_hosts",
                target
            ),
            &["Verify the host key fingerprint out of band if this host is new to you"],
        ),
        DiagnosisCode::SshAuthMissing => (
            "No SSH credentials available",
            "No usable key or ssh-agent identity was offered".to_string(),
            &[
                "Start ssh-agent and add a key with ssh-add",
                "Or choose a private key file instead of the agent",
            ],
        ),
        DiagnosisCode::SshKeyUnreadable => (
            "SSH key unusable",
            "The private key could not be read or parsed".to_string(),
            &[
                "Check that the key file exists and is a private key, not a .pub file",
                "Restrict permissions with chmod 600",
                "Passphrase-protected keys must be loaded into ssh-agent",
            ],
        ),
        DiagnosisCode::SshAuthFailed => (
            "SSH authentication failed",
            format!("{} rejected the offered credentials", target),
            &[
                "Confirm the public key is in the remote user's authorized_keys",
                "Check that the user name is correct",
            ],
        ),
        DiagnosisCode::SshNetworkUnreachable => (
            "Host unreachable",
            format!("Could not open a connection to {}", target),
            &[
                "Check the host name and port",
                "Confirm the host is up and sshd is listening",
                "Check VPN or firewall rules between here and the host",
            ],
        ),
        DiagnosisCode::SshTimeout => (
            "SSH timed out",
            format!("No answer from {} within the probe timeout", target),
            &[
                "The host may be down or the port filtered",
                "Check the port; sshd usually listens on 22",
            ],
        ),
    };
    (
        title.to_string(),
        message,
        hints.iter().map(|h| h.to_string()).collect(),
    )
}

/// Deterministic parameter edit for a failed probe, if one applies
pub fn quick_fix(
    code: DiagnosisCode,
    params: &SshParams,
    config: &PreflightConfig,
) -> Option<QuickFix> {
    match code {
        DiagnosisCode::SshKeyUnreadable | DiagnosisCode::SshAuthMissing => {
            alternate_key(params, &config.alternate_key_paths)
                .map(|path| QuickFix::TryKeyPath { path })
        }
        DiagnosisCode::SshAuthFailed
        | DiagnosisCode::SshNetworkUnreachable
        | DiagnosisCode::SshTimeout => {
            if params.mode == ConnectionMode::Alias {
                return None;
            }
            let user = config.default_user().to_string();
            if params.user == user && params.port == 22 {
                return None;
            }
            Some(QuickFix::RevertUserAndPort { user, port: 22 })
        }
        DiagnosisCode::Ok | DiagnosisCode::OkWithTofu => None,
    }
}

/// First candidate that differs from the current key, preferring keys that exist
fn alternate_key(params: &SshParams, candidates: &[String]) -> Option<String> {
    let current = params.auth.resolved_key_path();
    let differs = |candidate: &&String| {
        let expanded = fd_core::model::expand_tilde(candidate);
        match (&params.auth, &current) {
            (AuthMaterial::KeyPath(raw), Some(path)) => raw != *candidate && *path != expanded,
            _ => true,
        }
    };

    candidates
        .iter()
        .filter(differs)
        .find(|c| fd_core::model::expand_tilde(c).is_file())
        .or_else(|| candidates.iter().find(differs))
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_common_failures() {
        assert_eq!(
            classify_stderr("root@10.0.0.5: Permission denied (publickey,password)."),
            DiagnosisCode::SshAuthFailed
        );
        assert_eq!(
            classify_stderr("Load key \"/home/me/.ssh/id_rsa\": invalid format"),
            DiagnosisCode::SshKeyUnreadable
        );
        assert_eq!(
            classify_stderr("ssh: connect to host 10.0.0.5 port 22: Connection refused"),
            DiagnosisCode::SshNetworkUnreachable
        );
        assert_eq!(
            classify_stderr("ssh: Could not resolve hostname nope: Name or service not known"),
            DiagnosisCode::SshNetworkUnreachable
        );
        assert_eq!(
            classify_stderr("ssh: connect to host 10.0.0.5 port 22: Connection timed out"),
            DiagnosisCode::SshTimeout
        );
        assert_eq!(
            classify_stderr("Could not open a connection to your authentication agent."),
            DiagnosisCode::SshAuthMissing
        );
    }

    #[test]
    fn test_tofu_detection() {
        assert!(added_host_key(
            "Warning: Permanently added '10.0.0.5' (ED25519) to the list of known hosts."
        ));
        assert!(!added_host_key(""));
    }

    #[test]
    fn test_every_failure_has_hints() {
        let params = SshParams::explicit("h", "root", "~/.ssh/id_rsa");
        for code in [
            DiagnosisCode::SshAuthMissing,
            DiagnosisCode::SshKeyUnreadable,
            DiagnosisCode::SshAuthFailed,
            DiagnosisCode::SshNetworkUnreachable,
            DiagnosisCode::SshTimeout,
        ] {
            let (title, _, hints) = describe(code, &params);
            assert!(!title.is_empty());
            assert!(!hints.is_empty(), "{} has no hints", code);
        }
    }

    #[test]
    fn test_key_fix_picks_a_different_key() {
        let config = PreflightConfig::default();
        let params = SshParams::explicit("h", "root", "~/.ssh/id_ed25519");
        match quick_fix(DiagnosisCode::SshKeyUnreadable, &params, &config) {
            Some(QuickFix::TryKeyPath { path }) => assert_ne!(path, "~/.ssh/id_ed25519"),
            other => panic!("unexpected fix: {:?}", other),
        }
    }

    #[test]
    fn test_revert_fix_for_connectivity_failures() {
        let config = PreflightConfig {
            default_user: Some("ops".to_string()),
            ..Default::default()
        };
        let mut params = SshParams::explicit("h", "deploy", "~/.ssh/id_rsa");
        params.port = 2222;

        for code in [
            DiagnosisCode::SshAuthFailed,
            DiagnosisCode::SshNetworkUnreachable,
            DiagnosisCode::SshTimeout,
        ] {
            assert_eq!(
                quick_fix(code, &params, &config),
                Some(QuickFix::RevertUserAndPort {
                    user: "ops".to_string(),
                    port: 22
                })
            );
        }

        params.user = "ops".to_string();
        params.port = 22;
        assert_eq!(quick_fix(DiagnosisCode::SshTimeout, &params, &config), None);
        assert_eq!(quick_fix(DiagnosisCode::Ok, &params, &config), None);
    }
}
