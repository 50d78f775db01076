//! Single bounded SSH reachability probe

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use fd_core::config::PreflightConfig;
use fd_core::model::{AuthMaterial, NamedCheck, PreflightDiagnosis, SshParams};
use fd_core::types::{ConnectionMode, DiagnosisCode};

use super::classify::{self, PROBE_MARKER};
use crate::ssh::{
    resolve_config_invocation, run_to_completion, RunnerError, SshCommandBuilder, SshRunner,
};

/// Runs preflight probes against SSH parameters
pub struct Prober {
    runner: Arc<dyn SshRunner>,
    ssh_binary: String,
    config: PreflightConfig,
    agent_socket: Option<PathBuf>,
}

impl Prober {
    /// Create a prober; the agent socket is read from `SSH_AUTH_SOCK`
    pub fn new(runner: Arc<dyn SshRunner>, ssh_binary: String, config: PreflightConfig) -> Self {
        let agent_socket = std::env::var_os("SSH_AUTH_SOCK").map(PathBuf::from);
        Self {
            runner,
            ssh_binary,
            config,
            agent_socket,
        }
    }

    /// Override the ssh-agent socket location
    pub fn with_agent_socket(mut self, socket: Option<PathBuf>) -> Self {
        self.agent_socket = socket;
        self
    }

    pub fn config(&self) -> &PreflightConfig {
        &self.config
    }

    /// Probe `params`. Never fails: every outcome is a diagnosis.
    ///
    /// Callers validate `params` first.
    pub async fn probe(&self, params: &SshParams) -> PreflightDiagnosis {
        let started = Instant::now();
        let mut checks = Vec::new();

        if params.mode == ConnectionMode::Alias {
            self.resolve_alias(&params.host, &mut checks).await;
        } else {
            checks.push(NamedCheck::ok("host", params.host.clone()));
            checks.push(NamedCheck::ok("port", params.port.to_string()));
            checks.push(NamedCheck::ok("user", params.user.clone()));
        }

        let local_failure = match &params.auth {
            AuthMaterial::KeyPath(raw) => {
                let path = fd_core::model::expand_tilde(raw);
                match check_key_file(&path) {
                    Ok(detail) => {
                        checks.push(NamedCheck::ok("key", detail));
                        None
                    }
                    Err(detail) => {
                        checks.push(NamedCheck::error("key", detail));
                        Some(DiagnosisCode::SshKeyUnreadable)
                    }
                }
            }
            AuthMaterial::SshAgent => match self.check_agent() {
                Ok(detail) => {
                    checks.push(NamedCheck::ok("agent", detail));
                    None
                }
                Err(detail) => {
                    checks.push(NamedCheck::error("agent", detail));
                    Some(DiagnosisCode::SshAuthMissing)
                }
            },
        };

        let code = match local_failure {
            Some(code) => {
                checks.push(NamedCheck::warn("network", "skipped: credentials unusable"));
                code
            }
            None => self.network_probe(params, &mut checks).await,
        };

        let diagnosis = self.build(code, params, checks, started);
        tracing::info!(
            ssh = %params.display_target(),
            code = %diagnosis.code,
            duration_ms = diagnosis.duration_ms,
            "Preflight finished"
        );
        diagnosis
    }

    async fn network_probe(&self, params: &SshParams, checks: &mut Vec<NamedCheck>) -> DiagnosisCode {
        let timeout = self.config.probe_timeout;
        let invocation = SshCommandBuilder::new(&self.ssh_binary, params)
            .connect_timeout(timeout)
            .remote_command(format!("echo {}", PROBE_MARKER))
            .build();

        match run_to_completion(self.runner.as_ref(), &invocation, timeout, None).await {
            Ok(output) => {
                let stderr = output.stderr();
                if output.exit.success() && output.stdout().contains(PROBE_MARKER) {
                    let tofu = classify::added_host_key(&stderr);
                    if tofu {
                        checks.push(NamedCheck::warn("host_key", "new host key trusted on first use"));
                    } else {
                        checks.push(NamedCheck::ok("host_key", "known"));
                    }
                    checks.push(NamedCheck::ok("network", "remote command round trip"));
                    if tofu {
                        DiagnosisCode::OkWithTofu
                    } else {
                        DiagnosisCode::Ok
                    }
                } else {
                    let code = classify::classify_stderr(&stderr);
                    let detail = last_line(&stderr).unwrap_or_else(|| output.exit.to_string());
                    checks.push(NamedCheck::error("network", detail));
                    code
                }
            }
            Err(RunnerError::TimedOut(after)) => {
                checks.push(NamedCheck::error(
                    "network",
                    format!("no response within {}s", after.as_secs()),
                ));
                DiagnosisCode::SshTimeout
            }
            Err(e) => {
                checks.push(NamedCheck::error("network", e.to_string()));
                DiagnosisCode::SshNetworkUnreachable
            }
        }
    }

    /// Ask ssh for the alias's effective config and report it as checks
    async fn resolve_alias(&self, alias: &str, checks: &mut Vec<NamedCheck>) {
        let invocation = resolve_config_invocation(&self.ssh_binary, alias);
        let lookup = run_to_completion(
            self.runner.as_ref(),
            &invocation,
            self.config.config_lookup_timeout,
            None,
        )
        .await;

        match lookup {
            Ok(output) if output.exit.success() => {
                let resolved = ResolvedAlias::parse(&output.stdout());
                checks.push(NamedCheck::ok(
                    "host",
                    format!("{} -> {}", alias, resolved.hostname.as_deref().unwrap_or(alias)),
                ));
                checks.push(NamedCheck::ok(
                    "port",
                    resolved.port.as_deref().unwrap_or("22").to_string(),
                ));
                match resolved.user {
                    Some(user) => checks.push(NamedCheck::ok("user", user)),
                    None => checks.push(NamedCheck::warn("user", "not set in ssh config")),
                }
            }
            Ok(output) => {
                let detail = last_line(&output.stderr()).unwrap_or_else(|| output.exit.to_string());
                checks.push(NamedCheck::warn("host", format!("alias lookup failed: {}", detail)));
            }
            Err(e) => {
                checks.push(NamedCheck::warn("host", format!("alias lookup failed: {}", e)));
            }
        }
    }

    fn check_agent(&self) -> Result<String, String> {
        match &self.agent_socket {
            None => Err("SSH_AUTH_SOCK is not set".to_string()),
            Some(socket) if !socket.exists() => {
                Err(format!("agent socket {} does not exist", socket.display()))
            }
            Some(socket) => Ok(format!("agent at {}", socket.display())),
        }
    }

    fn build(
        &self,
        code: DiagnosisCode,
        params: &SshParams,
        checks: Vec<NamedCheck>,
        started: Instant,
    ) -> PreflightDiagnosis {
        let (title, message, hints) = classify::describe(code, params);
        PreflightDiagnosis {
            code,
            title,
            message,
            hints,
            checks,
            params: params.clone(),
            checked_at: Utc::now(),
            duration_ms: started.elapsed().as_millis() as u64,
            quick_fix: classify::quick_fix(code, params, &self.config),
        }
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(str::to_string)
}

/// Local checks on a private key file before it is offered to ssh
pub fn check_key_file(path: &Path) -> Result<String, String> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    if !metadata.is_file() {
        return Err(format!("{} is not a file", path.display()));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = metadata.permissions().mode() & 0o777;
        if mode & 0o077 != 0 {
            return Err(format!(
                "permissions {:o} on {} are too open; run chmod 600",
                mode,
                path.display()
            ));
        }
    }

    match russh_keys::load_secret_key(path, None) {
        Ok(key) => Ok(format!("{} key at {}", key.name(), path.display())),
        Err(russh_keys::Error::KeyIsEncrypted) => Err(format!(
            "{} is passphrase-protected; add it to ssh-agent instead",
            path.display()
        )),
        Err(e) => Err(format!("{} is not a usable private key: {}", path.display(), e)),
    }
}

/// Fields of interest from `ssh -G` output
#[derive(Debug, Default, PartialEq, Eq)]
struct ResolvedAlias {
    hostname: Option<String>,
    port: Option<String>,
    user: Option<String>,
}

impl ResolvedAlias {
    fn parse(output: &str) -> Self {
        let mut resolved = Self::default();
        for line in output.lines() {
            let mut parts = line.splitn(2, ' ');
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let value = Some(value.trim().to_string());
            match key {
                "hostname" => resolved.hostname = value,
                "port" => resolved.port = value,
                "user" => resolved.user = value,
                _ => {}
            }
        }
        resolved
    }
}
