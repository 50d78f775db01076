//! ssh command-line construction

use std::time::Duration;

use fd_core::model::{AuthMaterial, SshParams};
use fd_core::types::ConnectionMode;

/// A fully built subprocess invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshInvocation {
    pub program: String,
    pub args: Vec<String>,
    /// Whether the child keeps a writable stdin
    pub stdin: bool,
}

impl SshInvocation {
    /// Human-readable command line with secrets left out
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// `-R remote_port:127.0.0.1:local_port`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReverseForward {
    pub remote_port: u16,
    pub local_port: u16,
}

/// Builds ssh invocations from validated [`SshParams`]
pub struct SshCommandBuilder<'a> {
    binary: &'a str,
    params: &'a SshParams,
    connect_timeout: Option<Duration>,
    batch: bool,
    keepalive: bool,
    forward: Option<ReverseForward>,
    remote_command: Option<String>,
    stdin: bool,
}

impl<'a> SshCommandBuilder<'a> {
    pub fn new(binary: &'a str, params: &'a SshParams) -> Self {
        Self {
            binary,
            params,
            connect_timeout: None,
            batch: true,
            keepalive: false,
            forward: None,
            remote_command: None,
            stdin: false,
        }
    }

    /// Bound the TCP connect + handshake
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Send keepalives so a dead peer ends the process
    pub fn keepalive(mut self) -> Self {
        self.keepalive = true;
        self
    }

    /// Open a reverse port forward and run no remote command
    pub fn reverse_forward(mut self, forward: ReverseForward) -> Self {
        self.forward = Some(forward);
        self
    }

    /// Run a remote command
    pub fn remote_command(mut self, command: impl Into<String>) -> Self {
        self.remote_command = Some(command.into());
        self
    }

    /// Keep stdin open for the caller to write to
    pub fn with_stdin(mut self) -> Self {
        self.stdin = true;
        self
    }

    pub fn build(self) -> SshInvocation {
        let mut args: Vec<String> = Vec::new();
        let opt = |args: &mut Vec<String>, value: String| {
            args.push("-o".to_string());
            args.push(value);
        };

        if self.batch {
            opt(&mut args, "BatchMode=yes".to_string());
        }
        // New host keys are trusted on first use and reported as such
        opt(&mut args, "StrictHostKeyChecking=accept-new".to_string());
        if let Some(timeout) = self.connect_timeout {
            opt(&mut args, format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }
        if self.keepalive {
            opt(&mut args, "ServerAliveInterval=15".to_string());
            opt(&mut args, "ServerAliveCountMax=3".to_string());
        }

        if self.params.mode == ConnectionMode::Explicit {
            args.push("-p".to_string());
            args.push(self.params.port.to_string());
            args.push("-l".to_string());
            args.push(self.params.user.clone());
        }
        // Aliases keep their host/port/user, but the checked key is the one used
        if let Some(path) = self.params.auth.resolved_key_path() {
            args.push("-i".to_string());
            args.push(path.display().to_string());
            opt(&mut args, "IdentitiesOnly=yes".to_string());
        }

        if let Some(forward) = self.forward {
            opt(&mut args, "ExitOnForwardFailure=yes".to_string());
            args.push("-N".to_string());
            args.push("-R".to_string());
            args.push(format!(
                "{}:127.0.0.1:{}",
                forward.remote_port, forward.local_port
            ));
        }

        args.push(self.params.host.clone());

        if self.forward.is_none() {
            if let Some(command) = self.remote_command {
                args.push(command);
            }
        }

        SshInvocation {
            program: self.binary.to_string(),
            args,
            stdin: self.stdin,
        }
    }
}

/// `ssh -G <alias>` to print the effective client configuration
pub fn resolve_config_invocation(binary: &str, alias: &str) -> SshInvocation {
    SshInvocation {
        program: binary.to_string(),
        args: vec!["-G".to_string(), alias.to_string()],
        stdin: false,
    }
}
