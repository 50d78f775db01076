//! Remote install protocol
//!
//! The install command reports progress with marker lines on stdout:
//!
//! ```text
//! @@fleetdeck needs-sudo
//! @@fleetdeck machine-id <id>
//! @@fleetdeck healthy
//! ```

use crate::ssh::{ExitInfo, OutputLine};

const MARKER_PREFIX: &str = "@@fleetdeck ";

/// Privilege level the install runs with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallMode {
    /// System-wide install, may need sudo
    System,
    /// Per-user install without elevated privileges
    User,
}

impl InstallMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallMode::System => "system",
            InstallMode::User => "user",
        }
    }
}

/// A recognised marker line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallMarker {
    NeedsSudo,
    MachineId(String),
    Healthy,
}

/// Parse a marker line; ordinary output yields `None`
pub fn parse_marker(line: &str) -> Option<InstallMarker> {
    let rest = line.trim().strip_prefix(MARKER_PREFIX)?;
    let mut parts = rest.split_whitespace();
    match parts.next()? {
        "needs-sudo" => Some(InstallMarker::NeedsSudo),
        "healthy" => Some(InstallMarker::Healthy),
        "machine-id" => parts.next().map(|id| InstallMarker::MachineId(id.to_string())),
        _ => None,
    }
}

/// What one install run concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallOutcome {
    Healthy { machine_id: Option<String> },
    NeedsSudo,
    Failed(String),
}

/// Markers seen so far during a run
#[derive(Debug, Default)]
pub struct InstallProgress {
    needs_sudo: bool,
    healthy: bool,
    machine_id: Option<String>,
    last_stderr: Option<String>,
}

impl InstallProgress {
    pub fn observe(&mut self, line: &OutputLine) {
        match parse_marker(&line.text) {
            Some(InstallMarker::NeedsSudo) => self.needs_sudo = true,
            Some(InstallMarker::Healthy) => self.healthy = true,
            Some(InstallMarker::MachineId(id)) => self.machine_id = Some(id),
            None if line.stream == crate::ssh::OutputStream::Stderr => {
                if !line.text.trim().is_empty() {
                    self.last_stderr = Some(line.text.trim().to_string());
                }
            }
            None => {}
        }
    }

    /// Decide the outcome once the process has exited
    pub fn finish(self, exit: ExitInfo) -> InstallOutcome {
        if exit.success() {
            if self.healthy {
                return InstallOutcome::Healthy {
                    machine_id: self.machine_id,
                };
            }
            return InstallOutcome::Failed(
                "install finished without reporting a healthy agent".to_string(),
            );
        }
        if self.needs_sudo {
            return InstallOutcome::NeedsSudo;
        }
        let detail = self
            .last_stderr
            .map(|l| format!(": {}", l))
            .unwrap_or_default();
        InstallOutcome::Failed(format!("install failed with {}{}", exit, detail))
    }
}

/// Remote command line with the install environment prepended
pub fn remote_command(
    install_command: &str,
    remote_port: u16,
    auth_token: &str,
    mode: InstallMode,
    password_on_stdin: bool,
) -> String {
    let mut env = format!(
        "FLEETDECK_REMOTE_PORT={} FLEETDECK_AUTH_TOKEN={} FLEETDECK_INSTALL_MODE={}",
        remote_port,
        auth_token,
        mode.as_str()
    );
    if password_on_stdin {
        env.push_str(" FLEETDECK_SUDO_STDIN=1");
    }
    format!("{} {}", env, install_command)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(lines: &[OutputLine], code: i32) -> InstallOutcome {
        let mut progress = InstallProgress::default();
        for line in lines {
            progress.observe(line);
        }
        progress.finish(ExitInfo { code: Some(code) })
    }

    #[test]
    fn test_parse_markers() {
        assert_eq!(parse_marker("@@fleetdeck healthy"), Some(InstallMarker::Healthy));
        assert_eq!(
            parse_marker("  @@fleetdeck machine-id m-42  "),
            Some(InstallMarker::MachineId("m-42".to_string()))
        );
        assert_eq!(parse_marker("@@fleetdeck machine-id"), None);
        assert_eq!(parse_marker("installing packages"), None);
        assert_eq!(parse_marker("@@fleetdeck reboot"), None);
    }

    #[test]
    fn test_healthy_requires_zero_exit() {
        let lines = [
            OutputLine::stdout("@@fleetdeck machine-id m-1"),
            OutputLine::stdout("@@fleetdeck healthy"),
        ];
        assert_eq!(
            run(&lines, 0),
            InstallOutcome::Healthy {
                machine_id: Some("m-1".to_string())
            }
        );
        assert!(matches!(run(&lines, 1), InstallOutcome::Failed(_)));
    }

    #[test]
    fn test_needs_sudo_on_nonzero_exit() {
        let lines = [OutputLine::stdout("@@fleetdeck needs-sudo")];
        assert_eq!(run(&lines, 3), InstallOutcome::NeedsSudo);
    }

    #[test]
    fn test_failure_carries_stderr() {
        let lines = [OutputLine::stderr("curl: (6) Could not resolve host")];
        match run(&lines, 6) {
            InstallOutcome::Failed(message) => {
                assert!(message.contains("exit code 6"));
                assert!(message.contains("Could not resolve host"));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert!(matches!(run(&[], 0), InstallOutcome::Failed(_)));
    }

    #[test]
    fn test_remote_command_environment() {
        let cmd = remote_command("./install.sh", 19700, "abcd", InstallMode::User, false);
        assert_eq!(
            cmd,
            "FLEETDECK_REMOTE_PORT=19700 FLEETDECK_AUTH_TOKEN=abcd FLEETDECK_INSTALL_MODE=user ./install.sh"
        );
        let cmd = remote_command("./install.sh", 19700, "abcd", InstallMode::System, true);
        assert!(cmd.contains("FLEETDECK_INSTALL_MODE=system FLEETDECK_SUDO_STDIN=1"));
    }
}
