//! Preflight diagnostics
//!
//! Proves SSH reachability before a bridge connect is attempted. Each client
//! keeps a [`PreflightSession`] holding its diagnosis history and bypass flag;
//! a connect is only accepted with a [`ConnectClearance`] from that session.

mod classify;
mod probe;
mod session;

pub use classify::{classify_stderr, quick_fix, PROBE_MARKER};
pub use probe::{check_key_file, Prober};
pub use session::{ClearanceKind, ConnectClearance, PreflightSession};

#[cfg(test)]
pub(crate) use session::diagnosis_for;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use fd_core::error::{BridgeError, ValidationError};
use fd_core::model::{PreflightDiagnosis, SshParams};

/// Probes plus per-session state, keyed by client session id
pub struct PreflightService {
    prober: Prober,
    sessions: DashMap<String, PreflightSession>,
}

impl PreflightService {
    pub fn new(prober: Prober) -> Self {
        Self {
            prober,
            sessions: DashMap::new(),
        }
    }

    fn new_session(&self) -> PreflightSession {
        let config = self.prober.config();
        PreflightSession::new(config.history_capacity, config.ttl)
    }

    /// Validate, probe and record a diagnosis in the session
    pub async fn run(
        &self,
        session_id: &str,
        params: &SshParams,
    ) -> Result<PreflightDiagnosis, ValidationError> {
        params.validate()?;
        self.evict_idle(Utc::now());

        // Probing may take the full timeout; the session is not locked meanwhile
        {
            let mut session = self
                .sessions
                .entry(session_id.to_string())
                .or_insert_with(|| self.new_session());
            session.set_params(params);
            session.touch(Utc::now());
        }

        let diagnosis = self.prober.probe(params).await;

        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.new_session());
        session.record(diagnosis.clone());
        session.touch(Utc::now());
        drop(session);

        Ok(diagnosis)
    }

    /// Session history, most recent first
    pub fn history(&self, session_id: &str) -> Vec<PreflightDiagnosis> {
        self.sessions
            .get(session_id)
            .map(|s| s.history().cloned().collect())
            .unwrap_or_default()
    }

    /// Gate a connect; `confirm_bypass` opts the session into the unsafe path
    pub fn clearance(
        &self,
        session_id: &str,
        params: &SshParams,
        confirm_bypass: bool,
    ) -> Result<ConnectClearance, BridgeError> {
        params.validate()?;
        let now = Utc::now();
        self.evict_idle(now);

        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.new_session());
        session.set_params(params);
        session.touch(now);
        if confirm_bypass {
            session.set_bypass(params, true);
        }

        let clearance = session.clearance(params, now)?;
        if clearance.kind() == ClearanceKind::Bypass {
            tracing::warn!(
                session = session_id,
                ssh = %params.display_target(),
                "Connect cleared by bypass without a passing preflight"
            );
        }
        Ok(clearance)
    }

    /// Drop a session's state
    pub fn forget(&self, session_id: &str) {
        self.sessions.remove(session_id);
    }

    /// Drop sessions unused for longer than the TTL
    pub fn evict_idle(&self, now: DateTime<Utc>) {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| !session.is_idle(now));
        let evicted = before.saturating_sub(self.sessions.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted idle preflight sessions");
        }
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
