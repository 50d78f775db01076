//! Per-client preflight state: diagnosis history and connect bypass

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, Utc};

use fd_core::error::BridgeError;
use fd_core::model::{PreflightDiagnosis, SshParams};

/// How a connect attempt was cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearanceKind {
    /// A fresh passing diagnosis exists for the exact parameters
    Preflight,
    /// The caller accepted connecting without one
    Bypass,
}

/// Proof that a connect for `params` passed the preflight gate.
///
/// Only [`PreflightSession::clearance`] can produce one.
#[derive(Debug, Clone)]
pub struct ConnectClearance {
    params: SshParams,
    kind: ClearanceKind,
}

impl ConnectClearance {
    pub fn params(&self) -> &SshParams {
        &self.params
    }

    pub fn kind(&self) -> ClearanceKind {
        self.kind
    }

    /// Whether this clearance covers `params`
    pub fn covers(&self, params: &SshParams) -> bool {
        self.params == *params
    }
}

/// Diagnosis history and bypass flag for one client session
#[derive(Debug, Clone)]
pub struct PreflightSession {
    params: Option<SshParams>,
    history: VecDeque<PreflightDiagnosis>,
    capacity: usize,
    ttl: Duration,
    bypass: bool,
    last_used: DateTime<Utc>,
}

impl PreflightSession {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            params: None,
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            ttl,
            bypass: false,
            last_used: Utc::now(),
        }
    }

    /// Mark the session as used at `now`
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_used = self.last_used.max(now);
    }

    /// Unused for longer than the TTL; nothing in it can clear a connect
    pub fn is_idle(&self, now: DateTime<Utc>) -> bool {
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        now.signed_duration_since(self.last_used) > ttl
    }

    /// Parameters currently being edited
    pub fn params(&self) -> Option<&SshParams> {
        self.params.as_ref()
    }

    /// Track the parameter tuple; any change clears the bypass
    pub fn set_params(&mut self, params: &SshParams) {
        if self.params.as_ref() != Some(params) {
            self.params = Some(params.clone());
            self.bypass = false;
        }
    }

    /// Opt in or out of connecting without a passing preflight for `params`
    pub fn set_bypass(&mut self, params: &SshParams, enabled: bool) {
        self.set_params(params);
        self.bypass = enabled;
    }

    pub fn bypass_enabled(&self) -> bool {
        self.bypass
    }

    /// Append a diagnosis, evicting the oldest beyond capacity
    pub fn record(&mut self, diagnosis: PreflightDiagnosis) {
        self.history.push_front(diagnosis);
        self.history.truncate(self.capacity);
    }

    /// Diagnoses, most recent first
    pub fn history(&self) -> impl Iterator<Item = &PreflightDiagnosis> {
        self.history.iter()
    }

    pub fn latest(&self) -> Option<&PreflightDiagnosis> {
        self.history.front()
    }

    /// Most recent diagnosis for exactly `params`, if it passed within the TTL
    pub fn fresh_pass(&self, params: &SshParams, now: DateTime<Utc>) -> Option<&PreflightDiagnosis> {
        let latest = self.history.iter().find(|d| d.params == *params)?;
        let ttl = chrono::Duration::from_std(self.ttl).unwrap_or(chrono::Duration::MAX);
        let age = now.signed_duration_since(latest.checked_at);
        (latest.passed() && age <= ttl).then_some(latest)
    }

    /// Whether a connect with the current parameters needs no bypass
    pub fn can_connect_without_bypass(&self, now: DateTime<Utc>) -> bool {
        self.params
            .as_ref()
            .map_or(false, |params| self.fresh_pass(params, now).is_some())
    }

    /// Gate a connect for `params`
    pub fn clearance(
        &self,
        params: &SshParams,
        now: DateTime<Utc>,
    ) -> Result<ConnectClearance, BridgeError> {
        if self.params.as_ref() == Some(params) {
            if self.fresh_pass(params, now).is_some() {
                return Ok(ConnectClearance {
                    params: params.clone(),
                    kind: ClearanceKind::Preflight,
                });
            }
            if self.bypass {
                return Ok(ConnectClearance {
                    params: params.clone(),
                    kind: ClearanceKind::Bypass,
                });
            }
        }

        let reason = match self.history.iter().find(|d| d.params == *params) {
            None => format!("no preflight has been run for {}", params.display_target()),
            Some(d) if !d.passed() => format!("last preflight failed with {}", d.code),
            Some(_) => "last passing preflight has expired".to_string(),
        };
        Err(BridgeError::PreflightRequired(reason))
    }
}

#[cfg(test)]
pub(crate) fn diagnosis_for(
    params: &SshParams,
    code: fd_core::types::DiagnosisCode,
    at: DateTime<Utc>,
) -> PreflightDiagnosis {
    PreflightDiagnosis {
        code,
        title: code.to_string(),
        message: String::new(),
        hints: Vec::new(),
        checks: Vec::new(),
        params: params.clone(),
        checked_at: at,
        duration_ms: 10,
        quick_fix: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_core::model::AuthMaterial;
    use fd_core::types::DiagnosisCode;

    fn session() -> PreflightSession {
        PreflightSession::new(10, Duration::from_secs(120))
    }

    fn params() -> SshParams {
        SshParams::explicit("10.0.0.5", "root", "~/.ssh/id_ed25519")
    }

    #[test]
    fn test_fresh_pass_clears_connect() {
        let now = Utc::now();
        let mut s = session();
        s.set_params(&params());
        s.record(diagnosis_for(&params(), DiagnosisCode::Ok, now));

        assert!(s.can_connect_without_bypass(now));
        let clearance = s.clearance(&params(), now).unwrap();
        assert_eq!(clearance.kind(), ClearanceKind::Preflight);
        assert!(clearance.covers(&params()));
    }

    #[test]
    fn test_pass_expires_after_ttl() {
        let now = Utc::now();
        let mut s = session();
        s.set_params(&params());
        s.record(diagnosis_for(&params(), DiagnosisCode::OkWithTofu, now));

        let later = now + chrono::Duration::seconds(121);
        assert!(!s.can_connect_without_bypass(later));
        assert!(matches!(
            s.clearance(&params(), later),
            Err(BridgeError::PreflightRequired(_))
        ));
    }

    #[test]
    fn test_param_change_invalidates_within_ttl() {
        let now = Utc::now();
        let mut s = session();
        s.set_params(&params());
        s.record(diagnosis_for(&params(), DiagnosisCode::Ok, now));
        assert!(s.can_connect_without_bypass(now));

        let mut changed = params();
        changed.auth = AuthMaterial::SshAgent;
        s.set_params(&changed);
        assert!(!s.can_connect_without_bypass(now));
        assert!(s.clearance(&changed, now).is_err());

        // Reverting to the diagnosed tuple is covered again
        s.set_params(&params());
        assert!(s.can_connect_without_bypass(now));
    }

    #[test]
    fn test_bypass_resets_on_param_change() {
        let now = Utc::now();
        let mut s = session();
        s.set_bypass(&params(), true);
        assert_eq!(
            s.clearance(&params(), now).unwrap().kind(),
            ClearanceKind::Bypass
        );

        let mut changed = params();
        changed.port = 2222;
        s.set_params(&changed);
        assert!(!s.bypass_enabled());
        assert!(s.clearance(&changed, now).is_err());

        // Same tuple again keeps the flag as it is
        s.set_bypass(&changed, true);
        s.set_params(&changed);
        assert!(s.bypass_enabled());
    }

    #[test]
    fn test_failed_latest_blocks_even_if_older_pass() {
        let now = Utc::now();
        let mut s = session();
        s.set_params(&params());
        s.record(diagnosis_for(&params(), DiagnosisCode::Ok, now));
        s.record(diagnosis_for(&params(), DiagnosisCode::SshTimeout, now));

        let err = s.clearance(&params(), now).unwrap_err();
        assert!(err.to_string().contains("ssh_timeout"));
    }

    #[test]
    fn test_history_is_bounded_most_recent_first() {
        let now = Utc::now();
        let mut s = PreflightSession::new(3, Duration::from_secs(120));
        for i in 0..5 {
            let mut p = params();
            p.port = 2200 + i;
            s.record(diagnosis_for(&p, DiagnosisCode::Ok, now));
        }
        let ports: Vec<u16> = s.history().map(|d| d.params.port).collect();
        assert_eq!(ports, vec![2204, 2203, 2202]);
        assert_eq!(s.latest().map(|d| d.params.port), Some(2204));
    }

    #[test]
    fn test_key_change_after_unreadable() {
        let now = Utc::now();
        let mut s = session();
        let rsa = SshParams::explicit("10.0.0.5", "root", "~/.ssh/id_rsa");
        let ed = SshParams::explicit("10.0.0.5", "root", "~/.ssh/id_ed25519");

        s.set_params(&rsa);
        s.record(diagnosis_for(&rsa, DiagnosisCode::SshKeyUnreadable, now));
        s.set_params(&ed);
        s.record(diagnosis_for(&ed, DiagnosisCode::Ok, now));

        let history: Vec<&PreflightDiagnosis> = s.history().collect();
        assert_eq!(history[0].code, DiagnosisCode::Ok);
        assert_eq!(history[1].code, DiagnosisCode::SshKeyUnreadable);
        assert_ne!(history[0].params.auth, history[1].params.auth);
        assert!(s.clearance(&ed, now).is_ok());
        assert!(s.clearance(&rsa, now).is_err());
    }

    #[test]
    fn test_idle_after_ttl_without_use() {
        let now = Utc::now();
        let mut s = session();
        s.touch(now);
        assert!(!s.is_idle(now + chrono::Duration::seconds(120)));
        assert!(s.is_idle(now + chrono::Duration::seconds(121)));

        s.touch(now + chrono::Duration::seconds(100));
        assert!(!s.is_idle(now + chrono::Duration::seconds(200)));
    }
}
