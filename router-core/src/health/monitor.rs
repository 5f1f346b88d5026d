//! Per-serviceID health tracking with two independent failure signals (spec §4.2).

use crate::domain::service::ServiceId;
use ahash::RandomState;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy)]
pub struct HealthParams {
    pub err_threshold: u32,
    pub recovery_seconds: u64,
}

impl Default for HealthParams {
    fn default() -> Self {
        Self {
            err_threshold: 3,
            recovery_seconds: 300,
        }
    }
}

#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub consecutive_errors: u32,
    pub rate_limited: bool,
}

#[derive(Debug, Clone, Default)]
struct HealthState {
    consecutive_errors: u32,
    rate_limited: bool,
    last_failure_at: Option<Instant>,
}

/// An error classification reported to the monitor. The monitor does not branch on
/// the kind itself — it only matters for logging — but callers (the Forwarder) use
/// it to distinguish transport failures from upstream HTTP errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Timeout,
    Connect,
    Transport,
    Http5xx(u16),
    ParseFailure,
}

#[derive(Debug)]
pub struct HealthMonitor {
    params: HealthParams,
    state: DashMap<ServiceId, HealthState, RandomState>,
}

impl HealthMonitor {
    pub fn new(params: HealthParams) -> Self {
        Self {
            params,
            state: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn report_success(&self, service_id: &ServiceId) {
        let mut entry = self.state.entry(service_id.clone()).or_default();
        let was_unhealthy = entry.rate_limited || entry.consecutive_errors >= self.params.err_threshold;
        entry.rate_limited = false;
        entry.consecutive_errors = 0;
        entry.last_failure_at = None;
        if was_unhealthy {
            info!(service = %service_id, event = "health_recovered", "service reported success after degradation");
        }
    }

    pub fn report_error(&self, service_id: &ServiceId, kind: ErrorKind) {
        let mut entry = self.state.entry(service_id.clone()).or_default();
        entry.consecutive_errors += 1;
        if entry.consecutive_errors >= self.params.err_threshold {
            entry.last_failure_at = Some(Instant::now());
            info!(
                service = %service_id,
                consecutive_errors = entry.consecutive_errors,
                kind = ?kind,
                event = "health_degraded",
                "service crossed error threshold"
            );
        }
    }

    /// Latches `rateLimited`; independent of `consecutiveErrors` (spec §4.2, Open Question 2).
    pub fn report_rate_limit(&self, service_id: &ServiceId) {
        let mut entry = self.state.entry(service_id.clone()).or_default();
        entry.rate_limited = true;
        entry.last_failure_at = Some(Instant::now());
        info!(service = %service_id, event = "rate_limited", "upstream signaled 429");
    }

    pub fn is_healthy(&self, service_id: &ServiceId) -> bool {
        self.status(service_id).healthy
    }

    pub fn status(&self, service_id: &ServiceId) -> HealthStatus {
        let Some(entry) = self.state.get(service_id) else {
            return HealthStatus {
                healthy: true,
                consecutive_errors: 0,
                rate_limited: false,
            };
        };

        let degraded =
            entry.rate_limited || entry.consecutive_errors >= self.params.err_threshold;

        let recovered = entry
            .last_failure_at
            .map(|t| t.elapsed() >= Duration::from_secs(self.params.recovery_seconds))
            .unwrap_or(false);

        HealthStatus {
            healthy: !degraded || recovered,
            consecutive_errors: entry.consecutive_errors,
            rate_limited: entry.rate_limited,
        }
    }

    /// Administrative reset: clears all fields for a serviceID.
    pub fn reset(&self, service_id: &ServiceId) {
        self.state.remove(service_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sid(s: &str) -> ServiceId {
        ServiceId(s.to_string())
    }

    #[test]
    fn never_observed_is_healthy() {
        let m = HealthMonitor::new(HealthParams::default());
        assert!(m.is_healthy(&sid("p:m")));
    }

    #[test]
    fn crosses_threshold_then_unhealthy() {
        let m = HealthMonitor::new(HealthParams {
            err_threshold: 3,
            recovery_seconds: 300,
        });
        let id = sid("p:m");
        m.report_error(&id, ErrorKind::Transport);
        m.report_error(&id, ErrorKind::Transport);
        assert!(m.is_healthy(&id));
        m.report_error(&id, ErrorKind::Transport);
        assert!(!m.is_healthy(&id));
    }

    #[test]
    fn rate_limit_is_independent_of_error_counter() {
        let m = HealthMonitor::new(HealthParams::default());
        let id = sid("p:m");
        m.report_rate_limit(&id);
        let status = m.status(&id);
        assert!(status.rate_limited);
        assert_eq!(status.consecutive_errors, 0);
        assert!(!status.healthy);
    }

    #[test]
    fn success_clears_both_signals() {
        let m = HealthMonitor::new(HealthParams::default());
        let id = sid("p:m");
        m.report_error(&id, ErrorKind::Transport);
        m.report_error(&id, ErrorKind::Transport);
        m.report_error(&id, ErrorKind::Transport);
        m.report_rate_limit(&id);
        assert!(!m.is_healthy(&id));
        m.report_success(&id);
        let status = m.status(&id);
        assert!(status.healthy);
        assert_eq!(status.consecutive_errors, 0);
        assert!(!status.rate_limited);
    }

    #[test]
    fn reset_clears_all_fields() {
        let m = HealthMonitor::new(HealthParams::default());
        let id = sid("p:m");
        m.report_rate_limit(&id);
        m.reset(&id);
        assert!(m.is_healthy(&id));
    }
}
