//! Orchestrates Tactic + Health Filter and records usage/outcomes (spec §4.6).
//!
//! The Selector owns no per-request state of its own — Rule holds
//! `currentServiceID` for sticky tactics. Tactic instances are built once per
//! Rule (thresholds are per-rule) and cached for the lifetime of the Rule.

use crate::domain::provider::ProviderId;
use crate::domain::rule::{Rule, RuleId};
use crate::domain::service::{Service, ServiceId};
use crate::health::filter::HealthFilter;
use crate::health::monitor::ErrorKind;
use crate::tactics::{self, strategy::admitted_candidates, Tactic};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SelectError {
    #[error("rule is invalid: {0}")]
    InvalidRule(String),
    #[error("no healthy services available")]
    NoHealthyServices,
    #[error("service {0} not found on this rule")]
    UnknownService(ServiceId),
}

/// Outcome reported to the Selector after a Forwarder call completes (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Success,
    Error(ErrorKind),
    RateLimited,
}

pub struct Selector {
    health: Arc<HealthFilter>,
    tactics: DashMap<RuleId, Arc<dyn Tactic>, RandomState>,
    /// In-flight request gauge per serviceID, for the admin summary view only
    /// — no Tactic in this spec reads it, it never influences selection.
    active_requests: DashMap<ServiceId, AtomicU32, RandomState>,
}

impl Selector {
    pub fn new(health: Arc<HealthFilter>) -> Self {
        Self {
            health,
            tactics: DashMap::with_hasher(RandomState::new()),
            active_requests: DashMap::with_hasher(RandomState::new()),
        }
    }

    pub fn health_filter(&self) -> &HealthFilter {
        &self.health
    }

    /// Enforces the §4.5 Rule invariants without mutating anything.
    pub fn validate(&self, rule: &Rule) -> Result<(), SelectError> {
        rule.validate().map_err(SelectError::InvalidRule)
    }

    /// Applies the Health Filter, delegates to the Rule's Tactic, and records
    /// the pick as `Rule.currentServiceID`.
    pub fn select_service<'a>(&self, rule: &'a Rule) -> Result<&'a Service, SelectError> {
        self.validate(rule)?;

        let candidates = admitted_candidates(rule, &self.health);
        if candidates.is_empty() {
            return Err(SelectError::NoHealthyServices);
        }

        let tactic = self
            .tactics
            .entry(rule.id.clone())
            .or_insert_with(|| tactics::build(&rule.tactic))
            .clone();

        let chosen_id = tactic
            .select(rule, &candidates)
            .ok_or(SelectError::NoHealthyServices)?;

        // Only the service a Tactic actually picked consumes a half-open
        // probe slot; every other filtered candidate was merely read.
        if !self.health.begin_dispatch(&chosen_id) {
            return Err(SelectError::NoHealthyServices);
        }

        rule.service(&chosen_id)
            .ok_or(SelectError::UnknownService(chosen_id))
    }

    /// Rebuilds the cached tactic for a rule (admin `PUT .../tactic`).
    pub fn invalidate_tactic(&self, rule_id: &RuleId) {
        self.tactics.remove(rule_id);
    }

    /// Locates the Service via the Rule and updates its Stats.
    pub fn record_usage(
        &self,
        rule: &Rule,
        provider_id: &ProviderId,
        model: &str,
        input_tokens: u64,
        output_tokens: u64,
    ) -> Result<(), SelectError> {
        let id = ServiceId::new(provider_id, model);
        let service = rule.service(&id).ok_or(SelectError::UnknownService(id))?;
        service.stats.record(input_tokens, output_tokens);
        Ok(())
    }

    /// Updates Health Monitor/circuit state for a serviceID based on outcome.
    pub fn record_outcome(&self, service_id: &ServiceId, outcome: Outcome) {
        match outcome {
            Outcome::Success => self.health.record_success(service_id),
            Outcome::Error(kind) => self.health.record_error(service_id, kind),
            Outcome::RateLimited => self.health.record_rate_limit(service_id),
        }
    }

    /// Current in-flight request count for a serviceID (admin summary only).
    pub fn active_requests(&self, service_id: &ServiceId) -> u32 {
        self.active_requests
            .get(service_id)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn enter_request(&self, service_id: &ServiceId) {
        self.active_requests
            .entry(service_id.clone())
            .or_insert_with(|| AtomicU32::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    fn leave_request(&self, service_id: &ServiceId) {
        if let Some(counter) = self.active_requests.get(service_id) {
            counter.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

/// RAII guard around one in-flight Forwarder call. Unlike a request-lifetime
/// guard that always finishes on drop, a dropped-without-completion
/// `OutcomeGuard` reports nothing: an inbound cancel leaves no health change
/// and no stats record.
pub struct OutcomeGuard<'a> {
    selector: &'a Selector,
    service_id: ServiceId,
    finished: bool,
}

impl<'a> OutcomeGuard<'a> {
    pub fn new(selector: &'a Selector, service_id: ServiceId) -> Self {
        selector.enter_request(&service_id);
        Self {
            selector,
            service_id,
            finished: false,
        }
    }

    pub fn complete(mut self, outcome: Outcome) {
        self.selector.record_outcome(&self.service_id, outcome);
        self.finished = true;
    }
}

impl Drop for OutcomeGuard<'_> {
    fn drop(&mut self) {
        self.selector.leave_request(&self.service_id);
        if !self.finished {
            tracing::debug!(service = %self.service_id, "outcome guard dropped without completion, treating as inbound cancel");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::Dialect;
    use crate::domain::rule::{RuleId, TacticSpec};
    use crate::health::circuit::CircuitBreakerParams;
    use crate::health::monitor::HealthParams;
    use crate::health::filter::HealthFilter;

    fn rule_with(n: usize, tactic: TacticSpec) -> Rule {
        let services = (0..n)
            .map(|i| Service::new(ProviderId(format!("p{i}")), "m".into(), 1, 60))
            .collect();
        Rule::new(
            RuleId("r".into()),
            "gpt".into(),
            None,
            Dialect::OpenAi,
            services,
            tactic,
        )
    }

    fn selector() -> Selector {
        Selector::new(Arc::new(HealthFilter::new(
            HealthParams::default(),
            CircuitBreakerParams::default(),
        )))
    }

    #[test]
    fn selects_an_active_service_when_all_healthy() {
        let rule = rule_with(2, TacticSpec::RoundRobin { request_threshold: 1 });
        let sel = selector();
        let chosen = sel.select_service(&rule).unwrap();
        assert!(rule.services.iter().any(|s| s.id() == chosen.id()));
    }

    #[test]
    fn no_healthy_services_fails_cleanly() {
        let rule = rule_with(1, TacticSpec::Random);
        let sel = selector();
        let id = rule.services[0].id();
        sel.health_filter().record_error(&id, ErrorKind::Transport);
        sel.health_filter().record_error(&id, ErrorKind::Transport);
        sel.health_filter().record_error(&id, ErrorKind::Transport);
        assert!(matches!(
            sel.select_service(&rule),
            Err(SelectError::NoHealthyServices)
        ));
    }

    #[test]
    fn record_usage_updates_the_right_service_stats() {
        let rule = rule_with(1, TacticSpec::Random);
        let sel = selector();
        sel.record_usage(&rule, &ProviderId("p0".into()), "m", 10, 5)
            .unwrap();
        let snap = rule.services[0].stats.snapshot();
        assert_eq!(snap.window_tokens_consumed, 15);
    }
}
