use crate::domain::rule::Rule;
use crate::domain::service::{Service, ServiceId};
use crate::health::filter::HealthFilter;

/// A load-balancing tactic picks one admitted Service from a Rule (spec §4.4).
///
/// `candidates` are already filtered to `service.active && healthFilter.admits(id)`
/// by the Selector; a Tactic never needs to re-check admission itself.
pub trait Tactic: Send + Sync + std::fmt::Debug {
    fn select(&self, rule: &Rule, candidates: &[&Service]) -> Option<ServiceId>;
}

pub(crate) fn admitted_candidates<'a>(
    rule: &'a Rule,
    filter: &HealthFilter,
) -> Vec<&'a Service> {
    rule.services
        .iter()
        .filter(|s| s.active && filter.admits(&s.id()))
        .collect()
}
