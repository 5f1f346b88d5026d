//! Sticky round-robin: stays on the current service for `request_threshold`
//! requests, then advances to the next candidate in id order (spec §4.4, §8).
//!
//! Open Question 1 resolution: weight only gates participation (zero weight
//! excludes a service elsewhere); RoundRobin itself ignores weight magnitude.

use crate::domain::rule::Rule;
use crate::domain::service::{Service, ServiceId};
use crate::tactics::strategy::Tactic;
use dashmap::DashMap;
use std::sync::Mutex;

#[derive(Debug, Default)]
struct RrState {
    last_index: usize,
    requests_since_switch: u32,
    /// False until the very first pick. Distinguishes "never selected yet"
    /// (stay at `last_index`, i.e. `ids[0]`) from "current service filtered
    /// out" (advance), both of which otherwise look like `current == None`.
    started: bool,
}

#[derive(Debug)]
pub struct RoundRobinTactic {
    request_threshold: u32,
    state: DashMap<crate::domain::rule::RuleId, Mutex<RrState>>,
}

impl RoundRobinTactic {
    pub fn new(request_threshold: u32) -> Self {
        Self {
            request_threshold: request_threshold.max(1),
            state: DashMap::new(),
        }
    }
}

impl Tactic for RoundRobinTactic {
    fn select(&self, rule: &Rule, candidates: &[&Service]) -> Option<ServiceId> {
        if candidates.is_empty() {
            return None;
        }

        let mut ids: Vec<ServiceId> = candidates.iter().map(|s| s.id()).collect();
        ids.sort();

        let entry = self
            .state
            .entry(rule.id.clone())
            .or_insert_with(|| Mutex::new(RrState::default()));
        let mut st = entry.value().lock().unwrap_or_else(|e| e.into_inner());

        let sticky = rule.current_service_id();
        let current = sticky.filter(|id| ids.contains(id));

        let chosen = match current {
            Some(id) if st.requests_since_switch < self.request_threshold => {
                st.requests_since_switch += 1;
                id
            }
            None if !st.started => {
                // Very first selection for this rule: start at `ids[0]`
                // rather than pre-advancing past it (spec §8 scenario #1).
                st.started = true;
                st.requests_since_switch = 1;
                ids[st.last_index].clone()
            }
            _ => {
                // Threshold exhausted, or the formerly-current service was
                // filtered out of `candidates` — advance to the next one.
                st.started = true;
                st.last_index = (st.last_index + 1) % ids.len();
                st.requests_since_switch = 1;
                ids[st.last_index].clone()
            }
        };

        rule.set_current_service_id(chosen.clone());
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::ProviderId;
    use crate::domain::rule::{RuleId, TacticSpec};
    use crate::domain::provider::Dialect;

    fn rule_with(n: usize, threshold: u32) -> Rule {
        let services = (0..n)
            .map(|i| Service::new(ProviderId(format!("p{i}")), "m".into(), 1, 60))
            .collect();
        Rule::new(
            RuleId("r".into()),
            "gpt".into(),
            None,
            Dialect::OpenAi,
            services,
            TacticSpec::RoundRobin {
                request_threshold: threshold,
            },
        )
    }

    #[test]
    fn sticks_for_threshold_then_advances() {
        let rule = rule_with(3, 2);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        let tactic = RoundRobinTactic::new(2);

        let first = tactic.select(&rule, &candidates).unwrap();
        let second = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(first, second, "stays sticky within the threshold window");

        let third = tactic.select(&rule, &candidates).unwrap();
        assert_ne!(third, second, "advances once the threshold is exhausted");
    }

    /// Spec §8 scenario #1: two services, `threshold=1`, four identical
    /// requests must select `S1,S2,S1,S2` in that literal order, never
    /// starting on the second service.
    #[test]
    fn scenario_one_round_robin_starts_at_s0_and_alternates() {
        let rule = rule_with(2, 1);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        let tactic = RoundRobinTactic::new(1);

        let s0 = candidates[0].id();
        let s1 = candidates[1].id();
        let expected = [s0.clone(), s1.clone(), s0, s1];

        let picks: Vec<ServiceId> = (0..4)
            .map(|_| tactic.select(&rule, &candidates).unwrap())
            .collect();
        assert_eq!(picks, expected);
    }

    #[test]
    fn cycles_through_every_candidate() {
        let rule = rule_with(3, 1);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        let tactic = RoundRobinTactic::new(1);

        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            seen.insert(tactic.select(&rule, &candidates).unwrap());
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn empty_candidates_yields_none() {
        let rule = rule_with(1, 1);
        let tactic = RoundRobinTactic::new(1);
        assert!(tactic.select(&rule, &[]).is_none());
    }
}
