//! Always picks the candidate with the least tokens consumed in its current
//! window (spec §4.4, §8: "TokenBased never selects a Service S if some other
//! active healthy S' has strictly fewer window tokens"). Unlike RoundRobin and
//! Hybrid, TokenBased is not a sticky tactic — every call re-evaluates the
//! full candidate set.

use crate::domain::rule::Rule;
use crate::domain::service::{Service, ServiceId};
use crate::tactics::strategy::Tactic;

#[derive(Debug)]
pub struct TokenBasedTactic {
    #[allow(dead_code)]
    token_threshold: u64,
}

impl TokenBasedTactic {
    pub fn new(token_threshold: u64) -> Self {
        Self { token_threshold }
    }
}

impl Tactic for TokenBasedTactic {
    fn select(&self, rule: &Rule, candidates: &[&Service]) -> Option<ServiceId> {
        // `min_by_key` keeps the first element on ties, so indexing by
        // position (not `ServiceId`) gives "ties broken by first occurrence"
        // in the Rule's own service order, per spec §4.4/§8.
        let chosen = candidates
            .iter()
            .enumerate()
            .min_by_key(|(i, s)| (s.stats.current_window().1, *i))
            .map(|(_, s)| s.id())?;
        rule.set_current_service_id(chosen.clone());
        Some(chosen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{Dialect, ProviderId};
    use crate::domain::rule::{RuleId, TacticSpec};

    fn rule_with(n: usize) -> Rule {
        let services = (0..n)
            .map(|i| Service::new(ProviderId(format!("p{i}")), "m".into(), 1, 60))
            .collect();
        Rule::new(
            RuleId("r".into()),
            "gpt".into(),
            None,
            Dialect::OpenAi,
            services,
            TacticSpec::TokenBased {
                token_threshold: 100,
            },
        )
    }

    #[test]
    fn always_picks_global_minimum() {
        let rule = rule_with(3);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        candidates[0].stats.record(5000, 0);
        candidates[1].stats.record(1000, 0);
        candidates[2].stats.record(2500, 0);

        let tactic = TokenBasedTactic::new(100);
        let chosen = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(chosen, candidates[1].id());
    }

    #[test]
    fn switches_immediately_once_the_pick_consumes_more_tokens() {
        let rule = rule_with(3);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        candidates[0].stats.record(5000, 0);
        candidates[1].stats.record(1000, 0);
        candidates[2].stats.record(2500, 0);

        let tactic = TokenBasedTactic::new(100);
        let first = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(first, candidates[1].id());

        candidates[1].stats.record(3000, 0); // now 4000
        let second = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(second, candidates[2].id());
    }

    #[test]
    fn zero_consumption_service_always_wins() {
        let rule = rule_with(2);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        candidates[1].stats.record(1, 0);

        let tactic = TokenBasedTactic::new(100);
        let chosen = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(chosen, candidates[0].id());
    }

    #[test]
    fn ties_break_by_first_occurrence() {
        let rule = rule_with(3);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        let tactic = TokenBasedTactic::new(100);
        let chosen = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(chosen, candidates[0].id());
    }

    #[test]
    fn empty_candidates_yields_none() {
        let rule = rule_with(1);
        let tactic = TokenBasedTactic::new(100);
        assert!(tactic.select(&rule, &[]).is_none());
    }
}
