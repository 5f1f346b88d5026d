//! Sticky while both the request and token counters are under threshold,
//! otherwise switches to whichever candidate minimizes `requests*10 + tokens`
//! (spec §4.4).

use crate::domain::rule::Rule;
use crate::domain::service::{Service, ServiceId};
use crate::tactics::strategy::Tactic;

#[derive(Debug)]
pub struct HybridTactic {
    request_threshold: u32,
    token_threshold: u64,
}

impl HybridTactic {
    pub fn new(request_threshold: u32, token_threshold: u64) -> Self {
        Self {
            request_threshold: request_threshold.max(1),
            token_threshold,
        }
    }

    fn score(service: &Service) -> u64 {
        let (requests, tokens) = service.stats.current_window();
        requests * 10 + tokens
    }
}

impl Tactic for HybridTactic {
    fn select(&self, rule: &Rule, candidates: &[&Service]) -> Option<ServiceId> {
        if candidates.is_empty() {
            return None;
        }

        if let Some(id) = rule.current_service_id() {
            if let Some(service) = candidates.iter().find(|s| s.id() == id) {
                let (requests, tokens) = service.stats.current_window();
                if requests < self.request_threshold as u64 && tokens < self.token_threshold {
                    return Some(id);
                }
            }
        }

        // `min_by_key` keeps the first element on ties, so indexing by
        // position (not `ServiceId`) gives "ties broken by first occurrence".
        let chosen = candidates
            .iter()
            .enumerate()
            .min_by_key(|(i, s)| (Self::score(s), *i))
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

    fn rule_with(n: usize, request_threshold: u32, token_threshold: u64) -> Rule {
        let services = (0..n)
            .map(|i| Service::new(ProviderId(format!("p{i}")), "m".into(), 1, 60))
            .collect();
        Rule::new(
            RuleId("r".into()),
            "gpt".into(),
            None,
            Dialect::OpenAi,
            services,
            TacticSpec::Hybrid {
                request_threshold,
                token_threshold,
            },
        )
    }

    #[test]
    fn keeps_sticky_service_within_both_thresholds() {
        let rule = rule_with(2, 50, 10_000);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        candidates[0].stats.record(4500, 4500);
        for _ in 0..5 {
            candidates[0].stats.record(0, 0);
        }
        rule.set_current_service_id(candidates[0].id());

        let tactic = HybridTactic::new(50, 10_000);
        let chosen = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(chosen, candidates[0].id());
    }

    #[test]
    fn switches_once_token_threshold_crossed_mid_stream() {
        let rule = rule_with(2, 50, 10_000);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        candidates[0].stats.record(9000, 1001); // 10001 tokens, crosses threshold
        rule.set_current_service_id(candidates[0].id());

        let tactic = HybridTactic::new(50, 10_000);
        let chosen = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(chosen, candidates[1].id());
    }

    #[test]
    fn no_sticky_pick_falls_back_to_min_score() {
        let rule = rule_with(3, 50, 10_000);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        candidates[1].stats.record(10, 10);

        let tactic = HybridTactic::new(50, 10_000);
        let chosen = tactic.select(&rule, &candidates).unwrap();
        assert_eq!(chosen, candidates[0].id());
    }

    #[test]
    fn empty_candidates_yields_none() {
        let rule = rule_with(1, 50, 10_000);
        let tactic = HybridTactic::new(50, 10_000);
        assert!(tactic.select(&rule, &[]).is_none());
    }
}
