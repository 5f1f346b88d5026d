//! Weighted-random selection among admitted candidates (spec §4.4).

use crate::domain::rule::Rule;
use crate::domain::service::{Service, ServiceId};
use crate::tactics::strategy::Tactic;
use rand::Rng;

#[derive(Debug, Default)]
pub struct RandomTactic;

impl Tactic for RandomTactic {
    fn select(&self, _rule: &Rule, candidates: &[&Service]) -> Option<ServiceId> {
        if candidates.is_empty() {
            return None;
        }

        let total_weight: u64 = candidates.iter().map(|s| s.weight as u64).sum();
        if total_weight == 0 {
            return None;
        }

        let mut pick = rand::rng().random_range(0..total_weight);
        for service in candidates {
            let w = service.weight as u64;
            if pick < w {
                return Some(service.id());
            }
            pick -= w;
        }

        candidates.last().map(|s| s.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{Dialect, ProviderId};
    use crate::domain::rule::{RuleId, TacticSpec};

    fn rule_with_weights(weights: &[u32]) -> Rule {
        let services = weights
            .iter()
            .enumerate()
            .map(|(i, w)| Service::new(ProviderId(format!("p{i}")), "m".into(), *w, 60))
            .collect();
        Rule::new(
            RuleId("r".into()),
            "gpt".into(),
            None,
            Dialect::OpenAi,
            services,
            TacticSpec::Random,
        )
    }

    #[test]
    fn heavier_weight_is_picked_more_often() {
        let rule = rule_with_weights(&[1, 99]);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        let tactic = RandomTactic;

        let mut heavy_hits = 0;
        for _ in 0..200 {
            let picked = tactic.select(&rule, &candidates).unwrap();
            if picked == candidates[1].id() {
                heavy_hits += 1;
            }
        }
        assert!(heavy_hits > 150, "heavy_hits={heavy_hits}");
    }

    #[test]
    fn single_candidate_always_wins() {
        let rule = rule_with_weights(&[5]);
        let candidates: Vec<&Service> = rule.services.iter().collect();
        let tactic = RandomTactic;
        assert_eq!(tactic.select(&rule, &candidates), Some(candidates[0].id()));
    }

    #[test]
    fn empty_candidates_yields_none() {
        let rule = rule_with_weights(&[1]);
        let tactic = RandomTactic;
        assert!(tactic.select(&rule, &[]).is_none());
    }
}
