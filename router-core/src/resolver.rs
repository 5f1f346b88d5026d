//! Maps a request-model string to a Rule in O(1) (spec §4.5).
//!
//! The index is an `ArcSwap<HashMap<..>>`: a reload swaps the whole map
//! pointer atomically, so readers always observe a single consistent Rule
//! object per key, never a half-updated index.

use crate::domain::provider::ProviderId;
use crate::domain::rule::{Rule, RuleId};
use crate::providers::ProviderRegistry;
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("rule {0} is invalid: {1}")]
    InvalidRule(RuleId, String),
    #[error("request model `{0}` is already claimed by an active rule")]
    DuplicateRequestModel(String),
    #[error("rule {0} references unknown provider {1}")]
    UnknownProvider(RuleId, ProviderId),
    #[error("rule {0} not found")]
    NotFound(RuleId),
}

#[derive(Default)]
struct Index {
    by_model: HashMap<String, Arc<Rule>>,
    by_id: HashMap<RuleId, Arc<Rule>>,
}

pub struct RuleResolver {
    index: ArcSwap<Index>,
}

impl RuleResolver {
    pub fn new() -> Self {
        Self {
            index: ArcSwap::from_pointee(Index::default()),
        }
    }

    pub fn load(providers: &ProviderRegistry, rules: Vec<Rule>) -> Result<Self, ResolverError> {
        let index = build_index(providers, rules)?;
        Ok(Self {
            index: ArcSwap::from_pointee(index),
        })
    }

    /// Rebuilds the whole index from scratch (config reload).
    pub fn reload(&self, providers: &ProviderRegistry, rules: Vec<Rule>) -> Result<(), ResolverError> {
        let index = build_index(providers, rules)?;
        self.index.store(Arc::new(index));
        Ok(())
    }

    /// O(1) lookup by the inbound `model` field.
    pub fn resolve(&self, request_model: &str) -> Option<Arc<Rule>> {
        self.index.load().by_model.get(request_model).cloned()
    }

    pub fn get(&self, id: &RuleId) -> Option<Arc<Rule>> {
        self.index.load().by_id.get(id).cloned()
    }

    pub fn all(&self) -> Vec<Arc<Rule>> {
        self.index.load().by_id.values().cloned().collect()
    }

    /// Upserts a single rule (admin `POST /rule/{uuid}`), revalidating the
    /// whole set so request-model uniqueness still holds.
    pub fn upsert(&self, providers: &ProviderRegistry, rule: Rule) -> Result<(), ResolverError> {
        let mut rules: Vec<Rule> = self
            .index
            .load()
            .by_id
            .values()
            .filter(|r| r.id != rule.id)
            .map(|r| clone_rule(r))
            .collect();
        rules.push(rule);
        self.reload(providers, rules)
    }

    /// Removes a rule by id (admin `DELETE /rule/{uuid}`).
    pub fn delete(&self, providers: &ProviderRegistry, id: &RuleId) -> Result<(), ResolverError> {
        let rules: Vec<Rule> = self
            .index
            .load()
            .by_id
            .values()
            .filter(|r| &r.id != id)
            .map(|r| clone_rule(r))
            .collect();
        self.reload(providers, rules)
    }
}

impl Default for RuleResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Rule holds non-`Clone` interior-mutable state (`current_service_id`); admin
/// mutations rebuild a fresh value, intentionally losing sticky state for the
/// rules being touched, which is correct — a changed rule has no valid
/// "current" pick left to honor.
fn clone_rule(rule: &Rule) -> Rule {
    Rule::new(
        rule.id.clone(),
        rule.request_model.clone(),
        rule.response_model.clone(),
        rule.scenario,
        rule.services
            .iter()
            .map(|s| {
                crate::domain::service::Service::new(
                    s.provider_id.clone(),
                    s.model.clone(),
                    s.weight,
                    s.window_seconds,
                )
            })
            .collect(),
        rule.tactic.clone(),
    )
}

fn build_index(providers: &ProviderRegistry, rules: Vec<Rule>) -> Result<Index, ResolverError> {
    let mut by_model = HashMap::new();
    let mut by_id = HashMap::new();

    for rule in rules {
        rule.validate()
            .map_err(|e| ResolverError::InvalidRule(rule.id.clone(), e))?;

        for service in &rule.services {
            if !providers.contains(&service.provider_id) {
                return Err(ResolverError::UnknownProvider(
                    rule.id.clone(),
                    service.provider_id.clone(),
                ));
            }
        }

        if rule.active && by_model.contains_key(&rule.request_model) {
            return Err(ResolverError::DuplicateRequestModel(
                rule.request_model.clone(),
            ));
        }

        let rule = Arc::new(rule);
        if rule.active {
            by_model.insert(rule.request_model.clone(), rule.clone());
        }
        by_id.insert(rule.id.clone(), rule);
    }

    Ok(Index { by_model, by_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{Dialect, Provider};
    use crate::domain::rule::TacticSpec;
    use crate::domain::service::Service;
    use std::time::Duration;

    fn provider(id: &str) -> Provider {
        Provider {
            id: ProviderId(id.to_string()),
            display_name: id.to_string(),
            base_url: "https://example.test".to_string(),
            token: "secret".to_string(),
            dialect: Dialect::OpenAi,
            enabled: true,
            timeout: Duration::from_secs(30),
        }
    }

    fn rule(id: &str, request_model: &str, provider_id: &str) -> Rule {
        Rule::new(
            RuleId(id.into()),
            request_model.into(),
            None,
            Dialect::OpenAi,
            vec![Service::new(ProviderId(provider_id.into()), "m".into(), 1, 60)],
            TacticSpec::Random,
        )
    }

    #[test]
    fn resolves_by_request_model() {
        let providers = ProviderRegistry::new(vec![provider("p1")]);
        let resolver = RuleResolver::load(&providers, vec![rule("r1", "gpt-4", "p1")]).unwrap();
        assert!(resolver.resolve("gpt-4").is_some());
        assert!(resolver.resolve("unknown").is_none());
    }

    #[test]
    fn rejects_duplicate_active_request_model() {
        let providers = ProviderRegistry::new(vec![provider("p1")]);
        let err = RuleResolver::load(
            &providers,
            vec![rule("r1", "gpt-4", "p1"), rule("r2", "gpt-4", "p1")],
        )
        .unwrap_err();
        assert!(matches!(err, ResolverError::DuplicateRequestModel(_)));
    }

    #[test]
    fn rejects_rule_referencing_unknown_provider() {
        let providers = ProviderRegistry::new(vec![provider("p1")]);
        let err = RuleResolver::load(&providers, vec![rule("r1", "gpt-4", "ghost")]).unwrap_err();
        assert!(matches!(err, ResolverError::UnknownProvider(_, _)));
    }

    #[test]
    fn reload_swaps_the_index_atomically() {
        let providers = ProviderRegistry::new(vec![provider("p1")]);
        let resolver = RuleResolver::load(&providers, vec![rule("r1", "gpt-4", "p1")]).unwrap();
        resolver
            .reload(&providers, vec![rule("r1", "claude-3", "p1")])
            .unwrap();
        assert!(resolver.resolve("gpt-4").is_none());
        assert!(resolver.resolve("claude-3").is_some());
    }

    #[test]
    fn upsert_then_delete() {
        let providers = ProviderRegistry::new(vec![provider("p1")]);
        let resolver = RuleResolver::new();
        resolver
            .upsert(&providers, rule("r1", "gpt-4", "p1"))
            .unwrap();
        assert!(resolver.resolve("gpt-4").is_some());
        resolver.delete(&providers, &RuleId("r1".into())).unwrap();
        assert!(resolver.resolve("gpt-4").is_none());
    }
}
