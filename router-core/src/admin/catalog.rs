//! Provider→model catalog as a standalone admin-managed surface. Providers
//! carry no model list of their own (only `Rule.services[].model` does), so
//! `GET /provider-models` merges this catalog with whatever models are
//! actually in use by active Rules.

use crate::domain::provider::ProviderId;
use dashmap::DashMap;

#[derive(Debug, Default)]
pub struct ProviderModelsCatalog {
    models: DashMap<ProviderId, Vec<String>>,
}

impl ProviderModelsCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, provider_id: ProviderId, models: Vec<String>) {
        self.models.insert(provider_id, models);
    }

    pub fn get(&self, provider_id: &ProviderId) -> Vec<String> {
        self.models
            .get(provider_id)
            .map(|v| v.clone())
            .unwrap_or_default()
    }

    pub fn all(&self) -> Vec<(ProviderId, Vec<String>)> {
        self.models
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let catalog = ProviderModelsCatalog::new();
        let id = ProviderId("p1".into());
        catalog.set(id.clone(), vec!["gpt-4o".into()]);
        assert_eq!(catalog.get(&id), vec!["gpt-4o".to_string()]);
    }

    #[test]
    fn unknown_provider_yields_empty() {
        let catalog = ProviderModelsCatalog::new();
        assert!(catalog.get(&ProviderId("ghost".into())).is_empty());
    }
}
