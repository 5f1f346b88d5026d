//! Provider catalog: created/updated by config load, read as an immutable
//! snapshot at request time (spec §3 "Provider").

use crate::domain::provider::{Provider, ProviderId};
use arc_swap::ArcSwap;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: ArcSwap<HashMap<ProviderId, Arc<Provider>>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Provider>) -> Self {
        let map = providers
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();
        Self {
            providers: ArcSwap::from_pointee(map),
        }
    }

    pub fn get(&self, id: &ProviderId) -> Option<Arc<Provider>> {
        self.providers.load().get(id).cloned()
    }

    pub fn contains(&self, id: &ProviderId) -> bool {
        self.providers.load().contains_key(id)
    }

    pub fn all(&self) -> Vec<Arc<Provider>> {
        self.providers.load().values().cloned().collect()
    }

    /// Atomically replaces the whole catalog (config reload).
    pub fn reload(&self, providers: Vec<Provider>) {
        let map = providers
            .into_iter()
            .map(|p| (p.id.clone(), Arc::new(p)))
            .collect();
        self.providers.store(Arc::new(map));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::Dialect;
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

    #[test]
    fn looks_up_by_id() {
        let reg = ProviderRegistry::new(vec![provider("p1")]);
        assert!(reg.get(&ProviderId("p1".into())).is_some());
        assert!(reg.get(&ProviderId("missing".into())).is_none());
    }

    #[test]
    fn reload_swaps_the_whole_catalog_atomically() {
        let reg = ProviderRegistry::new(vec![provider("p1")]);
        reg.reload(vec![provider("p2")]);
        assert!(reg.get(&ProviderId("p1".into())).is_none());
        assert!(reg.get(&ProviderId("p2".into())).is_some());
    }
}
