use crate::domain::provider::ProviderId;
use crate::stats::Stats;
use std::fmt::{Display, Formatter};

/// `providerID:model`, used as the stats and health key.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize)]
pub struct ServiceId(pub String);

impl ServiceId {
    pub fn new(provider: &ProviderId, model: &str) -> Self {
        ServiceId(format!("{}:{}", provider.0, model))
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One usable `(provider, upstream-model)` endpoint inside a Rule.
#[derive(Debug)]
pub struct Service {
    pub provider_id: ProviderId,
    pub model: String,
    pub weight: u32,
    pub active: bool,
    pub window_seconds: u64,
    pub stats: Stats,
}

impl Service {
    pub fn new(provider_id: ProviderId, model: String, weight: u32, window_seconds: u64) -> Self {
        Self {
            provider_id,
            model,
            weight: weight.max(1),
            active: true,
            window_seconds,
            stats: Stats::new(window_seconds),
        }
    }

    pub fn id(&self) -> ServiceId {
        ServiceId::new(&self.provider_id, &self.model)
    }
}
