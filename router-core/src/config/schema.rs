//! TOML wire schema for the router's config file (`[server]`, `[[providers]]`,
//! `[[rules]]`) and the conversion into the runtime domain types.

use crate::domain::provider::{Dialect, Provider, ProviderId};
use crate::domain::rule::{Rule, RuleId, TacticSpec};
use crate::domain::service::Service;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct RawConfig {
    pub server: ServerSpec,
    #[serde(default)]
    pub listeners: Vec<ListenerSpec>,
    #[serde(default)]
    pub providers: Vec<ProviderSpec>,
    #[serde(default)]
    pub rules: Vec<RuleSpec>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerSpec {
    #[serde(default = "default_pid_file")]
    pub pid_file: String,
    /// Bearer token data-plane callers present to route a completion request.
    pub model_token: String,
    /// Bearer token the admin surface requires, distinct from `model_token`.
    pub admin_token: String,
    /// When false, a Rule whose `scenario` differs from the inbound dialect
    /// fails fast with `AdaptationDisabled` instead of being translated.
    #[serde(default = "default_true")]
    pub adapter_enabled: bool,
}

fn default_pid_file() -> String {
    String::new()
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerSpec {
    pub addr: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSpec {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub base_url: String,
    pub token: String,
    pub dialect: Dialect,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    Provider::DEFAULT_TIMEOUT.as_secs()
}

impl From<ProviderSpec> for Provider {
    fn from(spec: ProviderSpec) -> Self {
        Provider {
            display_name: spec.display_name.clone().unwrap_or_else(|| spec.id.clone()),
            id: ProviderId(spec.id),
            base_url: spec.base_url,
            token: spec.token,
            dialect: spec.dialect,
            enabled: spec.enabled,
            timeout: Duration::from_secs(spec.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSpec {
    pub provider_id: String,
    pub model: String,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_window_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    pub id: String,
    pub request_model: String,
    #[serde(default)]
    pub response_model: Option<String>,
    pub scenario: Dialect,
    pub tactic: TacticSpec,
    pub services: Vec<ServiceSpec>,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl From<RuleSpec> for Rule {
    fn from(spec: RuleSpec) -> Self {
        let services = spec
            .services
            .into_iter()
            .map(|s| {
                let mut service = Service::new(
                    ProviderId(s.provider_id),
                    s.model,
                    s.weight,
                    s.window_seconds,
                );
                service.active = s.active;
                service
            })
            .collect();

        let mut rule = Rule::new(
            RuleId(spec.id),
            spec.request_model,
            spec.response_model,
            spec.scenario,
            services,
            spec.tactic,
        );
        rule.active = spec.active;
        rule
    }
}
