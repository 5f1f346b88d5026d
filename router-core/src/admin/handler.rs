//! Admin JSON surface: rules CRUD, load-balancer introspection, provider
//! catalog. Pure request/response logic, independent of how the bytes
//! arrived — the gateway wires this to Pingora.

use crate::admin::catalog::ProviderModelsCatalog;
use crate::domain::provider::ProviderId;
use crate::domain::rule::{Rule, RuleId, TacticSpec};
use crate::domain::service::ServiceId;
use crate::providers::ProviderRegistry;
use crate::resolver::{ResolverError, RuleResolver};
use crate::selector::Selector;
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub struct AdminHandler {
    providers: Arc<ProviderRegistry>,
    resolver: Arc<RuleResolver>,
    selector: Arc<Selector>,
    catalog: Arc<ProviderModelsCatalog>,
}

#[derive(Debug)]
pub enum AdminRoute {
    ListRules,
    GetRule(String),
    UpsertRule(String),
    DeleteRule(String),
    RuleSummary(String),
    CurrentService(String),
    SetTactic(String),
    RuleHealth(String),
    ResetServiceHealth(String),
    ListProviders,
    ListProviderModels,
    SetProviderModels(String),
    NotFound,
}

/// Matches `method` + `path` against the fixed admin route table.
pub fn route(method: &str, path: &str) -> AdminRoute {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match (method, segments.as_slice()) {
        ("GET", ["rules"]) => AdminRoute::ListRules,
        ("GET", ["rule", id]) => AdminRoute::GetRule((*id).to_string()),
        ("POST", ["rule", id]) => AdminRoute::UpsertRule((*id).to_string()),
        ("DELETE", ["rule", id]) => AdminRoute::DeleteRule((*id).to_string()),
        ("GET", ["load-balancer", "rules", id, "summary"]) => {
            AdminRoute::RuleSummary((*id).to_string())
        }
        ("GET", ["load-balancer", "rules", id, "current-service"]) => {
            AdminRoute::CurrentService((*id).to_string())
        }
        ("PUT", ["load-balancer", "rules", id, "tactic"]) => {
            AdminRoute::SetTactic((*id).to_string())
        }
        ("GET", ["load-balancer", "rules", id, "health"]) => {
            AdminRoute::RuleHealth((*id).to_string())
        }
        ("POST", ["load-balancer", "services", id, "health", "reset"]) => {
            AdminRoute::ResetServiceHealth((*id).to_string())
        }
        ("GET", ["providers"]) => AdminRoute::ListProviders,
        ("GET", ["provider-models"]) => AdminRoute::ListProviderModels,
        ("POST", ["provider-models", id]) => AdminRoute::SetProviderModels((*id).to_string()),
        _ => AdminRoute::NotFound,
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> (StatusCode, Vec<u8>) {
    let body = serde_json::to_vec(&ErrorBody {
        error: message.into(),
    })
    .unwrap_or_default();
    (status, body)
}

fn json_response(status: StatusCode, value: impl Serialize) -> (StatusCode, Vec<u8>) {
    match serde_json::to_vec(&value) {
        Ok(body) => (status, body),
        Err(_) => error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode response"),
    }
}

#[derive(Serialize)]
struct RuleView {
    id: String,
    request_model: String,
    response_model: Option<String>,
    scenario: crate::domain::provider::Dialect,
    active: bool,
    tactic: TacticSpec,
    services: Vec<ServiceView>,
}

#[derive(Serialize)]
struct ServiceView {
    id: String,
    provider_id: String,
    model: String,
    weight: u32,
    active: bool,
    stats: crate::stats::StatsSnapshot,
    active_requests: u32,
}

#[derive(Deserialize)]
struct UpsertRuleBody {
    request_model: String,
    #[serde(default)]
    response_model: Option<String>,
    scenario: crate::domain::provider::Dialect,
    tactic: TacticSpec,
    services: Vec<UpsertServiceBody>,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct UpsertServiceBody {
    provider_id: String,
    model: String,
    #[serde(default = "default_weight")]
    weight: u32,
    #[serde(default = "default_window_seconds")]
    window_seconds: u64,
    #[serde(default = "default_true")]
    active: bool,
}

fn default_weight() -> u32 {
    1
}

fn default_window_seconds() -> u64 {
    300
}

#[derive(Deserialize)]
struct ProviderModelsBody {
    models: Vec<String>,
}

#[derive(Serialize)]
struct HealthView {
    healthy: bool,
    consecutive_errors: u32,
    rate_limited: bool,
    circuit_state: crate::health::circuit::CircuitState,
    checked_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Serialize)]
struct ProviderView {
    id: String,
    display_name: String,
    base_url: String,
    dialect: crate::domain::provider::Dialect,
    enabled: bool,
}

impl AdminHandler {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        resolver: Arc<RuleResolver>,
        selector: Arc<Selector>,
        catalog: Arc<ProviderModelsCatalog>,
    ) -> Self {
        Self {
            providers,
            resolver,
            selector,
            catalog,
        }
    }

    fn rule_view(&self, rule: &Rule) -> RuleView {
        RuleView {
            id: rule.id.0.clone(),
            request_model: rule.request_model.clone(),
            response_model: rule.response_model.clone(),
            scenario: rule.scenario,
            active: rule.active,
            tactic: rule.tactic.clone(),
            services: rule
                .services
                .iter()
                .map(|s| {
                    let id = s.id();
                    ServiceView {
                        active_requests: self.selector.active_requests(&id),
                        id: id.0,
                        provider_id: s.provider_id.0.clone(),
                        model: s.model.clone(),
                        weight: s.weight,
                        active: s.active,
                        stats: s.stats.snapshot(),
                    }
                })
                .collect(),
        }
    }

    pub fn handle(&self, method: &str, path: &str, body: &[u8]) -> (StatusCode, Vec<u8>) {
        match route(method, path) {
            AdminRoute::ListRules => {
                let rules = self.resolver.all();
                let views: Vec<RuleView> = rules.iter().map(|r| self.rule_view(r)).collect();
                json_response(StatusCode::OK, views)
            }
            AdminRoute::GetRule(id) => match self.resolver.get(&RuleId(id)) {
                Some(rule) => json_response(StatusCode::OK, self.rule_view(&rule)),
                None => error_response(StatusCode::NOT_FOUND, "rule not found"),
            },
            AdminRoute::UpsertRule(id) => self.upsert_rule(id, body),
            AdminRoute::DeleteRule(id) => {
                match self.resolver.delete(&self.providers, &RuleId(id)) {
                    Ok(()) => json_response(StatusCode::OK, serde_json::json!({"deleted": true})),
                    Err(err) => resolver_error_response(err),
                }
            }
            AdminRoute::RuleSummary(id) => match self.resolver.get(&RuleId(id)) {
                Some(rule) => json_response(StatusCode::OK, self.rule_view(&rule)),
                None => error_response(StatusCode::NOT_FOUND, "rule not found"),
            },
            AdminRoute::CurrentService(id) => match self.resolver.get(&RuleId(id)) {
                Some(rule) => json_response(
                    StatusCode::OK,
                    serde_json::json!({ "current_service": rule.current_service_id().map(|s| s.0) }),
                ),
                None => error_response(StatusCode::NOT_FOUND, "rule not found"),
            },
            AdminRoute::SetTactic(id) => self.set_tactic(id, body),
            AdminRoute::RuleHealth(id) => self.rule_health(id),
            AdminRoute::ResetServiceHealth(id) => {
                self.selector.health_filter().reset(&ServiceId(id));
                json_response(StatusCode::OK, serde_json::json!({"reset": true}))
            }
            AdminRoute::ListProviders => {
                let views: Vec<ProviderView> = self
                    .providers
                    .all()
                    .iter()
                    .map(|p| ProviderView {
                        id: p.id.0.clone(),
                        display_name: p.display_name.clone(),
                        base_url: p.base_url.clone(),
                        dialect: p.dialect,
                        enabled: p.enabled,
                    })
                    .collect();
                json_response(StatusCode::OK, views)
            }
            AdminRoute::ListProviderModels => {
                let mut merged = self.catalog.all();
                for rule in self.resolver.all() {
                    for service in &rule.services {
                        let entry = merged
                            .iter_mut()
                            .find(|(id, _)| id == &service.provider_id);
                        match entry {
                            Some((_, models)) if !models.contains(&service.model) => {
                                models.push(service.model.clone());
                            }
                            None => merged.push((service.provider_id.clone(), vec![service.model.clone()])),
                            _ => {}
                        }
                    }
                }
                let body: Vec<_> = merged
                    .into_iter()
                    .map(|(id, models)| serde_json::json!({"provider_id": id.0, "models": models}))
                    .collect();
                json_response(StatusCode::OK, body)
            }
            AdminRoute::SetProviderModels(id) => {
                let provider_id = ProviderId(id);
                if !self.providers.contains(&provider_id) {
                    return error_response(StatusCode::NOT_FOUND, "unknown provider");
                }
                match serde_json::from_slice::<ProviderModelsBody>(body) {
                    Ok(parsed) => {
                        self.catalog.set(provider_id, parsed.models);
                        json_response(StatusCode::OK, serde_json::json!({"updated": true}))
                    }
                    Err(_) => error_response(StatusCode::BAD_REQUEST, "invalid request body"),
                }
            }
            AdminRoute::NotFound => error_response(StatusCode::NOT_FOUND, "unknown admin endpoint"),
        }
    }

    fn upsert_rule(&self, id: String, body: &[u8]) -> (StatusCode, Vec<u8>) {
        let parsed: UpsertRuleBody = match serde_json::from_slice(body) {
            Ok(p) => p,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid request body"),
        };

        let services = parsed
            .services
            .into_iter()
            .map(|s| {
                let mut service = crate::domain::service::Service::new(
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
            RuleId(id.clone()),
            parsed.request_model,
            parsed.response_model,
            parsed.scenario,
            services,
            parsed.tactic,
        );
        rule.active = parsed.active;

        match self.resolver.upsert(&self.providers, rule) {
            Ok(()) => {
                self.selector.invalidate_tactic(&RuleId(id.clone()));
                match self.resolver.get(&RuleId(id)) {
                    Some(rule) => json_response(StatusCode::OK, self.rule_view(&rule)),
                    None => error_response(StatusCode::INTERNAL_SERVER_ERROR, "rule vanished after upsert"),
                }
            }
            Err(err) => resolver_error_response(err),
        }
    }

    fn set_tactic(&self, id: String, body: &[u8]) -> (StatusCode, Vec<u8>) {
        let tactic: TacticSpec = match serde_json::from_slice(body) {
            Ok(t) => t,
            Err(_) => return error_response(StatusCode::BAD_REQUEST, "invalid tactic body"),
        };
        if let Err(msg) = tactic.validate() {
            return error_response(StatusCode::BAD_REQUEST, msg);
        }

        let rule_id = RuleId(id);
        let Some(existing) = self.resolver.get(&rule_id) else {
            return error_response(StatusCode::NOT_FOUND, "rule not found");
        };

        let services = existing
            .services
            .iter()
            .map(|s| {
                let mut service = crate::domain::service::Service::new(
                    s.provider_id.clone(),
                    s.model.clone(),
                    s.weight,
                    s.window_seconds,
                );
                service.active = s.active;
                service
            })
            .collect();

        let mut rule = Rule::new(
            existing.id.clone(),
            existing.request_model.clone(),
            existing.response_model.clone(),
            existing.scenario,
            services,
            tactic,
        );
        rule.active = existing.active;

        match self.resolver.upsert(&self.providers, rule) {
            Ok(()) => {
                self.selector.invalidate_tactic(&rule_id);
                json_response(StatusCode::OK, serde_json::json!({"updated": true}))
            }
            Err(err) => resolver_error_response(err),
        }
    }

    fn rule_health(&self, id: String) -> (StatusCode, Vec<u8>) {
        let Some(rule) = self.resolver.get(&RuleId(id)) else {
            return error_response(StatusCode::NOT_FOUND, "rule not found");
        };

        let health = self.selector.health_filter();
        let views: std::collections::HashMap<String, HealthView> = rule
            .services
            .iter()
            .map(|s| {
                let service_id = s.id();
                let status = health.health_status(&service_id);
                let view = HealthView {
                    healthy: status.healthy,
                    consecutive_errors: status.consecutive_errors,
                    rate_limited: status.rate_limited,
                    circuit_state: health.circuit_state(&service_id),
                    checked_at: chrono::Utc::now(),
                };
                (service_id.0, view)
            })
            .collect();
        json_response(StatusCode::OK, views)
    }
}

fn resolver_error_response(err: ResolverError) -> (StatusCode, Vec<u8>) {
    error_response(StatusCode::BAD_REQUEST, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::provider::{Dialect, Provider};
    use crate::health::circuit::CircuitBreakerParams;
    use crate::health::filter::HealthFilter;
    use crate::health::monitor::HealthParams;
    use std::time::Duration;

    fn handler() -> AdminHandler {
        let providers = Arc::new(ProviderRegistry::new(vec![Provider {
            id: ProviderId("p1".into()),
            display_name: "p1".into(),
            base_url: "https://example.test".into(),
            token: "secret".into(),
            dialect: Dialect::OpenAi,
            enabled: true,
            timeout: Duration::from_secs(30),
        }]));
        let resolver = Arc::new(RuleResolver::new());
        let selector = Arc::new(Selector::new(Arc::new(HealthFilter::new(
            HealthParams::default(),
            CircuitBreakerParams::default(),
        ))));
        AdminHandler::new(providers, resolver, selector, Arc::new(ProviderModelsCatalog::new()))
    }

    #[test]
    fn upsert_then_list_then_delete_rule() {
        let h = handler();
        let body = serde_json::json!({
            "request_model": "gpt-4",
            "scenario": "open_ai",
            "tactic": {"tactic": "random"},
            "services": [{"provider_id": "p1", "model": "gpt-4o"}]
        });
        let (status, _) = h.handle("POST", "/rule/r1", body.to_string().as_bytes());
        assert_eq!(status, StatusCode::OK);

        let (status, body) = h.handle("GET", "/rules", b"");
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 1);

        let (status, _) = h.handle("DELETE", "/rule/r1", b"");
        assert_eq!(status, StatusCode::OK);
        assert!(h.resolver.get(&RuleId("r1".into())).is_none());
    }

    #[test]
    fn unknown_route_is_404() {
        let h = handler();
        let (status, _) = h.handle("GET", "/nonsense", b"");
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn set_provider_models_then_list_merges_with_rule_services() {
        let h = handler();
        let (status, _) = h.handle(
            "POST",
            "/provider-models/p1",
            br#"{"models":["gpt-4o-mini"]}"#,
        );
        assert_eq!(status, StatusCode::OK);

        let (status, body) = h.handle("GET", "/provider-models", b"");
        assert_eq!(status, StatusCode::OK);
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let models = parsed[0]["models"].as_array().unwrap();
        assert!(models.iter().any(|m| m == "gpt-4o-mini"));
    }
}
