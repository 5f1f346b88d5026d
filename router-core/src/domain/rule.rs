use crate::domain::provider::Dialect;
use crate::domain::service::{Service, ServiceId};
use std::fmt::{Display, Formatter};
use std::sync::Mutex;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize)]
pub struct RuleId(pub String);

impl Display for RuleId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The intended inbound dialect for a Rule.
pub type Scenario = Dialect;

/// Tagged-variant routing tactic, replacing an ad-hoc `(tactic, params)` pair (spec §9).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(tag = "tactic", rename_all = "snake_case")]
pub enum TacticSpec {
    RoundRobin { request_threshold: u32 },
    Random,
    TokenBased { token_threshold: u64 },
    Hybrid {
        request_threshold: u32,
        token_threshold: u64,
    },
}

impl TacticSpec {
    /// Validates tactic parameters against the tactic type (spec §3 Rule invariants).
    pub fn validate(&self) -> Result<(), String> {
        match self {
            TacticSpec::RoundRobin { request_threshold } if *request_threshold == 0 => {
                Err("round_robin.request_threshold must be >= 1".to_string())
            }
            TacticSpec::Hybrid {
                request_threshold, ..
            } if *request_threshold == 0 => Err("hybrid.request_threshold must be >= 1".to_string()),
            _ => Ok(()),
        }
    }
}

/// A routing policy: maps a request-model string to an ordered set of Services.
#[derive(Debug)]
pub struct Rule {
    pub id: RuleId,
    pub request_model: String,
    pub response_model: Option<String>,
    pub scenario: Scenario,
    pub services: Vec<Service>,
    pub tactic: TacticSpec,
    pub active: bool,

    /// Sticky tactics (RoundRobin, Hybrid) keep the last pick here (spec §4.6).
    current_service_id: Mutex<Option<ServiceId>>,
}

impl Rule {
    pub fn new(
        id: RuleId,
        request_model: String,
        response_model: Option<String>,
        scenario: Scenario,
        services: Vec<Service>,
        tactic: TacticSpec,
    ) -> Self {
        Self {
            id,
            request_model,
            response_model,
            scenario,
            services,
            tactic,
            active: true,
            current_service_id: Mutex::new(None),
        }
    }

    /// Enforces the §4.5 Rule invariants without mutating anything.
    pub fn validate(&self) -> Result<(), String> {
        if self.services.is_empty() {
            return Err(format!("rule {} has no services", self.id));
        }
        if !self.services.iter().any(|s| s.active) {
            return Err(format!("rule {} has no active services", self.id));
        }
        self.tactic.validate()?;
        Ok(())
    }

    pub fn current_service_id(&self) -> Option<ServiceId> {
        self.current_service_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_current_service_id(&self, id: ServiceId) {
        *self.current_service_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(id);
    }

    pub fn service(&self, id: &ServiceId) -> Option<&Service> {
        self.services.iter().find(|s| &s.id() == id)
    }
}
