use std::fmt::{Display, Formatter};
use std::time::Duration;

/// One of the two wire dialects the router understands, inbound or outbound.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    OpenAi,
    Anthropic,
}

impl Display for Dialect {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Dialect::OpenAi => write!(f, "openai"),
            Dialect::Anthropic => write!(f, "anthropic"),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, serde::Serialize)]
pub struct ProviderId(pub String);

impl Display for ProviderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named upstream, immutable at request time. Mutated only by config reload.
#[derive(Debug, Clone)]
pub struct Provider {
    pub id: ProviderId,
    pub display_name: String,
    pub base_url: String,
    pub token: String,
    pub dialect: Dialect,
    pub enabled: bool,
    pub timeout: Duration,
}

impl Provider {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
}
