use thiserror::Error;

/// Raised by the Dialect Adapter on malformed request/response bodies or
/// unsupported shapes (spec §4.7, §7 "Parse failure").
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request is missing a required field: {0}")]
    MissingField(&'static str),
    #[error("unsupported content block or tool shape: {0}")]
    Unsupported(String),
}
