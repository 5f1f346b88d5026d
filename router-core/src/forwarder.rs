//! Forwarder: makes the actual outbound call to a provider. Decoupled from
//! Pingora's own upstream connection machinery so Ingress can stay a
//! terminal gateway and the adapter can work against the plain bytes of the
//! response.

use crate::domain::provider::{Dialect, Provider};
use crate::health::monitor::ErrorKind;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("failed to build request: {0}")]
    Build(String),
}

/// What happened on one call to a provider, reduced to what the Selector's
/// Health Filter and usage accountant need. The HTTP response itself (body,
/// headers) is returned alongside on success.
#[derive(Debug, Clone, Copy)]
pub enum CallOutcome {
    Success,
    RateLimited,
    Error(ErrorKind),
}

pub struct ForwardResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub outcome: CallOutcome,
}

/// A provider response whose body is a byte stream rather than a single
/// buffer, for the streaming (SSE) path.
pub struct ForwardStream {
    pub status: StatusCode,
    /// `None` when the request never reached the upstream at all (connect
    /// failure, timeout before headers).
    pub response: Option<reqwest::Response>,
    pub outcome: CallOutcome,
}

pub struct Forwarder {
    client: Client,
}

impl Forwarder {
    pub fn new() -> Self {
        // Per-request timeouts are applied per call below since they vary by
        // provider and by streaming/non-streaming; the client itself carries
        // no default timeout.
        Self {
            client: Client::builder()
                .build()
                .expect("reqwest client building with no custom TLS config cannot fail"),
        }
    }

    fn endpoint(provider: &Provider) -> &'static str {
        match provider.dialect {
            Dialect::OpenAi => "/v1/chat/completions",
            Dialect::Anthropic => "/v1/messages",
        }
    }

    fn authorize(provider: &Provider, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match provider.dialect {
            Dialect::OpenAi => builder.bearer_auth(&provider.token),
            Dialect::Anthropic => builder
                .header("x-api-key", &provider.token)
                .header("anthropic-version", "2023-06-01"),
        }
    }

    fn url(provider: &Provider) -> String {
        format!(
            "{}{}",
            provider.base_url.trim_end_matches('/'),
            Self::endpoint(provider)
        )
    }

    /// Sends a non-streaming request, buffering the whole response body.
    pub async fn send(&self, provider: &Provider, body: Vec<u8>) -> ForwardResponse {
        let timeout = if provider.timeout.is_zero() {
            Provider::DEFAULT_TIMEOUT
        } else {
            provider.timeout
        };

        let request = Self::authorize(self.client.post(Self::url(provider)))
            .header("content-type", "application/json")
            .timeout(timeout)
            .body(body);

        match request.send().await {
            Ok(resp) => self.classify_response(resp).await,
            Err(err) => ForwardResponse {
                status: StatusCode::BAD_GATEWAY,
                body: Bytes::new(),
                outcome: CallOutcome::Error(classify_reqwest_error(&err)),
            },
        }
    }

    /// Sends a streaming request. Only the connect + response-headers phase
    /// is bounded by the provider timeout; the body stream itself is left
    /// open for as long as the upstream keeps sending.
    pub async fn send_streaming(&self, provider: &Provider, body: Vec<u8>) -> ForwardStream {
        let timeout = if provider.timeout.is_zero() {
            Provider::DEFAULT_TIMEOUT
        } else {
            provider.timeout
        };

        let request = Self::authorize(self.client.post(Self::url(provider)))
            .header("content-type", "application/json")
            .header("accept", "text/event-stream")
            .timeout(timeout)
            .body(body);

        match request.send().await {
            Ok(resp) => {
                let status = resp.status();
                let outcome = if status == StatusCode::TOO_MANY_REQUESTS {
                    CallOutcome::RateLimited
                } else if status.is_server_error() {
                    CallOutcome::Error(ErrorKind::Http5xx(status.as_u16()))
                } else {
                    CallOutcome::Success
                };
                ForwardStream {
                    status,
                    response: Some(resp),
                    outcome,
                }
            }
            Err(err) => {
                warn!(provider = %provider.id, error = %err, "streaming request failed before headers arrived");
                ForwardStream {
                    status: StatusCode::BAD_GATEWAY,
                    response: None,
                    outcome: CallOutcome::Error(classify_reqwest_error(&err)),
                }
            }
        }
    }

    async fn classify_response(&self, resp: reqwest::Response) -> ForwardResponse {
        let status = resp.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = resp.bytes().await.unwrap_or_default();
            return ForwardResponse {
                status,
                body,
                outcome: CallOutcome::RateLimited,
            };
        }
        if status.is_server_error() {
            let body = resp.bytes().await.unwrap_or_default();
            return ForwardResponse {
                status,
                body,
                outcome: CallOutcome::Error(ErrorKind::Http5xx(status.as_u16())),
            };
        }

        match resp.bytes().await {
            Ok(body) => ForwardResponse {
                status,
                body,
                outcome: CallOutcome::Success,
            },
            Err(_) => ForwardResponse {
                status,
                body: Bytes::new(),
                outcome: CallOutcome::Error(ErrorKind::ParseFailure),
            },
        }
    }
}

impl Default for Forwarder {
    fn default() -> Self {
        Self::new()
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else if err.is_connect() {
        ErrorKind::Connect
    } else {
        ErrorKind::Transport
    }
}

/// Extracts `(input_tokens, output_tokens)` from a provider's response body.
/// Never estimates when usage is absent; callers should log and move on.
pub fn extract_usage(dialect: Dialect, body: &[u8]) -> Option<(u64, u64)> {
    crate::adapter::extract_usage(dialect, body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_picks_the_right_path_per_dialect() {
        let mut provider = test_provider(Dialect::OpenAi);
        assert_eq!(Forwarder::endpoint(&provider), "/v1/chat/completions");
        provider.dialect = Dialect::Anthropic;
        assert_eq!(Forwarder::endpoint(&provider), "/v1/messages");
    }

    #[test]
    fn url_joins_base_and_endpoint_without_double_slash() {
        let mut provider = test_provider(Dialect::OpenAi);
        provider.base_url = "https://api.example.test/".to_string();
        assert_eq!(Forwarder::url(&provider), "https://api.example.test/v1/chat/completions");
    }

    fn test_provider(dialect: Dialect) -> Provider {
        Provider {
            id: crate::domain::provider::ProviderId("p1".into()),
            display_name: "p1".into(),
            base_url: "https://api.example.test".into(),
            token: "secret".into(),
            dialect,
            enabled: true,
            timeout: Duration::from_secs(30),
        }
    }
}
