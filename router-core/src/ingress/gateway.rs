//! Terminal `ProxyHttp` gateway for the two data-plane routes. Unlike a
//! conventional proxy, Ingress never hands the connection to Pingora's own
//! upstream machinery — all real upstream I/O goes through the Forwarder so
//! the dialect adapter can work against plain bytes.

use crate::adapter::{self, sse::SseFrameReader, StreamTranslator};
use crate::domain::provider::Dialect;
use crate::forwarder::{CallOutcome, ForwardResponse, ForwardStream, Forwarder};
use crate::health::monitor::ErrorKind;
use crate::providers::ProviderRegistry;
use crate::resolver::RuleResolver;
use crate::selector::{Outcome, OutcomeGuard, Selector};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use http::{header, StatusCode};
use once_cell::sync::Lazy;
use pingora::prelude::{HttpPeer, ProxyHttp, Session};
use pingora::{Custom, Error};
use pingora_http::ResponseHeader;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Logged once, the first time a response's usage is unreadable — the
/// Accountant never estimates tokens, it just goes without (spec: no
/// estimation, just a warning).
static USAGE_MISSING_WARNED: Lazy<AtomicBool> = Lazy::new(|| AtomicBool::new(false));

fn warn_usage_missing_once(service: &crate::domain::service::ServiceId) {
    if !USAGE_MISSING_WARNED.swap(true, Ordering::Relaxed) {
        tracing::warn!(service = %service, "upstream response carried no usage block; token accounting for this call is skipped");
    }
}

pub struct IngressGateway {
    providers: Arc<ProviderRegistry>,
    resolver: Arc<RuleResolver>,
    selector: Arc<Selector>,
    forwarder: Arc<Forwarder>,
    model_token: String,
    adapter_enabled: bool,
}

impl IngressGateway {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        resolver: Arc<RuleResolver>,
        selector: Arc<Selector>,
        forwarder: Arc<Forwarder>,
        model_token: String,
        adapter_enabled: bool,
    ) -> Self {
        Self {
            providers,
            resolver,
            selector,
            forwarder,
            model_token,
            adapter_enabled,
        }
    }

    fn dialect_for_path(path: &str) -> Option<Dialect> {
        match path {
            "/openai/v1/chat/completions" => Some(Dialect::OpenAi),
            "/anthropic/v1/messages" => Some(Dialect::Anthropic),
            _ => None,
        }
    }

    fn is_authorized(&self, session: &Session) -> bool {
        let Some(value) = session.req_header().headers.get(header::AUTHORIZATION) else {
            return false;
        };
        let Ok(value) = value.to_str() else {
            return false;
        };
        value
            .strip_prefix("Bearer ")
            .map(|token| token == self.model_token)
            .unwrap_or(false)
    }

    async fn read_body(session: &mut Session) -> pingora::Result<Bytes> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = session.read_request_body().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf.freeze())
    }

    async fn write_json(
        session: &mut Session,
        status: StatusCode,
        body: Vec<u8>,
    ) -> pingora::Result<()> {
        let mut resp = ResponseHeader::build(status, None)?;
        resp.insert_header(header::CONTENT_TYPE, "application/json")?;
        resp.insert_header(header::CONTENT_LENGTH, body.len().to_string())?;
        session.write_response_header(Box::new(resp), false).await?;
        session.write_response_body(Some(body.into()), true).await?;
        Ok(())
    }

    async fn write_error(
        session: &mut Session,
        dialect: Dialect,
        status: StatusCode,
        message: &str,
        kind: &str,
    ) -> pingora::Result<()> {
        let body = adapter::translate_error(dialect, message, kind);
        Self::write_json(session, status, body).await
    }
}

#[async_trait]
impl ProxyHttp for IngressGateway {
    type CTX = ();

    fn new_ctx(&self) -> Self::CTX {}

    async fn upstream_peer(
        &self,
        _session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> pingora::Result<Box<HttpPeer>> {
        Err(Error::new(Custom("IngressGateway never proxies upstream")))
    }

    async fn request_filter(
        &self,
        session: &mut Session,
        _ctx: &mut Self::CTX,
    ) -> pingora::Result<bool> {
        let path = session.req_header().uri.path().to_owned();
        let Some(dialect_in) = Self::dialect_for_path(&path) else {
            Self::write_json(
                session,
                StatusCode::NOT_FOUND,
                br#"{"error":"unknown route"}"#.to_vec(),
            )
            .await?;
            return Ok(true);
        };

        if session.req_header().method != http::Method::POST {
            Self::write_error(
                session,
                dialect_in,
                StatusCode::METHOD_NOT_ALLOWED,
                "only POST is supported on this route",
                "invalid_request_error",
            )
            .await?;
            return Ok(true);
        }

        if !self.is_authorized(session) {
            Self::write_error(
                session,
                dialect_in,
                StatusCode::UNAUTHORIZED,
                "missing or invalid bearer token",
                "authentication_error",
            )
            .await?;
            return Ok(true);
        }

        let body = Self::read_body(session).await?;

        let parsed: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(_) => {
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::BAD_REQUEST,
                    "request body is not valid JSON",
                    "invalid_request_error",
                )
                .await?;
                return Ok(true);
            }
        };

        let Some(request_model) = parsed.get("model").and_then(Value::as_str) else {
            Self::write_error(
                session,
                dialect_in,
                StatusCode::BAD_REQUEST,
                "request is missing a `model` field",
                "invalid_request_error",
            )
            .await?;
            return Ok(true);
        };

        let Some(rule) = self.resolver.resolve(request_model) else {
            Self::write_error(
                session,
                dialect_in,
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown model",
                "invalid_request_error",
            )
            .await?;
            return Ok(true);
        };
        if !rule.active {
            Self::write_error(
                session,
                dialect_in,
                StatusCode::UNPROCESSABLE_ENTITY,
                "unknown model",
                "invalid_request_error",
            )
            .await?;
            return Ok(true);
        }

        if rule.scenario != dialect_in && !self.adapter_enabled {
            Self::write_error(
                session,
                dialect_in,
                StatusCode::UNPROCESSABLE_ENTITY,
                &format!(
                    "this model is configured for the {} dialect and cross-dialect adaptation is disabled",
                    rule.scenario
                ),
                "invalid_request_error",
            )
            .await?;
            return Ok(true);
        }

        let service = match self.selector.select_service(&rule) {
            Ok(service) => service,
            Err(crate::selector::SelectError::NoHealthyServices) => {
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no healthy services available for this model",
                    "api_error",
                )
                .await?;
                return Ok(true);
            }
            Err(err) => {
                tracing::error!(error = %err, rule = %rule.id, "rule failed selection validation");
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal routing error",
                    "api_error",
                )
                .await?;
                return Ok(true);
            }
        };

        let Some(provider) = self.providers.get(&service.provider_id) else {
            tracing::error!(provider = %service.provider_id, "service referenced a provider no longer in the registry");
            Self::write_error(
                session,
                dialect_in,
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal routing error",
                "api_error",
            )
            .await?;
            return Ok(true);
        };

        let translated_request = match adapter::translate_request(dialect_in, provider.dialect, &body) {
            Ok(b) => b,
            Err(err) => {
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::BAD_REQUEST,
                    &err.to_string(),
                    "invalid_request_error",
                )
                .await?;
                return Ok(true);
            }
        };

        let streaming = parsed.get("stream").and_then(Value::as_bool).unwrap_or(false);
        let service_id = service.id();
        let model = service.model.clone();
        let guard = OutcomeGuard::new(&self.selector, service_id.clone());

        if streaming {
            self.handle_streaming(
                session,
                dialect_in,
                provider.as_ref(),
                translated_request,
                &rule,
                &service_id,
                &model,
                guard,
            )
            .await
        } else {
            self.handle_non_streaming(
                session,
                dialect_in,
                provider.as_ref(),
                translated_request,
                &rule,
                &service_id,
                &model,
                guard,
            )
            .await
        }
    }
}

impl IngressGateway {
    #[allow(clippy::too_many_arguments)]
    async fn handle_non_streaming(
        &self,
        session: &mut Session,
        dialect_in: Dialect,
        provider: &crate::domain::provider::Provider,
        translated_request: Vec<u8>,
        rule: &crate::domain::rule::Rule,
        service_id: &crate::domain::service::ServiceId,
        model: &str,
        guard: OutcomeGuard<'_>,
    ) -> pingora::Result<bool> {
        let ForwardResponse {
            status,
            body,
            outcome,
        } = self.forwarder.send(provider, translated_request).await;

        match outcome {
            CallOutcome::RateLimited => {
                guard.complete(Outcome::RateLimited);
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::TOO_MANY_REQUESTS,
                    "upstream rate limit exceeded",
                    "rate_limit_error",
                )
                .await?;
                return Ok(true);
            }
            CallOutcome::Error(kind) => {
                guard.complete(Outcome::Error(kind));
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::BAD_GATEWAY,
                    "upstream request failed",
                    "api_error",
                )
                .await?;
                return Ok(true);
            }
            CallOutcome::Success => {}
        }

        let translated_response = match adapter::translate_response(
            provider.dialect,
            dialect_in,
            &body,
            &uuid::Uuid::new_v4().to_string(),
            rule.response_model.as_deref(),
        ) {
            Ok(b) => b,
            Err(err) => {
                guard.complete(Outcome::Error(ErrorKind::ParseFailure));
                tracing::warn!(error = %err, "failed to translate upstream response");
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::BAD_GATEWAY,
                    "failed to parse upstream response",
                    "api_error",
                )
                .await?;
                return Ok(true);
            }
        };

        match adapter::extract_usage(provider.dialect, &body) {
            Some((input_tokens, output_tokens)) => {
                if let Err(err) =
                    self.selector
                        .record_usage(rule, &provider.id, model, input_tokens, output_tokens)
                {
                    tracing::warn!(error = %err, "failed to record usage for a selected service");
                }
            }
            None => warn_usage_missing_once(service_id),
        }

        guard.complete(Outcome::Success);
        tracing::info!(
            event = "request_complete",
            rule = %rule.id,
            service = %service_id,
            status = status.as_u16(),
            streaming = false,
            "request complete"
        );
        Self::write_json(session, status, translated_response).await?;
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_streaming(
        &self,
        session: &mut Session,
        dialect_in: Dialect,
        provider: &crate::domain::provider::Provider,
        translated_request: Vec<u8>,
        rule: &crate::domain::rule::Rule,
        service_id: &crate::domain::service::ServiceId,
        model: &str,
        guard: OutcomeGuard<'_>,
    ) -> pingora::Result<bool> {
        let ForwardStream {
            status: _,
            response,
            outcome,
        } = self.forwarder.send_streaming(provider, translated_request).await;

        match outcome {
            CallOutcome::RateLimited => {
                guard.complete(Outcome::RateLimited);
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::TOO_MANY_REQUESTS,
                    "upstream rate limit exceeded",
                    "rate_limit_error",
                )
                .await?;
                return Ok(true);
            }
            CallOutcome::Error(kind) => {
                guard.complete(Outcome::Error(kind));
                Self::write_error(
                    session,
                    dialect_in,
                    StatusCode::BAD_GATEWAY,
                    "upstream request failed",
                    "api_error",
                )
                .await?;
                return Ok(true);
            }
            CallOutcome::Success => {}
        }

        let Some(upstream) = response else {
            guard.complete(Outcome::Error(ErrorKind::Transport));
            Self::write_error(
                session,
                dialect_in,
                StatusCode::BAD_GATEWAY,
                "upstream request failed",
                "api_error",
            )
            .await?;
            return Ok(true);
        };

        let mut resp = ResponseHeader::build(StatusCode::OK, None)?;
        resp.insert_header(header::CONTENT_TYPE, "text/event-stream")?;
        resp.insert_header(header::CACHE_CONTROL, "no-cache")?;
        session.write_response_header(Box::new(resp), false).await?;

        let mut translator = StreamTranslator::new(provider.dialect, dialect_in);
        let mut reader = SseFrameReader::new();
        let mut stream = upstream.bytes_stream();
        let mut saw_error = false;

        while let Some(next) = stream.next().await {
            let chunk = match next {
                Ok(bytes) => bytes,
                Err(err) => {
                    tracing::warn!(error = %err, "upstream stream read failed mid-response");
                    saw_error = true;
                    break;
                }
            };

            for frame in translator.feed(&mut reader, &chunk) {
                if session
                    .write_response_body(Some(Bytes::from(frame.into_bytes())), false)
                    .await
                    .is_err()
                {
                    saw_error = true;
                    break;
                }
            }

            if translator.is_terminated() {
                break;
            }
        }

        let _ = session.write_response_body(None, true).await;

        if saw_error {
            guard.complete(Outcome::Error(ErrorKind::Transport));
            return Ok(true);
        }

        match translator.usage() {
            Some((input_tokens, output_tokens)) => {
                if let Err(err) =
                    self.selector
                        .record_usage(rule, &provider.id, model, input_tokens, output_tokens)
                {
                    tracing::warn!(error = %err, "failed to record usage for a selected service");
                }
            }
            None => warn_usage_missing_once(service_id),
        }

        guard.complete(Outcome::Success);
        tracing::info!(
            event = "request_complete",
            rule = %rule.id,
            service = %service_id,
            status = 200,
            streaming = true,
            "request complete"
        );
        Ok(true)
    }
}
