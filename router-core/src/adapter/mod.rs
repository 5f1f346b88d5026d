//! Dialect Adapter: translates request/response bodies between the OpenAI
//! and Anthropic wire formats. A no-op when the inbound and outbound
//! dialects match.

pub mod anthropic;
pub mod error;
pub mod openai;
pub mod request;
pub mod response;
pub mod sse;

pub use error::AdapterError;

use crate::domain::provider::Dialect;
use serde_json::Value;
use sse::{AnthropicToOpenAiTranslator, OpenAiToAnthropicTranslator, SseFrame};

/// Default `max_tokens` injected into an Anthropic request when the inbound
/// OpenAI caller omitted one, since Anthropic requires the field.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Translates one non-streaming request body from `from` to `to`.
pub fn translate_request(from: Dialect, to: Dialect, body: &[u8]) -> Result<Vec<u8>, AdapterError> {
    if from == to {
        return Ok(body.to_vec());
    }
    match (from, to) {
        (Dialect::OpenAi, Dialect::Anthropic) => {
            let req: openai::ChatCompletionRequest = serde_json::from_slice(body)?;
            let translated = request::openai_to_anthropic(&req, DEFAULT_MAX_TOKENS)?;
            Ok(serde_json::to_vec(&translated)?)
        }
        (Dialect::Anthropic, Dialect::OpenAi) => {
            let req: anthropic::MessagesRequest = serde_json::from_slice(body)?;
            let translated = request::anthropic_to_openai(&req)?;
            Ok(serde_json::to_vec(&translated)?)
        }
        _ => unreachable!("only two dialects exist"),
    }
}

/// Translates one non-streaming response body from `from` to `to`.
///
/// `request_id_hint` backstops Anthropic responses that omit `id`.
/// `response_model` overrides the `model` field the caller sees, so it
/// always reflects the originally-requested model name rather than the
/// provider's own model identifier.
pub fn translate_response(
    from: Dialect,
    to: Dialect,
    body: &[u8],
    request_id_hint: &str,
    response_model: Option<&str>,
) -> Result<Vec<u8>, AdapterError> {
    if from == to {
        return Ok(body.to_vec());
    }
    match (from, to) {
        (Dialect::Anthropic, Dialect::OpenAi) => {
            let resp: anthropic::MessagesResponse = serde_json::from_slice(body)?;
            let mut translated = response::anthropic_to_openai(&resp, request_id_hint);
            if let Some(model) = response_model {
                translated.model = model.to_string();
            }
            Ok(serde_json::to_vec(&translated)?)
        }
        (Dialect::OpenAi, Dialect::Anthropic) => {
            let resp: openai::ChatCompletionResponse = serde_json::from_slice(body)?;
            let translated = response::openai_to_anthropic(&resp, response_model);
            Ok(serde_json::to_vec(&translated)?)
        }
        _ => unreachable!("only two dialects exist"),
    }
}

/// Translates the provider's error body into the inbound caller's dialect,
/// for the paths that never reach the adapter's streaming/non-streaming
/// translators (connect failures, timeouts, rate limits).
pub fn translate_error(to: Dialect, message: &str, kind: &str) -> Vec<u8> {
    match to {
        Dialect::OpenAi => {
            let envelope = openai::ErrorEnvelope::new(message, kind);
            serde_json::to_vec(&envelope).unwrap_or_default()
        }
        Dialect::Anthropic => {
            let envelope = anthropic::ErrorEnvelope::new(message, kind);
            serde_json::to_vec(&envelope).unwrap_or_default()
        }
    }
}

/// A bound streaming session translating one upstream SSE response into the
/// caller's dialect, one wire frame at a time. Holds no buffered response
/// body; each call to [`StreamTranslator::feed`] is O(frame size).
pub enum StreamTranslator {
    /// `from == to`: bytes pass through untouched.
    PassThrough,
    AnthropicToOpenAi(Box<AnthropicToOpenAiTranslator>),
    OpenAiToAnthropic(Box<OpenAiToAnthropicTranslator>),
}

impl StreamTranslator {
    pub fn new(from: Dialect, to: Dialect) -> Self {
        if from == to {
            return StreamTranslator::PassThrough;
        }
        match (from, to) {
            (Dialect::Anthropic, Dialect::OpenAi) => {
                StreamTranslator::AnthropicToOpenAi(Box::new(AnthropicToOpenAiTranslator::new()))
            }
            (Dialect::OpenAi, Dialect::Anthropic) => {
                StreamTranslator::OpenAiToAnthropic(Box::new(OpenAiToAnthropicTranslator::new()))
            }
            _ => unreachable!("only two dialects exist"),
        }
    }

    /// Feeds raw upstream bytes in, returns already-framed SSE text ready to
    /// write straight to the caller's connection.
    pub fn feed(&mut self, reader: &mut sse::SseFrameReader, chunk: &[u8]) -> Vec<String> {
        match self {
            StreamTranslator::PassThrough => {
                vec![String::from_utf8_lossy(chunk).into_owned()]
            }
            StreamTranslator::AnthropicToOpenAi(t) => reader
                .feed(chunk)
                .iter()
                .flat_map(|f: &SseFrame| t.on_frame(f))
                .collect(),
            StreamTranslator::OpenAiToAnthropic(t) => reader
                .feed(chunk)
                .iter()
                .flat_map(|f: &SseFrame| t.on_frame(f))
                .collect(),
        }
    }

    pub fn is_terminated(&self) -> bool {
        match self {
            StreamTranslator::PassThrough => false,
            StreamTranslator::AnthropicToOpenAi(t) => t.is_terminated(),
            StreamTranslator::OpenAiToAnthropic(t) => t.is_terminated(),
        }
    }

    /// `(input_tokens, output_tokens)` observed in the stream so far, for the
    /// usage accountant. `None` until the upstream has reported one.
    pub fn usage(&self) -> Option<(u64, u64)> {
        match self {
            StreamTranslator::PassThrough => None,
            StreamTranslator::AnthropicToOpenAi(t) => t.usage(),
            StreamTranslator::OpenAiToAnthropic(t) => t.usage(),
        }
    }
}

/// Extracts `(input_tokens, output_tokens)` from a non-streaming response
/// body, regardless of dialect, for the usage accountant. Returns `None`
/// when the provider omitted usage entirely (spec: never estimate).
pub fn extract_usage(dialect: Dialect, body: &[u8]) -> Option<(u64, u64)> {
    let value: Value = serde_json::from_slice(body).ok()?;
    match dialect {
        Dialect::OpenAi => {
            let usage = value.get("usage")?;
            Some((
                usage.get("prompt_tokens")?.as_u64()?,
                usage.get("completion_tokens")?.as_u64()?,
            ))
        }
        Dialect::Anthropic => {
            let usage = value.get("usage")?;
            Some((
                usage.get("input_tokens")?.as_u64()?,
                usage.get("output_tokens")?.as_u64()?,
            ))
        }
    }
}
