//! Non-streaming response translation, both directions (spec §4.7).

use super::anthropic as a;
use super::openai as o;
use serde_json::Value;

pub(crate) fn stop_reason_to_finish_reason(reason: &str) -> &'static str {
    match reason {
        "end_turn" | "stop_sequence" => "stop",
        "tool_use" => "tool_calls",
        "max_tokens" => "length",
        _ => "stop",
    }
}

pub(crate) fn finish_reason_to_stop_reason(reason: &str) -> &'static str {
    match reason {
        "stop" => "end_turn",
        "tool_calls" => "tool_use",
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

/// Anthropic `message` → OpenAI `chat.completion` (spec §4.7, scenario 3).
pub fn anthropic_to_openai(resp: &a::MessagesResponse, request_id_hint: &str) -> o::ChatCompletionResponse {
    let text: String = resp
        .content
        .iter()
        .filter_map(|b| match b {
            a::ContentBlock::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("");

    let tool_calls: Vec<o::ToolCall> = resp
        .content
        .iter()
        .filter_map(|b| match b {
            a::ContentBlock::ToolUse { id, name, input } => Some(o::ToolCall {
                id: id.clone(),
                kind: "function".to_string(),
                function: o::FunctionCall {
                    name: name.clone(),
                    arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".into()),
                },
            }),
            _ => None,
        })
        .collect();

    let finish_reason = resp
        .stop_reason
        .as_deref()
        .map(stop_reason_to_finish_reason)
        .unwrap_or("stop")
        .to_string();

    let usage = o::Usage {
        prompt_tokens: resp.usage.input_tokens,
        completion_tokens: resp.usage.output_tokens,
        total_tokens: resp.usage.input_tokens + resp.usage.output_tokens,
    };

    let id = if resp.id.is_empty() {
        request_id_hint.to_string()
    } else {
        resp.id.clone()
    };

    o::ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created: 0,
        model: resp.model.clone(),
        choices: vec![o::Choice {
            index: 0,
            message: o::ChatMessage {
                role: "assistant".to_string(),
                content: if text.is_empty() { None } else { Some(text) },
                name: None,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
                tool_call_id: None,
            },
            finish_reason: Some(finish_reason),
        }],
        usage: Some(usage),
    }
}

/// OpenAI `chat.completion` → Anthropic `message` (spec §4.7).
pub fn openai_to_anthropic(resp: &o::ChatCompletionResponse, response_model: Option<&str>) -> a::MessagesResponse {
    let choice = resp.choices.first();

    let mut content = Vec::new();
    if let Some(choice) = choice {
        if let Some(text) = &choice.message.content {
            if !text.is_empty() {
                content.push(a::ContentBlock::Text { text: text.clone() });
            }
        }
        for call in choice.message.tool_calls.iter().flatten() {
            let input: Value = serde_json::from_str(&call.function.arguments)
                .unwrap_or(Value::Object(Default::default()));
            content.push(a::ContentBlock::ToolUse {
                id: call.id.clone(),
                name: call.function.name.clone(),
                input,
            });
        }
    }

    let stop_reason = choice
        .and_then(|c| c.finish_reason.as_deref())
        .map(finish_reason_to_stop_reason)
        .map(|s| s.to_string());

    let usage = resp
        .usage
        .map(|u| a::Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        })
        .unwrap_or_default();

    a::MessagesResponse {
        id: resp.id.clone(),
        kind: "message".to_string(),
        role: "assistant".to_string(),
        content,
        model: response_model.unwrap_or(&resp.model).to_string(),
        stop_reason,
        stop_sequence: None,
        usage,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anthropic_tool_use_response_becomes_openai_tool_calls() {
        let resp = a::MessagesResponse {
            id: "msg_1".into(),
            kind: "message".into(),
            role: "assistant".into(),
            content: vec![
                a::ContentBlock::Text {
                    text: "checking".into(),
                },
                a::ContentBlock::ToolUse {
                    id: "t1".into(),
                    name: "get_weather".into(),
                    input: serde_json::json!({"loc": "Paris"}),
                },
            ],
            model: "claude".into(),
            stop_reason: Some("tool_use".into()),
            stop_sequence: None,
            usage: a::Usage {
                input_tokens: 40,
                output_tokens: 12,
            },
        };

        let translated = anthropic_to_openai(&resp, "req-1");
        let message = &translated.choices[0].message;
        assert_eq!(message.content.as_deref(), Some("checking"));
        let calls = message.tool_calls.as_ref().unwrap();
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].function.name, "get_weather");
        assert_eq!(calls[0].function.arguments, "{\"loc\":\"Paris\"}");
        assert_eq!(translated.choices[0].finish_reason.as_deref(), Some("tool_calls"));
        assert_eq!(translated.usage.unwrap().total_tokens, 52);
    }

    #[test]
    fn openai_tool_calls_become_anthropic_tool_use_blocks() {
        let resp = o::ChatCompletionResponse {
            id: "chatcmpl-1".into(),
            object: "chat.completion".into(),
            created: 0,
            model: "gpt-4".into(),
            choices: vec![o::Choice {
                index: 0,
                message: o::ChatMessage {
                    role: "assistant".into(),
                    content: Some("checking".into()),
                    name: None,
                    tool_calls: Some(vec![o::ToolCall {
                        id: "t1".into(),
                        kind: "function".into(),
                        function: o::FunctionCall {
                            name: "get_weather".into(),
                            arguments: "{\"loc\":\"Paris\"}".into(),
                        },
                    }]),
                    tool_call_id: None,
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: Some(o::Usage {
                prompt_tokens: 40,
                completion_tokens: 12,
                total_tokens: 52,
            }),
        };

        let translated = openai_to_anthropic(&resp, None);
        assert_eq!(translated.content.len(), 2);
        assert!(matches!(translated.content[0], a::ContentBlock::Text { .. }));
        assert!(matches!(translated.content[1], a::ContentBlock::ToolUse { .. }));
        assert_eq!(translated.stop_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn finish_reason_stop_reason_round_trip_over_the_shared_subset() {
        assert_eq!(stop_reason_to_finish_reason("end_turn"), "stop");
        assert_eq!(finish_reason_to_stop_reason("stop"), "end_turn");
        assert_eq!(stop_reason_to_finish_reason("tool_use"), "tool_calls");
        assert_eq!(finish_reason_to_stop_reason("tool_calls"), "tool_use");
        assert_eq!(stop_reason_to_finish_reason("max_tokens"), "length");
        assert_eq!(finish_reason_to_stop_reason("length"), "max_tokens");
    }
}
