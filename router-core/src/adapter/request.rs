//! Non-streaming request translation, both directions (spec §4.7).

use super::anthropic as a;
use super::error::AdapterError;
use super::openai as o;
use serde_json::Value;

/// OpenAI `chat.completions` body → Anthropic `messages` body.
pub fn openai_to_anthropic(
    req: &o::ChatCompletionRequest,
    default_max_tokens: u32,
) -> Result<a::MessagesRequest, AdapterError> {
    let mut system_parts = Vec::new();
    let mut messages = Vec::new();

    for msg in &req.messages {
        match msg.role.as_str() {
            "system" => {
                if let Some(content) = &msg.content {
                    system_parts.push(content.clone());
                }
            }
            "tool" => {
                let tool_use_id = msg
                    .tool_call_id
                    .clone()
                    .ok_or(AdapterError::MissingField("tool_call_id"))?;
                messages.push(a::Message {
                    role: "user".to_string(),
                    content: a::MessageContent::Blocks(vec![a::ContentBlock::ToolResult {
                        tool_use_id,
                        content: msg
                            .content
                            .clone()
                            .map(a::ToolResultContent::Text),
                        is_error: None,
                    }]),
                });
            }
            "assistant" => {
                let mut blocks = Vec::new();
                if let Some(text) = &msg.content {
                    if !text.is_empty() {
                        blocks.push(a::ContentBlock::Text { text: text.clone() });
                    }
                }
                for call in msg.tool_calls.iter().flatten() {
                    let input: Value = serde_json::from_str(&call.function.arguments)
                        .unwrap_or(Value::Object(Default::default()));
                    blocks.push(a::ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.function.name.clone(),
                        input,
                    });
                }
                messages.push(a::Message {
                    role: "assistant".to_string(),
                    content: a::MessageContent::Blocks(blocks),
                });
            }
            _ => {
                // user and any other role are treated as plain user turns.
                messages.push(a::Message {
                    role: "user".to_string(),
                    content: a::MessageContent::Text(msg.content.clone().unwrap_or_default()),
                });
            }
        }
    }

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(a::SystemPrompt::Text(system_parts.join("\n")))
    };

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| a::Tool {
                name: t.function.name.clone(),
                description: t.function.description.clone(),
                input_schema: t.function.parameters.clone(),
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        o::ToolChoice::Mode(mode) if mode == "required" => a::ToolChoice::Any,
        o::ToolChoice::Mode(_) => a::ToolChoice::Auto,
        o::ToolChoice::Named { function, .. } => a::ToolChoice::Tool {
            name: function.name.clone(),
        },
    });

    let stop_sequences = req.stop.as_ref().map(|s| match s {
        o::StopSequences::One(s) => vec![s.clone()],
        o::StopSequences::Many(v) => v.clone(),
    });

    Ok(a::MessagesRequest {
        model: req.model.clone(),
        system,
        messages,
        max_tokens: req.max_tokens.unwrap_or(default_max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stop_sequences,
        stream: req.stream,
        tools,
        tool_choice,
    })
}

/// Anthropic `messages` body → OpenAI `chat.completions` body.
pub fn anthropic_to_openai(req: &a::MessagesRequest) -> Result<o::ChatCompletionRequest, AdapterError> {
    let mut messages = Vec::new();

    if let Some(system) = &req.system {
        let text = system.as_text();
        if !text.is_empty() {
            messages.push(o::ChatMessage {
                role: "system".to_string(),
                content: Some(text),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            });
        }
    }

    for msg in &req.messages {
        let blocks = msg.content.blocks();

        // tool_result blocks become preceding `tool` role messages.
        let tool_results: Vec<&a::ContentBlock> = blocks
            .iter()
            .filter(|b| matches!(b, a::ContentBlock::ToolResult { .. }))
            .collect();
        for block in &tool_results {
            if let a::ContentBlock::ToolResult {
                tool_use_id,
                content,
                ..
            } = block
            {
                messages.push(o::ChatMessage {
                    role: "tool".to_string(),
                    content: Some(content.as_ref().map(|c| c.as_text()).unwrap_or_default()),
                    name: None,
                    tool_calls: None,
                    tool_call_id: Some(tool_use_id.clone()),
                });
            }
        }

        let text: String = blocks
            .iter()
            .filter_map(|b| match b {
                a::ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        let tool_calls: Vec<o::ToolCall> = blocks
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

        if text.is_empty() && tool_calls.is_empty() && tool_results.is_empty() {
            continue;
        }
        if tool_results.len() == blocks.len() {
            // message was entirely tool_result blocks, already emitted above.
            continue;
        }

        messages.push(o::ChatMessage {
            role: msg.role.clone(),
            content: if text.is_empty() { None } else { Some(text) },
            name: None,
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            tool_call_id: None,
        });
    }

    let tools = req.tools.as_ref().map(|tools| {
        tools
            .iter()
            .map(|t| o::Tool {
                kind: "function".to_string(),
                function: o::FunctionDef {
                    name: t.name.clone(),
                    description: t.description.clone(),
                    parameters: t.input_schema.clone(),
                },
            })
            .collect()
    });

    let tool_choice = req.tool_choice.as_ref().map(|tc| match tc {
        a::ToolChoice::Auto => o::ToolChoice::Mode("auto".to_string()),
        a::ToolChoice::Any => o::ToolChoice::Mode("required".to_string()),
        a::ToolChoice::Tool { name } => o::ToolChoice::Named {
            kind: "function".to_string(),
            function: o::ToolChoiceFunction { name: name.clone() },
        },
    });

    let stop = req
        .stop_sequences
        .as_ref()
        .map(|v| o::StopSequences::Many(v.clone()));

    Ok(o::ChatCompletionRequest {
        model: req.model.clone(),
        messages,
        max_tokens: Some(req.max_tokens),
        temperature: req.temperature,
        top_p: req.top_p,
        stop,
        stream: req.stream,
        tools,
        tool_choice,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_tool_use_request_round_trips_core_fields() {
        let req = o::ChatCompletionRequest {
            model: "m".into(),
            messages: vec![o::ChatMessage {
                role: "user".into(),
                content: Some("weather?".into()),
                name: None,
                tool_calls: None,
                tool_call_id: None,
            }],
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: None,
            stream: false,
            tools: Some(vec![o::Tool {
                kind: "function".into(),
                function: o::FunctionDef {
                    name: "get_weather".into(),
                    description: None,
                    parameters: serde_json::json!({"type":"object"}),
                },
            }]),
            tool_choice: Some(o::ToolChoice::Mode("auto".into())),
        };

        let translated = openai_to_anthropic(&req, 1024).unwrap();
        assert_eq!(translated.max_tokens, 1024);
        assert_eq!(translated.messages.len(), 1);
        assert_eq!(translated.tools.unwrap()[0].name, "get_weather");
        assert!(matches!(translated.tool_choice, Some(a::ToolChoice::Auto)));
    }

    #[test]
    fn anthropic_system_blocks_concatenate_to_openai_system_message() {
        let req = a::MessagesRequest {
            model: "m".into(),
            system: Some(a::SystemPrompt::Blocks(vec![
                a::ContentBlock::Text { text: "be terse. ".into() },
                a::ContentBlock::Text { text: "be kind.".into() },
            ])),
            messages: vec![a::Message {
                role: "user".into(),
                content: a::MessageContent::Text("hi".into()),
            }],
            max_tokens: 256,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
        };

        let translated = anthropic_to_openai(&req).unwrap();
        assert_eq!(translated.messages[0].role, "system");
        assert_eq!(
            translated.messages[0].content.as_deref(),
            Some("be terse. be kind.")
        );
    }

    #[test]
    fn anthropic_tool_result_becomes_tool_role_message() {
        let req = a::MessagesRequest {
            model: "m".into(),
            system: None,
            messages: vec![a::Message {
                role: "user".into(),
                content: a::MessageContent::Blocks(vec![a::ContentBlock::ToolResult {
                    tool_use_id: "t1".into(),
                    content: Some(a::ToolResultContent::Text("72F".into())),
                    is_error: None,
                }]),
            }],
            max_tokens: 256,
            temperature: None,
            top_p: None,
            stop_sequences: None,
            stream: false,
            tools: None,
            tool_choice: None,
        };

        let translated = anthropic_to_openai(&req).unwrap();
        assert_eq!(translated.messages.len(), 1);
        assert_eq!(translated.messages[0].role, "tool");
        assert_eq!(translated.messages[0].tool_call_id.as_deref(), Some("t1"));
    }
}
