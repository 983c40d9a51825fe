use super::types::parse_arguments;
use super::{ChatMessage, CompletionRequest, ProviderError, ProviderKind, ProviderTurn, ToolCall};
use crate::tools::openai_to_anthropic_tools;
use serde_json::{json, Map, Value};

pub const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 4096;

fn push(messages: &mut Vec<Value>, role: &str, blocks: Vec<Value>) {
    // The Messages API rejects consecutive turns with the same role.
    if let Some(last) = messages.last_mut() {
        if last["role"] == role {
            if let Some(existing) = last["content"].as_array_mut() {
                existing.extend(blocks);
                return;
            }
        }
    }
    messages.push(json!({"role": role, "content": blocks}));
}

fn text_block(text: &str) -> Value {
    json!({"type": "text", "text": text})
}

pub fn request_body(request: &CompletionRequest) -> Value {
    let mut system = Vec::new();
    let mut messages = Vec::new();
    for message in &request.messages {
        match message {
            ChatMessage::System(text) => system.push(text.as_str()),
            ChatMessage::User(text) => push(&mut messages, "user", vec![text_block(text)]),
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = Vec::new();
                if !content.is_empty() {
                    blocks.push(text_block(content));
                }
                blocks.extend(tool_calls.iter().map(|call| {
                    json!({
                        "type": "tool_use",
                        "id": call.id,
                        "name": call.name,
                        "input": Value::Object(call.arguments.clone()),
                    })
                }));
                if !blocks.is_empty() {
                    push(&mut messages, "assistant", blocks);
                }
            }
            ChatMessage::Tool {
                call_id, content, ..
            } => push(
                &mut messages,
                "user",
                vec![json!({"type": "tool_result", "tool_use_id": call_id, "content": content})],
            ),
        }
    }

    let mut body = Map::new();
    body.insert("model".to_string(), Value::from(request.model.clone()));
    body.insert("max_tokens".to_string(), Value::from(MAX_TOKENS));
    body.insert("temperature".to_string(), json!(request.temperature));
    if !system.is_empty() {
        body.insert("system".to_string(), Value::from(system.join("\n\n")));
    }
    body.insert("messages".to_string(), Value::Array(messages));
    if !request.tools.is_empty() {
        body.insert(
            "tools".to_string(),
            Value::Array(openai_to_anthropic_tools(&request.tools)),
        );
    }
    Value::Object(body)
}

pub fn parse_response(body: &Value) -> Result<ProviderTurn, ProviderError> {
    let blocks = body
        .get("content")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::ParseFailure {
            provider: ProviderKind::Anthropic,
            reason: "response has no content array".to_string(),
        })?;

    let mut text = Vec::new();
    let mut calls = Vec::new();
    for block in blocks {
        match block.get("type").and_then(Value::as_str) {
            Some("text") => {
                if let Some(value) = block.get("text").and_then(Value::as_str) {
                    text.push(value);
                }
            }
            Some("tool_use") => {
                let Some(name) = block.get("name").and_then(Value::as_str) else {
                    continue;
                };
                calls.push(ToolCall {
                    id: block
                        .get("id")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: name.to_string(),
                    arguments: parse_arguments(block.get("input").unwrap_or(&Value::Null)),
                });
            }
            _ => {}
        }
    }

    let text = text.join("\n");
    if calls.is_empty() {
        Ok(ProviderTurn::Text(text))
    } else {
        Ok(ProviderTurn::ToolCalls { text, calls })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_is_lifted_and_tool_results_merge_into_one_user_turn() {
        let request = CompletionRequest {
            provider: ProviderKind::Anthropic,
            api_key: "sk-ant-test".to_string(),
            model: "claude-sonnet-4-5".to_string(),
            messages: vec![
                ChatMessage::System("rules".to_string()),
                ChatMessage::User("hi".to_string()),
                ChatMessage::Assistant {
                    content: "checking".to_string(),
                    tool_calls: vec![
                        ToolCall {
                            id: "tu_1".to_string(),
                            name: "a".to_string(),
                            arguments: Map::new(),
                        },
                        ToolCall {
                            id: "tu_2".to_string(),
                            name: "b".to_string(),
                            arguments: Map::new(),
                        },
                    ],
                },
                ChatMessage::Tool {
                    call_id: "tu_1".to_string(),
                    name: "a".to_string(),
                    content: "one".to_string(),
                },
                ChatMessage::Tool {
                    call_id: "tu_2".to_string(),
                    name: "b".to_string(),
                    content: "two".to_string(),
                },
            ],
            tools: vec![json!({"type": "function", "function": {
                "name": "a", "description": "d", "parameters": {"type": "object"}
            }})],
            temperature: 0.7,
        };
        let body = request_body(&request);
        assert_eq!(body["system"], "rules");
        let messages = body["messages"].as_array().expect("messages");
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1]["content"][1]["type"], "tool_use");
        assert_eq!(messages[2]["role"], "user");
        assert_eq!(messages[2]["content"].as_array().map(Vec::len), Some(2));
        assert_eq!(messages[2]["content"][1]["tool_use_id"], "tu_2");
        assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
    }

    #[test]
    fn parses_tool_use_blocks() {
        let turn = parse_response(&json!({
            "stop_reason": "tool_use",
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "tu_1", "name": "slack_abc", "input": {"text": "hi"}}
            ]
        }))
        .expect("turn");
        let ProviderTurn::ToolCalls { text, calls } = turn else {
            panic!("expected tool calls");
        };
        assert_eq!(text, "let me check");
        assert_eq!(calls[0].arguments["text"], "hi");
    }

    #[test]
    fn text_only_reply() {
        let turn = parse_response(&json!({"content": [{"type": "text", "text": "done"}]}))
            .expect("turn");
        assert_eq!(turn, ProviderTurn::Text("done".to_string()));
    }
}
