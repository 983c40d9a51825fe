use super::types::parse_arguments;
use super::{ChatMessage, CompletionRequest, ProviderError, ProviderKind, ProviderTurn, ToolCall};
use serde_json::{json, Map, Value};

fn message_json(message: &ChatMessage) -> Value {
    match message {
        ChatMessage::System(text) => json!({"role": "system", "content": text}),
        ChatMessage::User(text) => json!({"role": "user", "content": text}),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } if tool_calls.is_empty() => json!({"role": "assistant", "content": content}),
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let calls = tool_calls
                .iter()
                .map(|call| {
                    json!({
                        "id": call.id,
                        "type": "function",
                        "function": {
                            "name": call.name,
                            "arguments": Value::Object(call.arguments.clone()).to_string(),
                        }
                    })
                })
                .collect::<Vec<_>>();
            let content = if content.is_empty() {
                Value::Null
            } else {
                Value::String(content.clone())
            };
            json!({"role": "assistant", "content": content, "tool_calls": calls})
        }
        ChatMessage::Tool {
            call_id, content, ..
        } => json!({"role": "tool", "tool_call_id": call_id, "content": content}),
    }
}

pub fn request_body(request: &CompletionRequest) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), Value::from(request.model.clone()));
    body.insert(
        "messages".to_string(),
        Value::Array(request.messages.iter().map(message_json).collect()),
    );
    body.insert("temperature".to_string(), json!(request.temperature));
    if !request.tools.is_empty() {
        body.insert("tools".to_string(), Value::Array(request.tools.clone()));
        body.insert("tool_choice".to_string(), Value::from("auto"));
    }
    Value::Object(body)
}

fn parse_tool_call(index: usize, raw: &Value) -> Option<ToolCall> {
    let function = raw.get("function")?;
    let name = function.get("name").and_then(Value::as_str)?.to_string();
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{index}"));
    Some(ToolCall {
        id,
        name,
        arguments: parse_arguments(function.get("arguments").unwrap_or(&Value::Null)),
    })
}

pub fn parse_response(provider: ProviderKind, body: &Value) -> Result<ProviderTurn, ProviderError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| ProviderError::ParseFailure {
            provider,
            reason: "response has no choices[0].message".to_string(),
        })?;

    let text = message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let calls = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .filter_map(|(index, raw)| parse_tool_call(index, raw))
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();

    if calls.is_empty() {
        Ok(ProviderTurn::Text(text))
    } else {
        Ok(ProviderTurn::ToolCalls { text, calls })
    }
}
