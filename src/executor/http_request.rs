use super::{str_input, ToolResult};
use serde_json::{json, Map, Value};

pub const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Header pairs from a `headers` input given as an object or JSON text.
/// Anything else, including malformed JSON, contributes no headers.
fn parse_headers(raw: Option<&Value>) -> Vec<(String, String)> {
    let parsed = match raw {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::String(text)) if !text.trim().is_empty() => {
            serde_json::from_str::<Map<String, Value>>(text).ok()
        }
        _ => None,
    };
    parsed
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(name, value)| {
            let value = match value {
                Value::String(text) => text,
                Value::Null => return None,
                other => other.to_string(),
            };
            let name = name.trim().to_string();
            (!name.is_empty()).then_some((name, value))
        })
        .collect()
}

fn body_text(raw: Option<&Value>) -> Option<String> {
    match raw? {
        Value::Null => None,
        Value::String(text) if text.is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

fn finish(response: ureq::Response) -> ToolResult {
    let status = response.status();
    let status_text = response.status_text().to_string();
    let text = response.into_string().unwrap_or_default();
    let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));
    let output = json!({
        "status": status,
        "statusText": status_text,
        "data": data,
    });
    if (200..300).contains(&status) {
        ToolResult::success(output)
    } else {
        ToolResult::failure_with_output(format!("HTTP {status} {status_text}"), output)
    }
}

pub(crate) fn execute(agent: &ureq::Agent, inputs: &Map<String, Value>) -> ToolResult {
    let Some(url) = str_input(inputs, "url") else {
        return ToolResult::failure("URL is empty");
    };
    let method = str_input(inputs, "method")
        .map(str::to_ascii_uppercase)
        .unwrap_or_else(|| "GET".to_string());

    let headers = parse_headers(inputs.get("headers"));
    let mut request = agent.request(&method, url);
    for (name, value) in &headers {
        request = request.set(name, value);
    }
    if let Some(api_key) = str_input(inputs, "apiKey") {
        request = request.set("Authorization", &format!("Bearer {api_key}"));
    }

    let body = if method == "GET" {
        None
    } else {
        body_text(inputs.get("body"))
    };
    let result = match body {
        Some(body) => {
            let has_content_type = headers
                .iter()
                .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
            if !has_content_type && serde_json::from_str::<Value>(&body).is_ok() {
                request = request.set("Content-Type", "application/json");
            }
            request.send_string(&body)
        }
        None => request.call(),
    };

    match result {
        Ok(response) => finish(response),
        Err(ureq::Error::Status(_, response)) => finish(response),
        Err(err) => ToolResult::failure(format!("Request to {url} failed: {err}")),
    }
}
