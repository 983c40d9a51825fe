use crate::orchestration::{ChatError, ChatOrchestrator, ChatRequest, HistoryTurn};
use crate::store::{ErrorLogEntry, FlowKey};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod router;
pub mod widget;

pub use router::{router, serve, ServerError};
pub use widget::{empty_shell, friendly_error, render_shell, ShellOptions};

pub const CORS_HEADERS: &[(&str, &str)] = &[
    ("Access-Control-Allow-Origin", "*"),
    (
        "Access-Control-Allow-Headers",
        "authorization, x-client-info, apikey, content-type, x-api-key",
    ),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
];

const JSON_CONTENT_TYPE: &str = "application/json";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
    Other,
}

impl Method {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_uppercase().as_str() {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "OPTIONS" => Self::Options,
            _ => Self::Other,
        }
    }
}

/// Transport-neutral view of an inbound request.
#[derive(Debug, Clone)]
pub struct EndpointRequest {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Lower-cased header names.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl EndpointRequest {
    pub fn new(method: Method, path: &str) -> Self {
        Self {
            method,
            path: path.to_string(),
            query: HashMap::new(),
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    pub fn with_query(mut self, raw: &str) -> Self {
        self.query = parse_query(raw);
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: String,
}

impl EndpointResponse {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            content_type: Some(JSON_CONTENT_TYPE),
            body: body.to_string(),
        }
    }

    fn html(status: u16, body: String) -> Self {
        Self {
            status,
            content_type: Some(HTML_CONTENT_TYPE),
            body,
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: String::new(),
        }
    }

    pub fn json_body(&self) -> Option<Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// `a=1&b=two%20words` into a map; later duplicates win.
pub fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.trim_start_matches('?')
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            let decode = |text: &str| {
                urlencoding::decode(&text.replace('+', " "))
                    .map(|decoded| decoded.into_owned())
                    .ok()
            };
            Some((decode(key)?, decode(value)?))
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatBody {
    #[serde(default)]
    flow: Option<String>,
    #[serde(default)]
    flow_project_id: Option<String>,
    #[serde(default)]
    mode: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    #[serde(default)]
    history: Option<Vec<HistoryTurn>>,
    #[serde(default)]
    session_id: Option<String>,
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Flow id from a raw request body when the normal path has already failed.
pub fn fallback_flow_id(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        for key in ["flow", "flowProjectId", "flowId"] {
            if let Some(id) = non_empty(value.get(key).and_then(Value::as_str)) {
                return Some(id);
            }
        }
    }
    for key in ["\"flowProjectId\"", "\"flow\""] {
        let Some(start) = body.find(key) else {
            continue;
        };
        let Some(rest) = body[start + key.len()..].trim_start().strip_prefix(':') else {
            continue;
        };
        let Some(rest) = rest.trim_start().strip_prefix('"') else {
            continue;
        };
        if let Some(end) = rest.find('"') {
            return non_empty(Some(&rest[..end]));
        }
    }
    None
}

fn error_response(err: &ChatError) -> EndpointResponse {
    let mut body = json!({"error": err.to_string()});
    if let Some(code) = err.error_code() {
        body["error_code"] = Value::from(code);
    }
    if let Some(details) = err.details() {
        body["details"] = Value::from(details);
    }
    EndpointResponse::json(err.status(), body)
}

/// Method-dispatched chat endpoint: widget shell on GET, chat turns on POST.
pub struct ChatEndpoint {
    orchestrator: Arc<ChatOrchestrator>,
}

impl ChatEndpoint {
    pub fn new(orchestrator: Arc<ChatOrchestrator>) -> Self {
        Self { orchestrator }
    }

    pub fn handle(&self, request: &EndpointRequest) -> EndpointResponse {
        match request.method {
            Method::Options => EndpointResponse::empty(204),
            Method::Get => self.widget(request),
            Method::Post => self.chat(request),
            Method::Other => EndpointResponse::json(405, json!({"error": "Method not allowed"})),
        }
    }

    fn widget(&self, request: &EndpointRequest) -> EndpointResponse {
        let flow = non_empty(request.query.get("flow").map(String::as_str)).or_else(|| {
            request
                .path
                .rsplit('/')
                .find(|segment| !segment.trim().is_empty())
                .and_then(|segment| urlencoding::decode(segment).ok())
                .map(|segment| segment.into_owned())
        });
        let Some(key) = flow.as_deref().and_then(FlowKey::parse) else {
            return EndpointResponse::html(400, "<p>Missing flow</p>".to_string());
        };

        let project = match self.orchestrator.store().find_flow(&key) {
            Ok(Some(project)) => project,
            Ok(None) => return EndpointResponse::html(404, "<p>Flow not found</p>".to_string()),
            Err(err) => {
                self.orchestrator
                    .log()
                    .error("widget.lookup_failed", None, &err.to_string());
                return EndpointResponse::html(500, "<p>Internal error</p>".to_string());
            }
        };
        if !project.is_active() {
            return EndpointResponse::html(200, empty_shell());
        }

        let options = ShellOptions {
            mode: request.query.get("mode").cloned(),
            theme: request.query.get("theme").cloned(),
        };
        EndpointResponse::html(200, render_shell(&project, &key, &options, &request.path))
    }

    fn chat(&self, request: &EndpointRequest) -> EndpointResponse {
        let body = if request.body.trim().is_empty() {
            ChatBody::default()
        } else {
            match serde_json::from_str::<ChatBody>(&request.body) {
                Ok(body) => body,
                Err(err) => return error_response(&ChatError::InvalidBody(err.to_string())),
            }
        };

        let message = match body.message {
            Some(Value::String(text)) => text,
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        let flow = non_empty(body.flow.as_deref())
            .or_else(|| non_empty(body.flow_project_id.as_deref()))
            .or_else(|| non_empty(request.query.get("flow").map(String::as_str)))
            .unwrap_or_default();

        let chat = ChatRequest {
            flow,
            mode: body.mode,
            message,
            history: body.history.unwrap_or_default(),
            session_id: body.session_id,
            origin: request.header("origin").map(str::to_string),
            referer: request.header("referer").map(str::to_string),
            api_key: request.header("x-api-key").map(str::to_string),
        };

        match self.orchestrator.handle(&chat) {
            Ok(outcome) => {
                // Hooks keep running after the reply is returned.
                drop(outcome.hooks);
                EndpointResponse::json(
                    200,
                    json!({"reply": outcome.reply, "conversation_id": Value::Null}),
                )
            }
            Err(err) => {
                if err.status() == 500 {
                    self.record_unhandled(&request.body, &err.to_string());
                }
                error_response(&err)
            }
        }
    }

    /// 500 for failures outside the normal error path, logged best-effort.
    pub fn unhandled(&self, body: &str, reason: &str) -> EndpointResponse {
        self.record_unhandled(body, reason);
        error_response(&ChatError::Internal(reason.to_string()))
    }

    fn record_unhandled(&self, body: &str, reason: &str) {
        let flow_id = fallback_flow_id(body);
        self.orchestrator
            .log()
            .error("chat.unhandled", flow_id.as_deref(), reason);
        let entry = ErrorLogEntry::error(
            flow_id.as_deref(),
            &format!("Unhandled chat error: {reason}"),
            json!({"source": "chat-endpoint"}),
        );
        let _ = self.orchestrator.store().log_error(&entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_strings_are_decoded() {
        let query = parse_query("?flow=support%20bot&mode=inline&theme=dark+mode&flag");
        assert_eq!(query.get("flow").map(String::as_str), Some("support bot"));
        assert_eq!(query.get("theme").map(String::as_str), Some("dark mode"));
        assert_eq!(query.get("flag").map(String::as_str), Some(""));
    }

    #[test]
    fn fallback_flow_id_reads_json_or_scans_broken_bodies() {
        assert_eq!(
            fallback_flow_id("{\"flowProjectId\":\"abc\",\"message\":\"hi\"}").as_deref(),
            Some("abc")
        );
        assert_eq!(
            fallback_flow_id("{\"flow\": \"support\", \"message\": ").as_deref(),
            Some("support")
        );
        assert_eq!(
            fallback_flow_id("{\"flowProjectId\": 42, \"flow\": \"support\", \"message\": ")
                .as_deref(),
            Some("support")
        );
        assert_eq!(fallback_flow_id("not json"), None);
    }

    #[test]
    fn method_parsing_is_case_insensitive() {
        assert_eq!(Method::parse("post"), Method::Post);
        assert_eq!(Method::parse("DELETE"), Method::Other);
    }

    #[test]
    fn headers_are_case_insensitive() {
        let request = EndpointRequest::new(Method::Post, "/chat").with_header("X-API-Key", "k1");
        assert_eq!(request.header("x-api-key"), Some("k1"));
        assert_eq!(request.header("origin"), None);
    }
}
