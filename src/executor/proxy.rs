use super::ToolResult;
use serde_json::{Map, Value};
use std::time::Duration;

const PROXY_SUFFIX: &str = "-proxy";
const ACTION_SUFFIX: &str = "-action";
const DEFAULT_ACTION: &str = "execute";

/// Integration node types with a known service endpoint name.
const ENDPOINTS: &[(&str, &str)] = &[
    ("slack", "slack-proxy"),
    ("gmail", "gmail-proxy"),
    ("outlook", "outlook-proxy"),
    ("send-email", "send-email-action"),
    ("google-sheets", "google-sheets-proxy"),
    ("google-calendar", "google-calendar-proxy"),
    ("google-drive", "google-drive-proxy"),
    ("hubspot", "hubspot-proxy"),
    ("salesforce", "salesforce-proxy"),
    ("pipedrive", "pipedrive-proxy"),
    ("notion", "notion-proxy"),
    ("airtable", "airtable-proxy"),
    ("trello", "trello-proxy"),
    ("asana", "asana-proxy"),
    ("jira", "jira-proxy"),
    ("linear", "linear-proxy"),
    ("github", "github-proxy"),
    ("mailchimp", "mailchimp-proxy"),
    ("zendesk", "zendesk-proxy"),
    ("intercom", "intercom-proxy"),
    ("calendly", "calendly-proxy"),
    ("shopify", "shopify-proxy"),
    ("stripe", "stripe-action"),
    ("discord", "discord-action"),
    ("telegram", "telegram-action"),
    ("whatsapp", "whatsapp-action"),
    ("twilio", "twilio-action"),
    ("sendgrid", "sendgrid-action"),
    ("microsoft-teams", "teams-action"),
];

#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("proxy `{endpoint}` request failed: {reason}")]
    Transport { endpoint: String, reason: String },
    #[error("proxy `{endpoint}` responded with status {status}: {message}")]
    Status {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("proxy `{endpoint}` returned an unreadable body: {reason}")]
    Decode { endpoint: String, reason: String },
}

/// Uniform request/response contract of the external service proxies.
pub trait ProxyClient: Send + Sync {
    fn invoke(&self, endpoint: &str, payload: &Value) -> Result<Value, ProxyError>;
}

pub struct HttpProxyClient {
    agent: ureq::Agent,
    base_url: String,
    service_key: Option<String>,
}

impl HttpProxyClient {
    pub fn new(base_url: &str, service_key: Option<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key: service_key.filter(|key| !key.trim().is_empty()),
        }
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }
}

impl ProxyClient for HttpProxyClient {
    fn invoke(&self, endpoint: &str, payload: &Value) -> Result<Value, ProxyError> {
        let mut request = self
            .agent
            .post(&self.endpoint_url(endpoint))
            .set("Content-Type", "application/json");
        if let Some(key) = &self.service_key {
            request = request.set("Authorization", &format!("Bearer {key}"));
        }

        let response = match request.send_json(payload.clone()) {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                return Err(ProxyError::Status {
                    endpoint: endpoint.to_string(),
                    status,
                    message: error_message_from_body(&body),
                });
            }
            Err(err) => {
                return Err(ProxyError::Transport {
                    endpoint: endpoint.to_string(),
                    reason: err.to_string(),
                })
            }
        };

        let body = response
            .into_string()
            .map_err(|err| ProxyError::Decode {
                endpoint: endpoint.to_string(),
                reason: err.to_string(),
            })?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

fn error_message_from_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<Value>(body) {
        if let Some(message) = application_error(&value) {
            return message;
        }
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        "empty response body".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extracts an application-level `error` from a proxy response body.
pub(crate) fn application_error(value: &Value) -> Option<String> {
    match value.get("error")? {
        Value::Null | Value::Bool(false) => None,
        Value::String(message) if message.trim().is_empty() => None,
        Value::String(message) => Some(message.clone()),
        Value::Object(details) => Some(
            details
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| Value::Object(details.clone()).to_string()),
        ),
        other => Some(other.to_string()),
    }
}

/// Known endpoint for `node_type`, if the type is in the lookup table.
pub fn endpoint_for(node_type: &str) -> Option<&'static str> {
    ENDPOINTS
        .iter()
        .find(|(known, _)| *known == node_type)
        .map(|(_, endpoint)| *endpoint)
}

fn alternate_endpoint(endpoint: &str) -> Option<String> {
    if let Some(stem) = endpoint.strip_suffix(PROXY_SUFFIX) {
        return Some(format!("{stem}{ACTION_SUFFIX}"));
    }
    endpoint
        .strip_suffix(ACTION_SUFFIX)
        .map(|stem| format!("{stem}{PROXY_SUFFIX}"))
}

/// Calls `endpoint` and folds transport and application errors into one.
pub(crate) fn call_endpoint(
    proxy: &dyn ProxyClient,
    endpoint: &str,
    payload: &Value,
) -> Result<Value, String> {
    let response = proxy.invoke(endpoint, payload).map_err(|err| err.to_string())?;
    if let Some(message) = application_error(&response) {
        return Err(message);
    }
    Ok(response)
}

pub(crate) fn execute(
    proxy: &dyn ProxyClient,
    node_type: &str,
    inputs: &Map<String, Value>,
) -> ToolResult {
    let mut payload = inputs.clone();
    payload
        .entry("action")
        .or_insert_with(|| Value::String(DEFAULT_ACTION.to_string()));
    let payload = Value::Object(payload);

    let (endpoint, mapped) = match endpoint_for(node_type) {
        Some(endpoint) => (endpoint.to_string(), true),
        None => (format!("{node_type}{PROXY_SUFFIX}"), false),
    };

    let first_error = match call_endpoint(proxy, &endpoint, &payload) {
        Ok(output) => return ToolResult::success(output),
        Err(err) => err,
    };
    if mapped {
        return ToolResult::failure(first_error);
    }

    let Some(alternate) = alternate_endpoint(&endpoint) else {
        return ToolResult::failure(first_error);
    };
    match call_endpoint(proxy, &alternate, &payload) {
        Ok(output) => ToolResult::success(output),
        Err(second_error) => ToolResult::failure(format!(
            "{first_error}; retry via `{alternate}` failed: {second_error}"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    struct ScriptedProxy {
        responses: Mutex<Vec<Result<Value, ProxyError>>>,
        endpoints: Mutex<Vec<String>>,
    }

    impl ScriptedProxy {
        fn new(responses: Vec<Result<Value, ProxyError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                endpoints: Mutex::new(Vec::new()),
            }
        }

        fn endpoints(&self) -> Vec<String> {
            self.endpoints.lock().expect("lock").clone()
        }
    }

    impl ProxyClient for ScriptedProxy {
        fn invoke(&self, endpoint: &str, _payload: &Value) -> Result<Value, ProxyError> {
            self.endpoints.lock().expect("lock").push(endpoint.to_string());
            let mut responses = self.responses.lock().expect("lock");
            if responses.is_empty() {
                return Ok(json!({}));
            }
            responses.remove(0)
        }
    }

    fn transport(endpoint: &str) -> ProxyError {
        ProxyError::Transport {
            endpoint: endpoint.to_string(),
            reason: "connection refused".to_string(),
        }
    }

    #[test]
    fn endpoint_table_covers_known_integrations() {
        assert_eq!(endpoint_for("hubspot"), Some("hubspot-proxy"));
        assert_eq!(endpoint_for("discord"), Some("discord-action"));
        assert_eq!(endpoint_for("unheard-of"), None);
        assert!(ENDPOINTS.len() >= 25);
    }

    #[test]
    fn unmapped_types_retry_once_with_alternate_suffix() {
        let proxy = ScriptedProxy::new(vec![
            Err(transport("acme-proxy")),
            Ok(json!({"done": true})),
        ]);
        let result = execute(&proxy, "acme", &Map::new());
        assert!(result.success);
        assert_eq!(proxy.endpoints(), vec!["acme-proxy", "acme-action"]);
    }

    #[test]
    fn mapped_types_do_not_retry() {
        let proxy = ScriptedProxy::new(vec![Err(transport("hubspot-proxy"))]);
        let result = execute(&proxy, "hubspot", &Map::new());
        assert!(!result.success);
        assert_eq!(proxy.endpoints(), vec!["hubspot-proxy"]);
    }

    #[test]
    fn application_error_field_counts_as_failure() {
        let proxy = ScriptedProxy::new(vec![
            Ok(json!({"error": "token expired"})),
            Ok(json!({"error": {"message": "still expired"}})),
        ]);
        let result = execute(&proxy, "acme", &Map::new());
        assert!(!result.success);
        let message = result.error.expect("error");
        assert!(message.contains("token expired"));
        assert!(message.contains("still expired"));
    }

    #[test]
    fn explicit_action_is_kept() {
        let proxy = ScriptedProxy::new(vec![Ok(json!({"ok": true}))]);
        let inputs = json!({"action": "create_contact"})
            .as_object()
            .cloned()
            .expect("inputs");
        assert!(execute(&proxy, "hubspot", &inputs).success);
    }
}
