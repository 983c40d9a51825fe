use super::proxy::{call_endpoint, ProxyClient};
use super::{json_input, str_input, ToolResult};
use serde_json::{Map, Value};

const SLACK_ENDPOINT: &str = "slack-proxy";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionMode {
    Webhook,
    Api,
}

fn connection_mode(node_type: &str, inputs: &Map<String, Value>) -> ConnectionMode {
    if node_type == "slack-webhook" {
        return ConnectionMode::Webhook;
    }
    match str_input(inputs, "connectionMethod").map(str::to_ascii_lowercase) {
        Some(mode) if mode == "webhook" => ConnectionMode::Webhook,
        Some(_) => ConnectionMode::Api,
        None if str_input(inputs, "webhookUrl").is_some() => ConnectionMode::Webhook,
        None => ConnectionMode::Api,
    }
}

fn copy_text(from: &Map<String, Value>, to: &mut Map<String, Value>, key: &str) {
    if let Some(value) = str_input(from, key) {
        to.insert(key.to_string(), Value::String(value.to_string()));
    }
}

pub(crate) fn execute(
    proxy: &dyn ProxyClient,
    node_type: &str,
    inputs: &Map<String, Value>,
) -> ToolResult {
    let blocks = json_input(inputs, "blocks").filter(Value::is_array);
    if str_input(inputs, "text").is_none() && blocks.is_none() {
        return ToolResult::failure("Message text is empty");
    }

    let mut payload = Map::new();
    copy_text(inputs, &mut payload, "text");
    if let Some(blocks) = blocks {
        payload.insert("blocks".to_string(), blocks);
    }

    match connection_mode(node_type, inputs) {
        ConnectionMode::Webhook => {
            let Some(webhook_url) = str_input(inputs, "webhookUrl") else {
                return ToolResult::failure("Webhook URL is empty");
            };
            payload.insert("action".to_string(), Value::from("send_webhook"));
            payload.insert("webhookUrl".to_string(), Value::from(webhook_url));
            copy_text(inputs, &mut payload, "username");
            copy_text(inputs, &mut payload, "iconEmoji");
            copy_text(inputs, &mut payload, "iconUrl");
        }
        ConnectionMode::Api => {
            let Some(channel) = str_input(inputs, "channel") else {
                return ToolResult::failure("Slack channel is empty");
            };
            payload.insert("action".to_string(), Value::from("send_message"));
            payload.insert("channel".to_string(), Value::from(channel));
            copy_text(inputs, &mut payload, "threadTs");
            for credential in ["botToken", "accessToken", "connectionId"] {
                copy_text(inputs, &mut payload, credential);
            }
        }
    }

    match call_endpoint(proxy, SLACK_ENDPOINT, &Value::Object(payload)) {
        Ok(output) => ToolResult::success(output),
        Err(err) => ToolResult::failure(err),
    }
}
