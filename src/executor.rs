use crate::resolve::{resolve_inputs, ExecutionContext};
use crate::store::FlowStore;
use crate::workflow::{NodeKind, WorkflowNode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

pub mod data_table;
pub mod http_request;
pub mod proxy;
pub mod slack;

pub use proxy::{endpoint_for, HttpProxyClient, ProxyClient, ProxyError};

/// Normalized outcome of running one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error.into()),
        }
    }

    pub fn failure_with_output(error: impl Into<String>, output: Value) -> Self {
        Self {
            success: false,
            output: Some(output),
            error: Some(error.into()),
        }
    }
}

/// Custom executor for an integration node type.
pub trait NodeHandler: Send + Sync {
    fn execute(&self, inputs: &Map<String, Value>) -> ToolResult;
}

impl<F> NodeHandler for F
where
    F: Fn(&Map<String, Value>) -> ToolResult + Send + Sync,
{
    fn execute(&self, inputs: &Map<String, Value>) -> ToolResult {
        self(inputs)
    }
}

pub(crate) fn str_input<'a>(inputs: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    inputs
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Parses a value that may be structured already or carry JSON text.
/// Malformed text yields `None`.
pub(crate) fn json_input(inputs: &Map<String, Value>, key: &str) -> Option<Value> {
    match inputs.get(key)? {
        Value::Null => None,
        Value::String(raw) if raw.trim().is_empty() => None,
        Value::String(raw) => serde_json::from_str(raw).ok(),
        other => Some(other.clone()),
    }
}

pub struct NodeExecutor {
    proxy: Arc<dyn ProxyClient>,
    store: Arc<dyn FlowStore>,
    http: ureq::Agent,
    handlers: HashMap<String, Arc<dyn NodeHandler>>,
}

impl NodeExecutor {
    pub fn new(proxy: Arc<dyn ProxyClient>, store: Arc<dyn FlowStore>, timeout: Duration) -> Self {
        Self {
            proxy,
            store,
            http: ureq::AgentBuilder::new().timeout(timeout).build(),
            handlers: HashMap::new(),
        }
    }

    /// Routes an integration type to `handler` instead of the proxy.
    pub fn register_handler(&mut self, node_type: &str, handler: Arc<dyn NodeHandler>) {
        self.handlers.insert(node_type.to_string(), handler);
    }

    /// Runs `node` with already-resolved inputs. Never panics or errors;
    /// every failure comes back as `success: false`.
    pub fn execute(&self, node: &WorkflowNode, inputs: &Map<String, Value>) -> ToolResult {
        match node.kind() {
            Some(NodeKind::HttpRequest) => http_request::execute(&self.http, inputs),
            Some(NodeKind::Slack) => slack::execute(self.proxy.as_ref(), &node.node_type, inputs),
            Some(NodeKind::DataTable) => data_table::execute(self.store.as_ref(), inputs),
            Some(NodeKind::Integration(node_type)) => match self.handlers.get(&node_type) {
                Some(handler) => handler.execute(inputs),
                None => proxy::execute(self.proxy.as_ref(), &node_type, inputs),
            },
            Some(NodeKind::AiAgent | NodeKind::ControlFlow) => ToolResult::failure(format!(
                "node type `{}` cannot be executed as an action",
                node.node_type
            )),
            None => ToolResult::failure(format!("node `{}` has no type", node.id)),
        }
    }

    /// Lays `overrides` over the node's configured inputs, resolves
    /// placeholders against `context` and executes.
    pub fn run_node(
        &self,
        node: &WorkflowNode,
        overrides: &Map<String, Value>,
        context: &ExecutionContext,
    ) -> ToolResult {
        let mut merged = node.inputs.clone();
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        let resolved = resolve_inputs(&node.node_type, &merged, context);
        self.execute(node, &resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteFlowStore;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingProxy {
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl ProxyClient for RecordingProxy {
        fn invoke(&self, endpoint: &str, payload: &Value) -> Result<Value, ProxyError> {
            self.calls
                .lock()
                .expect("lock calls")
                .push((endpoint.to_string(), payload.clone()));
            Ok(json!({"ok": true}))
        }
    }

    fn executor(proxy: Arc<RecordingProxy>) -> NodeExecutor {
        let store = Arc::new(SqliteFlowStore::open_in_memory().expect("store"));
        NodeExecutor::new(proxy, store, Duration::from_secs(2))
    }

    #[test]
    fn run_node_prefers_overrides_and_resolves_placeholders() {
        let proxy = Arc::new(RecordingProxy::default());
        let executor = executor(proxy.clone());
        let node = WorkflowNode::new(
            "n-1",
            "gmail",
            json!({"to": "{{env.SUPPORT_EMAIL}}", "subject": "preset"})
                .as_object()
                .cloned()
                .expect("inputs"),
        );
        let context = ExecutionContext::new().with("env", json!({"SUPPORT_EMAIL": "a@b.test"}));
        let overrides = json!({"subject": "from model"})
            .as_object()
            .cloned()
            .expect("overrides");

        let result = executor.run_node(&node, &overrides, &context);
        assert!(result.success);

        let calls = proxy.calls.lock().expect("lock");
        assert_eq!(calls[0].0, "gmail-proxy");
        assert_eq!(calls[0].1["to"], "a@b.test");
        assert_eq!(calls[0].1["subject"], "from model");
        assert_eq!(calls[0].1["action"], "execute");
    }

    #[test]
    fn registered_handlers_take_over_integration_types() {
        let proxy = Arc::new(RecordingProxy::default());
        let mut executor = executor(proxy.clone());
        executor.register_handler(
            "echo",
            Arc::new(|inputs: &Map<String, Value>| ToolResult::success(Value::Object(inputs.clone()))),
        );
        let node = WorkflowNode::new("n-2", "echo", Map::new());
        let result = executor.execute(&node, &Map::new());
        assert!(result.success);
        assert!(proxy.calls.lock().expect("lock").is_empty());
    }

    #[test]
    fn control_flow_and_untyped_nodes_fail_without_panicking() {
        let executor = executor(Arc::new(RecordingProxy::default()));
        let result = executor.execute(&WorkflowNode::new("c", "if-else", Map::new()), &Map::new());
        assert!(!result.success);
        let result = executor.execute(&WorkflowNode::new("u", "", Map::new()), &Map::new());
        assert_eq!(result.error.as_deref(), Some("node `u` has no type"));
    }
}
