use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const AGENT_NODE_TYPE: &str = "ai-agent";

/// Node types that steer the graph rather than act on the outside world.
pub const CONTROL_FLOW_NODE_TYPES: &[&str] = &[
    "condition",
    "if-else",
    "switch",
    "router",
    "set-variable",
    "variable",
    "trigger",
    "chat-trigger",
    "webhook-trigger",
    "manual-trigger",
    "schedule-trigger",
    "response",
    "respond-to-webhook",
    "end",
    "loop",
    "for-each",
    AGENT_NODE_TYPE,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    HttpRequest,
    Slack,
    DataTable,
    AiAgent,
    ControlFlow,
    Integration(String),
}

impl NodeKind {
    pub fn parse(node_type: &str) -> Option<Self> {
        let normalized = node_type.trim();
        if normalized.is_empty() {
            return None;
        }
        let kind = match normalized {
            "http-request" => Self::HttpRequest,
            "slack" | "slack-webhook" => Self::Slack,
            "data-table" => Self::DataTable,
            AGENT_NODE_TYPE => Self::AiAgent,
            other if CONTROL_FLOW_NODE_TYPES.contains(&other) => Self::ControlFlow,
            other => Self::Integration(other.to_string()),
        };
        Some(kind)
    }

    pub fn is_tool_candidate(&self) -> bool {
        !matches!(self, Self::AiAgent | Self::ControlFlow)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNodeData {
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    disabled: Option<bool>,
    #[serde(default)]
    inputs: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNode {
    id: String,
    #[serde(default, rename = "type")]
    node_type: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    disabled: Option<bool>,
    #[serde(default)]
    inputs: Option<Map<String, Value>>,
    #[serde(default)]
    data: Option<RawNodeData>,
}

/// One configured unit of work in a workflow graph.
///
/// Editor exports nest `type`, `label`, `disabled` and `inputs` under `data`;
/// top-level values win when both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawNode", rename_all = "camelCase")]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl From<RawNode> for WorkflowNode {
    fn from(raw: RawNode) -> Self {
        let data = raw.data.unwrap_or_default();
        let node_type = raw
            .node_type
            .filter(|value| !value.trim().is_empty())
            .or(data.node_type)
            .unwrap_or_default();
        Self {
            id: raw.id,
            node_type: node_type.trim().to_string(),
            label: raw.label.or(data.label).filter(|l| !l.trim().is_empty()),
            disabled: raw.disabled.or(data.disabled).unwrap_or(false),
            inputs: raw.inputs.or(data.inputs).unwrap_or_default(),
        }
    }
}

impl WorkflowNode {
    pub fn new(id: &str, node_type: &str, inputs: Map<String, Value>) -> Self {
        Self {
            id: id.to_string(),
            node_type: node_type.to_string(),
            label: None,
            disabled: false,
            inputs,
        }
    }

    pub fn kind(&self) -> Option<NodeKind> {
        NodeKind::parse(&self.node_type)
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.inputs
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Reads a list of ids from an input that may be a JSON array or a
    /// comma-separated string.
    pub fn input_id_list(&self, key: &str) -> Vec<String> {
        match self.inputs.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            Some(Value::String(raw)) => {
                if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) {
                    return items
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::trim)
                        .filter(|id| !id.is_empty())
                        .map(str::to_string)
                        .collect();
                }
                raw.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: &str, target: &str) -> Self {
        Self {
            id: None,
            source: source.to_string(),
            target: target.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl FlowGraph {
    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|node| node.id == id)
    }

    pub fn agent_node(&self) -> Option<&WorkflowNode> {
        self.nodes
            .iter()
            .find(|node| node.kind() == Some(NodeKind::AiAgent))
    }

    /// Nodes one edge away from `source_id`, in edge order, without repeats.
    pub fn downstream_nodes(&self, source_id: &str) -> Vec<&WorkflowNode> {
        let mut seen = HashSet::new();
        self.edges
            .iter()
            .filter(|edge| edge.source == source_id)
            .filter(|edge| seen.insert(edge.target.as_str()))
            .filter_map(|edge| self.node(&edge.target))
            .collect()
    }
}
