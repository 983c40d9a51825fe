use crate::workflow::WorkflowNode;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};

pub mod registry;

pub use registry::{schema_for, FieldKind, FieldSpec, NodeSchema};

const ID_SUFFIX_CHARS: usize = 12;
const MAX_TOOL_NAME_CHARS: usize = 64;

/// Prefilled fields with these names stay visible so the model can override them.
pub const OVERRIDABLE_FIELDS: &[&str] = &[
    "text",
    "message",
    "body",
    "subject",
    "data",
    "title",
    "content",
    "description",
    "query",
    "prompt",
    "notes",
    "comment",
    "summary",
    "html",
];

/// Fields that never reach the model.
pub const INTERNAL_FIELDS: &[&str] = &[
    "apiKey",
    "api_key",
    "token",
    "accessToken",
    "access_token",
    "refreshToken",
    "botToken",
    "secret",
    "clientSecret",
    "webhookSecret",
    "password",
    "credentials",
    "connectionMethod",
    "connectionType",
    "connectionId",
    "authType",
    "useCustomApiKey",
];

fn is_internal(field: &str) -> bool {
    INTERNAL_FIELDS
        .iter()
        .any(|internal| internal.eq_ignore_ascii_case(field))
}

fn is_overridable(field: &str) -> bool {
    OVERRIDABLE_FIELDS
        .iter()
        .any(|name| name.eq_ignore_ascii_case(field))
}

fn is_empty_value(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    #[serde(rename = "type")]
    pub kind: FieldKind,
    pub description: String,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolParameters {
    #[serde(rename = "type")]
    pub schema_type: &'static str,
    pub properties: BTreeMap<String, ParameterSpec>,
    pub required: Vec<String>,
}

impl Default for ToolParameters {
    fn default() -> Self {
        Self {
            schema_type: "object",
            properties: BTreeMap::new(),
            required: Vec::new(),
        }
    }
}

impl ToolParameters {
    fn add(&mut self, name: &str, spec: ParameterSpec, required: bool) {
        self.properties.insert(name.to_string(), spec);
        if required && !self.required.iter().any(|existing| existing == name) {
            self.required.push(name.to_string());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: ToolParameters,
}

/// Tools offered to the model plus the node behind each tool name.
#[derive(Debug, Clone, Default)]
pub struct ToolSet {
    pub tools: Vec<ToolDefinition>,
    pub node_map: HashMap<String, WorkflowNode>,
    /// Ids of nodes dropped because no collision-free name could be derived.
    pub dropped: Vec<String>,
}

impl ToolSet {
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn node_for(&self, tool_name: &str) -> Option<&WorkflowNode> {
        self.node_map.get(tool_name)
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '_' { ch } else { '_' })
        .collect()
}

fn join_name(node_type: &str, suffix: &str) -> String {
    let type_part = sanitize(node_type);
    let budget = MAX_TOOL_NAME_CHARS.saturating_sub(suffix.len() + 1);
    let type_part = type_part.chars().take(budget).collect::<String>();
    format!("{type_part}_{suffix}")
}

/// `<type>_<last 12 chars of id>`, restricted to `[A-Za-z0-9_]`.
pub fn tool_name(node: &WorkflowNode) -> String {
    let chars = node.id.chars().collect::<Vec<_>>();
    let start = chars.len().saturating_sub(ID_SUFFIX_CHARS);
    let suffix = sanitize(&chars[start..].iter().collect::<String>());
    join_name(&node.node_type, &suffix)
}

fn hashed_tool_name(node: &WorkflowNode) -> String {
    let digest = Sha256::digest(node.id.as_bytes());
    let hex = digest
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<String>();
    join_name(&node.node_type, &hex[..ID_SUFFIX_CHARS])
}

fn describe(node: &WorkflowNode, base: &str, preset: &[String]) -> String {
    let mut description = match &node.label {
        Some(label) => format!("{label}: {base}"),
        None => base.to_string(),
    };
    if !preset.is_empty() {
        description.push_str(&format!(". Already configured: {}", preset.join(", ")));
    }
    description
}

fn kind_of(value: Option<&Value>) -> FieldKind {
    match value {
        Some(Value::Number(_)) => FieldKind::Number,
        Some(Value::Bool(_)) => FieldKind::Boolean,
        _ => FieldKind::String,
    }
}

fn registry_parameters(node: &WorkflowNode, schema: &NodeSchema) -> (ToolParameters, Vec<String>) {
    let mut parameters = ToolParameters::default();
    let mut preset = Vec::new();
    for spec in schema.fields {
        if is_internal(spec.name) {
            continue;
        }
        let prefilled = !is_empty_value(node.inputs.get(spec.name));
        if prefilled && !is_overridable(spec.name) {
            preset.push(spec.name.to_string());
            continue;
        }
        parameters.add(
            spec.name,
            ParameterSpec {
                kind: spec.kind,
                description: spec.description.to_string(),
                options: spec.options.iter().map(|opt| opt.to_string()).collect(),
            },
            spec.required && !prefilled,
        );
    }
    (parameters, preset)
}

fn introspected_parameters(node: &WorkflowNode) -> (ToolParameters, Vec<String>) {
    let mut parameters = ToolParameters::default();
    let mut preset = Vec::new();
    for (name, value) in &node.inputs {
        if is_internal(name) {
            continue;
        }
        let empty = is_empty_value(Some(value));
        if empty {
            parameters.add(
                name,
                ParameterSpec {
                    kind: FieldKind::String,
                    description: format!("Value for `{name}`"),
                    options: Vec::new(),
                },
                true,
            );
        } else if is_overridable(name) {
            parameters.add(
                name,
                ParameterSpec {
                    kind: kind_of(Some(value)),
                    description: format!("Optional override for `{name}`"),
                    options: Vec::new(),
                },
                false,
            );
        } else {
            preset.push(name.clone());
        }
    }
    (parameters, preset)
}

fn definition_for(node: &WorkflowNode, name: String) -> ToolDefinition {
    let (parameters, preset, base) = match schema_for(&node.node_type) {
        Some(schema) => {
            let (parameters, preset) = registry_parameters(node, schema);
            (parameters, preset, schema.description.to_string())
        }
        None => {
            let (parameters, preset) = introspected_parameters(node);
            (
                parameters,
                preset,
                format!("Run the `{}` integration", node.node_type),
            )
        }
    };
    ToolDefinition {
        name,
        description: describe(node, &base, &preset),
        parameters,
    }
}

/// Converts candidate downstream nodes into tool schemas.
///
/// Untyped, control-flow, disabled and excluded nodes are skipped. A name
/// already taken by an earlier node falls back to a digest of the full id.
pub fn build_tools(nodes: &[&WorkflowNode], excluded_ids: &HashSet<String>) -> ToolSet {
    let mut set = ToolSet::default();
    for node in nodes {
        let Some(kind) = node.kind() else {
            continue;
        };
        if !kind.is_tool_candidate() || node.disabled || excluded_ids.contains(&node.id) {
            continue;
        }

        let mut name = tool_name(node);
        if set.node_map.contains_key(&name) {
            name = hashed_tool_name(node);
        }
        if set.node_map.contains_key(&name) {
            set.dropped.push(node.id.clone());
            continue;
        }

        set.tools.push(definition_for(node, name.clone()));
        set.node_map.insert(name, (*node).clone());
    }
    set
}

/// OpenAI `tools` array: `{type: "function", function: {name, description, parameters}}`.
pub fn to_openai_tools(tools: &[ToolDefinition]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "type": "function",
                "function": {
                    "name": tool.name,
                    "description": tool.description,
                    "parameters": tool.parameters,
                }
            })
        })
        .collect()
}

/// Re-envelopes OpenAI tools as Anthropic `{name, description, input_schema}`.
pub fn openai_to_anthropic_tools(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            let function = tool.get("function").unwrap_or(tool);
            json!({
                "name": function.get("name").cloned().unwrap_or(Value::Null),
                "description": function.get("description").cloned().unwrap_or(Value::Null),
                "input_schema": function
                    .get("parameters")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
        })
        .collect()
}
