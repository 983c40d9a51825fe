use serde_json::{Map, Value};

const FIELD_MAP_PREFIX: &str = "fieldMap.";

/// Request-scoped substitution source for `{{dotted.path}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    values: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) -> &mut Self {
        self.values.insert(key.to_string(), value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Walks `path` segment by segment. Each segment is matched exactly first,
    /// then case-insensitively; numeric segments index into arrays.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').map(str::trim);
        let first = segments.next().filter(|segment| !segment.is_empty())?;
        let mut current = lookup_key(&self.values, first)?;
        for segment in segments {
            if segment.is_empty() {
                return None;
            }
            current = match current {
                Value::Object(map) => lookup_key(map, segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}

fn lookup_key<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    map.get(key).or_else(|| {
        let lowered = key.to_lowercase();
        map.iter()
            .find(|(candidate, _)| candidate.to_lowercase() == lowered)
            .map(|(_, value)| value)
    })
}

/// Text form of a value when spliced into a larger string.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        Value::Bool(_) | Value::Number(_) => value.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

fn render_placeholders<F>(template: &str, mut render: F) -> String
where
    F: FnMut(&str) -> String,
{
    let mut rendered = String::with_capacity(template.len());
    let mut cursor = template;

    while let Some(start) = cursor.find("{{") {
        rendered.push_str(&cursor[..start]);
        let after_open = &cursor[start + 2..];
        let Some(close_offset) = after_open.find("}}") else {
            // Unclosed braces are literal text.
            rendered.push_str(&cursor[start..]);
            return rendered;
        };
        let token = after_open[..close_offset].trim();
        if !token.is_empty() {
            rendered.push_str(&render(token));
        }
        cursor = &after_open[close_offset + 2..];
    }

    rendered.push_str(cursor);
    rendered
}

/// Replaces every placeholder in `template`; unresolvable paths become `""`.
pub fn resolve_template(template: &str, context: &ExecutionContext) -> String {
    render_placeholders(template, |token| {
        context.lookup(token).map(value_to_text).unwrap_or_default()
    })
}

fn sole_placeholder(template: &str) -> Option<&str> {
    let inner = template.trim().strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

/// Resolves one input value.
///
/// A string made of a single placeholder yields the referenced value itself,
/// so objects and numbers keep their shape. Objects and arrays are serialized,
/// substituted and parsed back, which also resolves placeholders in keys.
pub fn resolve_value(value: &Value, context: &ExecutionContext) -> Value {
    match value {
        Value::String(template) => {
            if let Some(path) = sole_placeholder(template) {
                return context
                    .lookup(path)
                    .cloned()
                    .unwrap_or_else(|| Value::String(String::new()));
            }
            Value::String(resolve_template(template, context))
        }
        Value::Object(_) | Value::Array(_) => {
            let Ok(serialized) = serde_json::to_string(value) else {
                return value.clone();
            };
            if !serialized.contains("{{") {
                return value.clone();
            }
            let substituted = render_placeholders(&serialized, |token| {
                let text = context.lookup(token).map(value_to_text).unwrap_or_default();
                escape_json_fragment(&text)
            });
            serde_json::from_str(&substituted).unwrap_or_else(|_| value.clone())
        }
        other => other.clone(),
    }
}

fn escape_json_fragment(text: &str) -> String {
    let quoted = Value::String(text.to_string()).to_string();
    quoted[1..quoted.len() - 1].to_string()
}

/// Resolves every input of a node against `context`.
///
/// `data-table` nodes fold non-empty `fieldMap.<column>` inputs into a `data`
/// object; keys of an explicit `data` object are laid over that map.
pub fn resolve_inputs(
    node_type: &str,
    inputs: &Map<String, Value>,
    context: &ExecutionContext,
) -> Map<String, Value> {
    let mut resolved = inputs
        .iter()
        .map(|(key, value)| (key.clone(), resolve_value(value, context)))
        .collect::<Map<_, _>>();

    if node_type == "data-table" {
        compose_field_map(&mut resolved);
    }
    resolved
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(text) => text.trim().is_empty(),
        _ => false,
    }
}

fn compose_field_map(resolved: &mut Map<String, Value>) {
    let prefixed = resolved
        .keys()
        .filter(|key| key.starts_with(FIELD_MAP_PREFIX))
        .cloned()
        .collect::<Vec<_>>();
    if prefixed.is_empty() {
        return;
    }

    let mut data = Map::new();
    for key in prefixed {
        let Some(value) = resolved.remove(&key) else {
            continue;
        };
        let column = &key[FIELD_MAP_PREFIX.len()..];
        if column.is_empty() || is_blank(&value) {
            continue;
        }
        data.insert(column.to_string(), value);
    }
    if data.is_empty() {
        return;
    }

    let explicit = match resolved.get("data") {
        Some(Value::Object(map)) => Some(map.clone()),
        Some(Value::String(raw)) if !raw.trim().is_empty() => {
            serde_json::from_str::<Map<String, Value>>(raw).ok()
        }
        _ => None,
    };
    if let Some(explicit) = explicit {
        data.extend(explicit);
    }
    resolved.insert("data".to_string(), Value::Object(data));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        ExecutionContext::new()
            .with("env", json!({"SLACK_TOKEN": "xoxb-1"}))
            .with(
                "trigger",
                json!({"Body": {"name": "Ada", "tags": ["a", "b"]}, "count": 3}),
            )
    }

    #[test]
    fn template_substitutes_paths_and_blanks_missing_ones() {
        let ctx = context();
        assert_eq!(
            resolve_template("hi {{trigger.Body.name}} ({{ trigger.count }})", &ctx),
            "hi Ada (3)"
        );
        assert_eq!(resolve_template("x{{missing.path}}y", &ctx), "xy");
        assert_eq!(resolve_template("{{trigger.count.deeper}}", &ctx), "");
        assert_eq!(resolve_template("no tokens", &ctx), "no tokens");
        assert_eq!(resolve_template("open {{ only", &ctx), "open {{ only");
    }

    #[test]
    fn lookup_falls_back_to_case_insensitive_keys() {
        let ctx = context();
        assert_eq!(resolve_template("{{ENV.slack_token}}", &ctx), "xoxb-1");
        assert_eq!(resolve_template("{{trigger.body.tags.1}}", &ctx), "b");
    }

    #[test]
    fn objects_serialize_inside_templates_but_stay_structured_alone() {
        let ctx = context();
        assert_eq!(
            resolve_template("tags={{trigger.Body.tags}}", &ctx),
            r#"tags=["a","b"]"#
        );
        assert_eq!(
            resolve_value(&json!("{{trigger.Body}}"), &ctx),
            json!({"name": "Ada", "tags": ["a", "b"]})
        );
        assert_eq!(resolve_value(&json!("{{nope}}"), &ctx), json!(""));
        assert_eq!(resolve_value(&json!(42), &ctx), json!(42));
    }

    #[test]
    fn structured_inputs_resolve_like_a_string_round_trip() {
        let ctx = context();
        let input = json!({"user": {"name": "{{trigger.Body.name}}", "n": "{{trigger.count}}"}});
        let via_strings: Value =
            serde_json::from_str(&resolve_template(&input.to_string(), &ctx)).expect("json");
        assert_eq!(resolve_value(&input, &ctx), via_strings);
        assert_eq!(
            resolve_value(&input, &ctx),
            json!({"user": {"name": "Ada", "n": "3"}})
        );
    }

    #[test]
    fn substituted_quotes_do_not_break_structured_inputs() {
        let ctx = ExecutionContext::new().with("q", json!("say \"hi\"\nnow"));
        let resolved = resolve_value(&json!({"text": "{{q}}!"}), &ctx);
        assert_eq!(resolved, json!({"text": "say \"hi\"\nnow!"}));
    }

    #[test]
    fn data_table_field_map_composes_data_object() {
        let ctx = context();
        let inputs = json!({
            "operation": "create",
            "fieldMap.name": "{{trigger.Body.name}}",
            "fieldMap.empty": "",
            "fieldMap.count": "{{trigger.count}}"
        });
        let resolved = resolve_inputs(
            "data-table",
            inputs.as_object().expect("object"),
            &ctx,
        );
        assert_eq!(resolved["data"], json!({"name": "Ada", "count": 3}));
        assert!(!resolved.contains_key("fieldMap.name"));
        assert_eq!(resolved["operation"], "create");
    }

    #[test]
    fn field_map_is_skipped_when_every_mapped_value_is_empty() {
        let inputs = json!({"fieldMap.name": "{{missing}}", "data": "{\"a\":1}"});
        let resolved = resolve_inputs(
            "data-table",
            inputs.as_object().expect("object"),
            &ExecutionContext::new(),
        );
        assert_eq!(resolved["data"], json!("{\"a\":1}"));
    }

    #[test]
    fn explicit_data_keys_override_field_map_values() {
        let inputs = json!({"fieldMap.name": "from-form", "data": {"name": "from-model"}});
        let resolved = resolve_inputs(
            "data-table",
            inputs.as_object().expect("object"),
            &ExecutionContext::new(),
        );
        assert_eq!(resolved["data"], json!({"name": "from-model"}));
    }
}
