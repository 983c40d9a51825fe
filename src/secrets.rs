use crate::provider::{normalize_model, ProviderKind};
use crate::shared::EventLog;
use crate::store::FlowStore;
use crate::workflow::WorkflowNode;
use serde_json::{Map, Value};
use std::sync::{Arc, OnceLock};

/// Flow variable names tried when the agent names no key explicitly.
pub const WELL_KNOWN_KEY_NAMES: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "OPENROUTER_API_KEY",
    "GROQ_API_KEY",
    "XAI_API_KEY",
    "GEMINI_API_KEY",
    "AI_API_KEY",
];

const MIN_KEY_CHARS: usize = 8;

/// Flow variables of one request, fetched from the store on first use.
pub struct RequestSecrets<'a> {
    store: &'a dyn FlowStore,
    flow_id: &'a str,
    log: &'a EventLog,
    loaded: OnceLock<Arc<Map<String, Value>>>,
}

impl<'a> RequestSecrets<'a> {
    pub fn new(store: &'a dyn FlowStore, flow_id: &'a str, log: &'a EventLog) -> Self {
        Self {
            store,
            flow_id,
            log,
            loaded: OnceLock::new(),
        }
    }

    /// Name to value map. A store failure leaves the map empty for the rest
    /// of the request.
    pub fn get(&self) -> Arc<Map<String, Value>> {
        self.loaded
            .get_or_init(|| {
                let variables = match self.store.flow_variables(self.flow_id) {
                    Ok(variables) => variables,
                    Err(err) => {
                        self.log.warn(
                            "secrets.load_failed",
                            Some(self.flow_id),
                            &err.to_string(),
                        );
                        Vec::new()
                    }
                };
                let map = variables
                    .into_iter()
                    .map(|variable| (variable.name, Value::String(variable.value)))
                    .collect::<Map<String, Value>>();
                Arc::new(map)
            })
            .clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySource {
    SecretReference(String),
    NamedVariable(String),
    WellKnown(String),
    PrefixScan(String),
    Configured,
    ProcessEnv(String),
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    pub source: KeySource,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("provider", &self.provider)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("source", &self.source)
            .finish()
    }
}

/// Key and model settings read from the agent node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentKeyConfig {
    pub api_key: Option<String>,
    pub api_key_variable: Option<String>,
    pub model: Option<String>,
}

impl AgentKeyConfig {
    pub fn from_node(agent: &WorkflowNode) -> Self {
        let text = |key: &str| agent.input_str(key).map(str::to_string);
        Self {
            api_key: text("apiKey"),
            api_key_variable: text("apiKeyVariable"),
            model: text("model"),
        }
    }
}

/// `NAME` from `{{env.NAME}}`, tolerating inner whitespace.
pub fn env_reference(raw: &str) -> Option<&str> {
    let inner = raw
        .trim()
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();
    let name = inner.strip_prefix("env.")?.trim();
    (!name.is_empty()).then_some(name)
}

/// Recognized provider prefix, plausible length, no whitespace or placeholders.
pub fn looks_like_key(raw: &str) -> bool {
    let raw = raw.trim();
    raw.len() >= MIN_KEY_CHARS
        && !raw.contains("{{")
        && !raw.chars().any(char::is_whitespace)
        && ProviderKind::from_key(raw).is_some()
}

fn lookup<'m>(secrets: &'m Map<String, Value>, name: &str) -> Option<&'m str> {
    secrets
        .get(name)
        .or_else(|| {
            secrets
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value)
        })
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty() && !value.contains("{{"))
}

fn credentials(config: &AgentKeyConfig, api_key: &str, source: KeySource) -> Credentials {
    let provider = ProviderKind::from_key(api_key).unwrap_or(ProviderKind::OpenAi);
    Credentials {
        provider,
        api_key: api_key.to_string(),
        model: normalize_model(config.model.as_deref(), provider),
        source,
    }
}

/// First usable API key, searched in a fixed order:
/// an `{{env.NAME}}` reference in `apiKey`, the variable named by
/// `apiKeyVariable`, the well-known variable names, any variable whose value
/// carries a provider prefix, the raw `apiKey`, then the process environment.
pub fn resolve_credentials(
    config: &AgentKeyConfig,
    secrets: &Map<String, Value>,
    fallback_env_vars: &[String],
    env: impl Fn(&str) -> Option<String>,
) -> Option<Credentials> {
    let configured = config.api_key.as_deref().map(str::trim).unwrap_or_default();

    if let Some(name) = env_reference(configured) {
        if let Some(key) = lookup(secrets, name) {
            return Some(credentials(
                config,
                key,
                KeySource::SecretReference(name.to_string()),
            ));
        }
    }

    if let Some(name) = config.api_key_variable.as_deref().map(str::trim) {
        if let Some(key) = lookup(secrets, name) {
            return Some(credentials(
                config,
                key,
                KeySource::NamedVariable(name.to_string()),
            ));
        }
    }

    for name in WELL_KNOWN_KEY_NAMES {
        if let Some(key) = lookup(secrets, name) {
            return Some(credentials(
                config,
                key,
                KeySource::WellKnown(name.to_string()),
            ));
        }
    }

    for (name, value) in secrets {
        if let Some(key) = value.as_str().filter(|value| looks_like_key(value)) {
            return Some(credentials(
                config,
                key.trim(),
                KeySource::PrefixScan(name.clone()),
            ));
        }
    }

    if looks_like_key(configured) {
        return Some(credentials(config, configured, KeySource::Configured));
    }

    fallback_env_vars.iter().find_map(|name| {
        let value = env(name)?;
        let key = value.trim();
        (!key.is_empty()).then(|| credentials(config, key, KeySource::ProcessEnv(name.clone())))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object")
    }

    fn config(
        api_key: Option<&str>,
        variable: Option<&str>,
        model: Option<&str>,
    ) -> AgentKeyConfig {
        AgentKeyConfig {
            api_key: api_key.map(str::to_string),
            api_key_variable: variable.map(str::to_string),
            model: model.map(str::to_string),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn env_reference_wins_over_everything() {
        let found = resolve_credentials(
            &config(Some("{{ env.MY_KEY }}"), Some("OTHER"), Some("gpt-4o")),
            &secrets(json!({
                "MY_KEY": "sk-ant-api03-primary",
                "OTHER": "sk-other-secondary",
                "OPENAI_API_KEY": "sk-proj-wellknown"
            })),
            &[],
            no_env,
        )
        .expect("credentials");
        assert_eq!(found.api_key, "sk-ant-api03-primary");
        assert_eq!(found.provider, ProviderKind::Anthropic);
        assert_eq!(found.model, "claude-sonnet-4-5");
        assert_eq!(found.source, KeySource::SecretReference("MY_KEY".to_string()));
    }

    #[test]
    fn named_variable_then_well_known_names() {
        let vars = secrets(json!({"TEAM_KEY": "gsk_team", "ANTHROPIC_API_KEY": "sk-ant-known"}));
        let named = resolve_credentials(&config(None, Some("team_key"), None), &vars, &[], no_env)
            .expect("named");
        assert_eq!(named.source, KeySource::NamedVariable("team_key".to_string()));
        assert_eq!(named.provider, ProviderKind::Groq);

        let known = resolve_credentials(&config(None, None, None), &vars, &[], no_env)
            .expect("known");
        assert_eq!(known.source, KeySource::WellKnown("ANTHROPIC_API_KEY".to_string()));
    }

    #[test]
    fn prefix_scan_then_raw_value_then_process_env() {
        let scanned = resolve_credentials(
            &config(None, None, None),
            &secrets(json!({"misc": "hello", "llm": "xai-1234567890"})),
            &[],
            no_env,
        )
        .expect("scanned");
        assert_eq!(scanned.source, KeySource::PrefixScan("llm".to_string()));

        let raw = resolve_credentials(
            &config(Some("sk-or-v1-abcdef"), None, None),
            &Map::new(),
            &[],
            no_env,
        )
        .expect("raw");
        assert_eq!(raw.source, KeySource::Configured);
        assert_eq!(raw.provider, ProviderKind::OpenRouter);

        let fallback = resolve_credentials(
            &config(Some("{{env.MISSING}}"), None, None),
            &Map::new(),
            &["FLOWCHAT_AI_KEY".to_string()],
            |name| (name == "FLOWCHAT_AI_KEY").then(|| "sk-env-abcdef".to_string()),
        )
        .expect("env");
        assert_eq!(fallback.source, KeySource::ProcessEnv("FLOWCHAT_AI_KEY".to_string()));
    }

    #[test]
    fn nothing_usable_yields_none() {
        assert!(resolve_credentials(
            &config(Some("{{env.NOPE}}"), Some("ALSO_NOPE"), None),
            &secrets(json!({"plain": "not a key"})),
            &["UNSET".to_string()],
            no_env,
        )
        .is_none());
    }

    #[test]
    fn unresolved_model_placeholder_uses_key_family_default() {
        let found = resolve_credentials(
            &config(Some("AIzaSyExampleKey"), None, Some("{{env.MODEL}}")),
            &Map::new(),
            &[],
            no_env,
        )
        .expect("credentials");
        assert_eq!(found.provider, ProviderKind::Gemini);
        assert_eq!(found.model, "gemini-2.0-flash");
    }

    #[test]
    fn debug_output_redacts_key() {
        let found = resolve_credentials(
            &config(Some("sk-proj-secret"), None, None),
            &Map::new(),
            &[],
            no_env,
        )
        .expect("credentials");
        assert!(!format!("{found:?}").contains("secret"));
    }
}
