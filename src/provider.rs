use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

pub mod anthropic;
pub mod model_map;
pub mod openai;
pub mod types;

pub use model_map::{model_family, normalize_model, resolve_anthropic_model};
pub use types::{ChatMessage, CompletionRequest, ProviderTurn, ToolCall};

/// Cap on request excerpts kept for diagnostics.
pub const ERROR_CONTEXT_LIMIT: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("AI provider {provider} returned status {status}: {body}")]
    Status {
        provider: ProviderKind,
        status: u16,
        body: String,
        request: String,
    },
    #[error("AI provider {provider} request failed: {reason}")]
    Transport {
        provider: ProviderKind,
        reason: String,
    },
    #[error("AI provider {provider} response parse failure: {reason}")]
    ParseFailure {
        provider: ProviderKind,
        reason: String,
    },
}

impl ProviderError {
    pub fn provider(&self) -> ProviderKind {
        match self {
            Self::Status { provider, .. }
            | Self::Transport { provider, .. }
            | Self::ParseFailure { provider, .. } => *provider,
        }
    }
}

/// Provider family, decided by the prefix of the resolved API key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    OpenRouter,
    Groq,
    Xai,
    Gemini,
}

/// Longest prefixes first: `sk-ant-` and `sk-or-` both start with `sk-`.
const KEY_PREFIXES: &[(&str, ProviderKind)] = &[
    ("sk-ant-", ProviderKind::Anthropic),
    ("sk-or-", ProviderKind::OpenRouter),
    ("gsk_", ProviderKind::Groq),
    ("xai-", ProviderKind::Xai),
    ("AIza", ProviderKind::Gemini),
    ("sk-", ProviderKind::OpenAi),
];

impl ProviderKind {
    pub const ALL: [ProviderKind; 6] = [
        Self::Anthropic,
        Self::OpenAi,
        Self::OpenRouter,
        Self::Groq,
        Self::Xai,
        Self::Gemini,
    ];

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim();
        KEY_PREFIXES
            .iter()
            .find(|(prefix, _)| key.starts_with(prefix))
            .map(|(_, kind)| *kind)
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Anthropic => "claude-sonnet-4-5",
            Self::OpenAi => "gpt-4o-mini",
            Self::OpenRouter => "openai/gpt-4o-mini",
            Self::Groq => "llama-3.3-70b-versatile",
            Self::Xai => "grok-2-latest",
            Self::Gemini => "gemini-2.0-flash",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            Self::Anthropic => "https://api.anthropic.com/v1",
            Self::OpenAi => "https://api.openai.com/v1",
            Self::OpenRouter => "https://openrouter.ai/api/v1",
            Self::Groq => "https://api.groq.com/openai/v1",
            Self::Xai => "https://api.x.ai/v1",
            Self::Gemini => "https://generativelanguage.googleapis.com/v1beta/openai",
        }
    }

    pub fn is_anthropic(self) -> bool {
        self == Self::Anthropic
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
            Self::Groq => "groq",
            Self::Xai => "xai",
            Self::Gemini => "gemini",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One round trip to an AI chat-completion API.
pub trait ChatProvider: Send + Sync {
    fn complete(&self, request: &CompletionRequest) -> Result<ProviderTurn, ProviderError>;
}

pub(crate) fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}…", &text[..cut]),
        None => text.to_string(),
    }
}

/// Blocking client for the OpenAI-compatible and Anthropic chat APIs.
pub struct HttpChatProvider {
    agent: ureq::Agent,
    base_urls: HashMap<ProviderKind, String>,
}

impl HttpChatProvider {
    pub fn new(timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_urls: HashMap::new(),
        }
    }

    pub fn with_base_url(mut self, provider: ProviderKind, base_url: &str) -> Self {
        self.base_urls
            .insert(provider, base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn base_url(&self, provider: ProviderKind) -> &str {
        self.base_urls
            .get(&provider)
            .map(String::as_str)
            .unwrap_or_else(|| provider.default_base_url())
    }

    fn post(
        &self,
        provider: ProviderKind,
        request: ureq::Request,
        body: Value,
    ) -> Result<Value, ProviderError> {
        let response = match request
            .set("Content-Type", "application/json")
            .send_json(body.clone())
        {
            Ok(response) => response,
            Err(ureq::Error::Status(status, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(ProviderError::Status {
                    provider,
                    status,
                    body: text,
                    request: truncate_chars(&body.to_string(), ERROR_CONTEXT_LIMIT),
                });
            }
            Err(err) => {
                return Err(ProviderError::Transport {
                    provider,
                    reason: err.to_string(),
                })
            }
        };
        let text = response
            .into_string()
            .map_err(|err| ProviderError::Transport {
                provider,
                reason: err.to_string(),
            })?;
        serde_json::from_str(&text).map_err(|err| ProviderError::ParseFailure {
            provider,
            reason: format!("invalid json body: {err}"),
        })
    }
}

impl ChatProvider for HttpChatProvider {
    fn complete(&self, request: &CompletionRequest) -> Result<ProviderTurn, ProviderError> {
        let provider = request.provider;
        let base = self.base_url(provider);
        if provider.is_anthropic() {
            let http = self
                .agent
                .post(&format!("{base}/messages"))
                .set("x-api-key", &request.api_key)
                .set("anthropic-version", anthropic::API_VERSION);
            let value = self.post(provider, http, anthropic::request_body(request))?;
            anthropic::parse_response(&value)
        } else {
            let http = self
                .agent
                .post(&format!("{base}/chat/completions"))
                .set("Authorization", &format!("Bearer {}", request.api_key));
            let value = self.post(provider, http, openai::request_body(request))?;
            openai::parse_response(provider, &value)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefixes_pick_provider_family() {
        assert_eq!(
            ProviderKind::from_key("sk-ant-api03-abc"),
            Some(ProviderKind::Anthropic)
        );
        assert_eq!(
            ProviderKind::from_key("sk-or-v1-abc"),
            Some(ProviderKind::OpenRouter)
        );
        assert_eq!(ProviderKind::from_key("sk-proj-abc"), Some(ProviderKind::OpenAi));
        assert_eq!(ProviderKind::from_key("gsk_abc"), Some(ProviderKind::Groq));
        assert_eq!(ProviderKind::from_key("xai-abc"), Some(ProviderKind::Xai));
        assert_eq!(ProviderKind::from_key("AIzaSyabc"), Some(ProviderKind::Gemini));
        assert_eq!(ProviderKind::from_key("pk_live_abc"), None);
    }

    #[test]
    fn base_url_overrides_are_trimmed() {
        let provider = HttpChatProvider::new(Duration::from_secs(1))
            .with_base_url(ProviderKind::OpenAi, "http://127.0.0.1:9/v1/");
        assert_eq!(provider.base_url(ProviderKind::OpenAi), "http://127.0.0.1:9/v1");
        assert_eq!(
            provider.base_url(ProviderKind::Groq),
            "https://api.groq.com/openai/v1"
        );
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé…");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
