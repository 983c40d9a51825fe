use super::ConfigError;
use crate::provider::ProviderKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub base_url: String,
    /// Environment variable holding the bearer key sent to the proxies.
    pub service_key_env: Option<String>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:54321/functions/v1".to_string(),
            service_key_env: Some("FLOWCHAT_PROXY_KEY".to_string()),
        }
    }
}

/// Per-family API base URL overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProviderUrls {
    pub anthropic_base_url: Option<String>,
    pub openai_base_url: Option<String>,
    pub openrouter_base_url: Option<String>,
    pub groq_base_url: Option<String>,
    pub xai_base_url: Option<String>,
    pub gemini_base_url: Option<String>,
}

impl ProviderUrls {
    pub fn base_url(&self, provider: ProviderKind) -> Option<&str> {
        let configured = match provider {
            ProviderKind::Anthropic => &self.anthropic_base_url,
            ProviderKind::OpenAi => &self.openai_base_url,
            ProviderKind::OpenRouter => &self.openrouter_base_url,
            ProviderKind::Groq => &self.groq_base_url,
            ProviderKind::Xai => &self.xai_base_url,
            ProviderKind::Gemini => &self.gemini_base_url,
        };
        configured
            .as_deref()
            .map(str::trim)
            .filter(|url| !url.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub bind_address: String,
    pub database_path: PathBuf,
    pub log_path: Option<PathBuf>,
    pub http_timeout_seconds: u64,
    pub temperature: f64,
    pub proxy: ProxyConfig,
    pub providers: ProviderUrls,
    pub fallback_key_env_vars: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8787".to_string(),
            database_path: PathBuf::from("flowchat.db"),
            log_path: None,
            http_timeout_seconds: 60,
            temperature: 0.7,
            proxy: ProxyConfig::default(),
            providers: ProviderUrls::default(),
            fallback_key_env_vars: vec![
                "OPENAI_API_KEY".to_string(),
                "ANTHROPIC_API_KEY".to_string(),
                "AI_API_KEY".to_string(),
            ],
        }
    }
}

impl ServerConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_address.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`bind_address` must be non-empty".to_string(),
            ));
        }
        if self.database_path.as_os_str().is_empty() {
            return Err(ConfigError::Settings(
                "`database_path` must be non-empty".to_string(),
            ));
        }
        if self.http_timeout_seconds == 0 {
            return Err(ConfigError::Settings(
                "`http_timeout_seconds` must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::Settings(format!(
                "`temperature` must be between 0 and 2, got {}",
                self.temperature
            )));
        }
        if self.proxy.base_url.trim().is_empty() {
            return Err(ConfigError::Settings(
                "`proxy.base_url` must be non-empty".to_string(),
            ));
        }
        for provider in ProviderKind::ALL {
            if let Some(url) = self.providers.base_url(provider) {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err(ConfigError::Settings(format!(
                        "`providers.{provider}_base_url` must be an http(s) url"
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_seconds)
    }

    /// Proxy bearer key read from the configured environment variable.
    pub fn proxy_service_key(&self) -> Option<String> {
        let name = self.proxy.service_key_env.as_deref()?.trim();
        if name.is_empty() {
            return None;
        }
        std::env::var(name).ok().filter(|key| !key.trim().is_empty())
    }
}
