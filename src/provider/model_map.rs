use crate::provider::ProviderKind;

/// Expands the short Anthropic aliases; other names pass through.
pub fn resolve_anthropic_model(model: &str) -> String {
    match model.trim() {
        "sonnet" => "claude-sonnet-4-5".to_string(),
        "opus" => "claude-opus-4-1".to_string(),
        "haiku" => "claude-haiku-4-5".to_string(),
        other => other.to_string(),
    }
}

/// Family a model name obviously belongs to, if any.
pub fn model_family(model: &str) -> Option<ProviderKind> {
    let model = model.trim().to_ascii_lowercase();
    if model.contains('/') {
        return Some(ProviderKind::OpenRouter);
    }
    if model.starts_with("claude") || matches!(model.as_str(), "sonnet" | "opus" | "haiku") {
        Some(ProviderKind::Anthropic)
    } else if model.starts_with("gpt-")
        || model.starts_with("o1")
        || model.starts_with("o3")
        || model.starts_with("o4")
        || model.starts_with("chatgpt")
    {
        Some(ProviderKind::OpenAi)
    } else if model.starts_with("grok") {
        Some(ProviderKind::Xai)
    } else if model.starts_with("gemini") {
        Some(ProviderKind::Gemini)
    } else if ["llama", "mixtral", "gemma"]
        .iter()
        .any(|prefix| model.starts_with(prefix))
    {
        Some(ProviderKind::Groq)
    } else {
        None
    }
}

/// Model to send to `provider`.
///
/// An empty name or an unresolved `{{...}}` placeholder falls back to the
/// family default, as does a name that clearly belongs to another family.
/// OpenRouter accepts every family and only needs a vendor-qualified name.
pub fn normalize_model(configured: Option<&str>, provider: ProviderKind) -> String {
    let model = configured.map(str::trim).unwrap_or_default();
    if model.is_empty() || model.contains("{{") {
        return provider.default_model().to_string();
    }
    let model = if provider.is_anthropic() {
        resolve_anthropic_model(model)
    } else {
        model.to_string()
    };

    match (provider, model_family(&model)) {
        (ProviderKind::OpenRouter, Some(ProviderKind::OpenRouter)) => model,
        (ProviderKind::OpenRouter, _) => provider.default_model().to_string(),
        (_, Some(family)) if family != provider => provider.default_model().to_string(),
        _ => model,
    }
}
