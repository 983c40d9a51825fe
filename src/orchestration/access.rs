use super::error::ChatError;
use crate::store::FlowProject;

/// Caller-supplied headers relevant to access control.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerInfo<'a> {
    pub origin: Option<&'a str>,
    pub referer: Option<&'a str>,
    pub api_key: Option<&'a str>,
}

/// Lower-cased host of an origin or URL, without scheme, credentials, port or path.
pub fn origin_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("null") {
        return None;
    }
    let without_scheme = raw.split_once("://").map_or(raw, |(_, rest)| rest);
    let authority = without_scheme
        .split(['/', '?', '#'])
        .next()
        .unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = match host_port.strip_prefix('[') {
        Some(v6) => v6.split(']').next().unwrap_or_default(),
        None => host_port.split(':').next().unwrap_or_default(),
    };
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    (!host.is_empty()).then_some(host)
}

/// Allowlist entry reduced to a bare host; `*.` wildcards collapse onto the
/// registered domain.
pub fn normalize_domain(entry: &str) -> Option<String> {
    let entry = entry.trim();
    let entry = entry.strip_prefix("*.").unwrap_or(entry);
    let host = origin_host(entry)?;
    Some(host.strip_prefix("*.").unwrap_or(&host).to_string())
}

/// Exact host or any subdomain of a registered domain.
pub fn domain_allowed(host: &str, allowed: &[String]) -> bool {
    allowed
        .iter()
        .filter_map(|entry| normalize_domain(entry))
        .any(|domain| host == domain || host.ends_with(&format!(".{domain}")))
}

/// Activity, access key and domain allowlist checks, in that order.
pub fn check_access(project: &FlowProject, caller: CallerInfo<'_>) -> Result<(), ChatError> {
    if !project.is_active() {
        return Err(ChatError::FlowNotActive);
    }

    if let Some(expected) = project
        .access_key
        .as_deref()
        .map(str::trim)
        .filter(|key| !key.is_empty())
    {
        if caller.api_key.map(str::trim) != Some(expected) {
            return Err(ChatError::InvalidApiKey);
        }
    }

    let restricted = project
        .allowed_domains
        .iter()
        .any(|entry| !entry.trim().is_empty());
    if !restricted {
        return Ok(());
    }

    let host = caller
        .origin
        .and_then(origin_host)
        .or_else(|| caller.referer.and_then(origin_host))
        .ok_or(ChatError::OriginRequired)?;
    if domain_allowed(&host, &project.allowed_domains) {
        Ok(())
    } else {
        Err(ChatError::DomainNotAllowed { origin: host })
    }
}
