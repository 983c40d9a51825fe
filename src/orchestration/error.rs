use crate::provider::ProviderError;
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Message is required")]
    MissingMessage,
    #[error("Flow ID is required")]
    MissingFlow,
    #[error("Invalid request body: {0}")]
    InvalidBody(String),
    #[error("Invalid API key")]
    InvalidApiKey,
    #[error("Origin required for this chat")]
    OriginRequired,
    #[error("Domain not allowed: {origin}")]
    DomainNotAllowed { origin: String },
    #[error("This chat is not active")]
    FlowNotActive,
    #[error("No flow data found")]
    NoFlowData,
    #[error("No AI agent node found in this flow")]
    NoAgentNode,
    #[error("No AI provider API key configured for this flow")]
    MissingApiKey,
    #[error("AI provider error")]
    Provider(#[source] ProviderError),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ProviderError> for ChatError {
    fn from(value: ProviderError) -> Self {
        Self::Provider(value)
    }
}

impl ChatError {
    pub fn status(&self) -> u16 {
        match self {
            Self::MissingMessage | Self::MissingFlow | Self::InvalidBody(_) => 400,
            Self::InvalidApiKey => 401,
            Self::OriginRequired | Self::DomainNotAllowed { .. } => 403,
            Self::FlowNotActive | Self::NoFlowData | Self::NoAgentNode => 404,
            Self::Provider(_) => 502,
            Self::MissingApiKey | Self::Store(_) | Self::Internal(_) => 500,
        }
    }

    /// Stable machine-readable code for access and lookup failures.
    pub fn error_code(&self) -> Option<&'static str> {
        match self {
            Self::InvalidApiKey => Some("INVALID_API_KEY"),
            Self::OriginRequired => Some("ORIGIN_REQUIRED"),
            Self::DomainNotAllowed { .. } => Some("DOMAIN_NOT_ALLOWED"),
            Self::FlowNotActive => Some("FLOW_NOT_ACTIVE"),
            Self::NoFlowData => Some("NO_FLOW_DATA"),
            Self::NoAgentNode => Some("NO_AGENT_NODE"),
            _ => None,
        }
    }

    /// Raw upstream body returned to callers of a failed provider call.
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Provider(ProviderError::Status { body, .. }) => Some(body.clone()),
            Self::Provider(other) => Some(other.to_string()),
            _ => None,
        }
    }

    /// Caller mistakes are not incidents and stay out of the error log.
    pub fn is_caller_error(&self) -> bool {
        self.status() == 400
    }
}
