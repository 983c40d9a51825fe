use crate::workflow::FlowGraph;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub mod sqlite;

pub use sqlite::SqliteFlowStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("stored json for {context} is invalid: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("store connection lock is poisoned")]
    LockPoisoned,
}

impl From<rusqlite::Error> for StoreError {
    fn from(source: rusqlite::Error) -> Self {
        Self::Sql { source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    Active,
    Inactive,
    Draft,
}

impl FlowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Draft => "draft",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            "draft" => Some(Self::Draft),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WidgetConfig {
    pub title: String,
    pub greeting: Option<String>,
    pub placeholder: String,
    pub mode: String,
    pub theme: String,
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            title: "Chat".to_string(),
            greeting: None,
            placeholder: "Type a message...".to_string(),
            mode: "popup".to_string(),
            theme: "light".to_string(),
        }
    }
}

/// Deployable chat flow: the workflow's status and access rules together
/// with the project-level deployment and widget settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowProject {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub name: String,
    pub status: FlowStatus,
    #[serde(default)]
    pub deployed: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default)]
    pub widget: WidgetConfig,
}

impl FlowProject {
    pub fn is_active(&self) -> bool {
        self.status == FlowStatus::Active
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowKey {
    Id(String),
    Slug(String),
}

impl FlowKey {
    /// UUID-shaped keys address a flow directly; anything else is a slug.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if looks_like_uuid(raw) {
            Some(Self::Id(raw.to_ascii_lowercase()))
        } else {
            Some(Self::Slug(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Id(value) | Self::Slug(value) => value,
        }
    }

    pub fn snapshot_preference(&self) -> SnapshotPreference {
        match self {
            Self::Id(_) => SnapshotPreference::Latest,
            Self::Slug(_) => SnapshotPreference::PublishedFirst,
        }
    }
}

fn looks_like_uuid(raw: &str) -> bool {
    raw.len() == 36
        && raw.char_indices().all(|(idx, ch)| match idx {
            8 | 13 | 18 | 23 => ch == '-',
            _ => ch.is_ascii_hexdigit(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPreference {
    /// Newest published snapshot, else newest of any kind.
    PublishedFirst,
    Latest,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlowSnapshot {
    pub flow_id: String,
    pub version: i64,
    pub published: bool,
    pub graph: FlowGraph,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowVariable {
    pub name: String,
    pub value: String,
    pub is_secret: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type", default = "default_column_type")]
    pub column_type: String,
}

fn default_column_type() -> String {
    "text".to_string()
}

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct DataTable {
    pub id: String,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub records: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnowledgeFile {
    pub id: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLogEntry {
    pub flow_id: Option<String>,
    pub node_id: Option<String>,
    pub level: String,
    pub message: String,
    pub metadata: Value,
}

impl ErrorLogEntry {
    pub fn error(flow_id: Option<&str>, message: &str, metadata: Value) -> Self {
        Self {
            flow_id: flow_id.map(str::to_string),
            node_id: None,
            level: "error".to_string(),
            message: message.to_string(),
            metadata,
        }
    }

    pub fn with_node(mut self, node_id: &str) -> Self {
        self.node_id = Some(node_id.to_string());
        self
    }

    pub fn with_level(mut self, level: &str) -> Self {
        self.level = level.to_string();
        self
    }
}

/// Persistence collaborator for flows, secrets, data tables and the error log.
pub trait FlowStore: Send + Sync {
    fn find_flow(&self, key: &FlowKey) -> Result<Option<FlowProject>, StoreError>;

    fn load_snapshot(
        &self,
        flow_id: &str,
        preference: SnapshotPreference,
    ) -> Result<Option<FlowSnapshot>, StoreError>;

    fn flow_variables(&self, flow_id: &str) -> Result<Vec<FlowVariable>, StoreError>;

    fn load_table(&self, table_id: &str) -> Result<Option<DataTable>, StoreError>;

    /// Replaces the whole record array of a table.
    fn save_table_records(&self, table_id: &str, records: &[Record]) -> Result<(), StoreError>;

    fn load_knowledge_file(&self, file_id: &str) -> Result<Option<KnowledgeFile>, StoreError>;

    fn log_error(&self, entry: &ErrorLogEntry) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_key_distinguishes_uuid_from_slug() {
        let id = FlowKey::parse("3F2504E0-4F89-11D3-9A0C-0305E82C3301").expect("key");
        assert_eq!(
            id,
            FlowKey::Id("3f2504e0-4f89-11d3-9a0c-0305e82c3301".to_string())
        );
        assert_eq!(id.snapshot_preference(), SnapshotPreference::Latest);

        let slug = FlowKey::parse("support-bot").expect("key");
        assert_eq!(slug, FlowKey::Slug("support-bot".to_string()));
        assert_eq!(
            slug.snapshot_preference(),
            SnapshotPreference::PublishedFirst
        );
        assert!(FlowKey::parse("  ").is_none());
    }
}
