use super::{
    ColumnDef, DataTable, ErrorLogEntry, FlowKey, FlowProject, FlowSnapshot, FlowStatus,
    FlowStore, FlowVariable, KnowledgeFile, Record, SnapshotPreference, StoreError, WidgetConfig,
};
use crate::workflow::FlowGraph;
use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct SqliteFlowStore {
    connection: Mutex<Connection>,
}

fn decode_json<T: serde::de::DeserializeOwned>(raw: &str, context: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|source| StoreError::Json {
        context: context.to_string(),
        source,
    })
}

fn encode_json<T: serde::Serialize>(value: &T, context: &str) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|source| StoreError::Json {
        context: context.to_string(),
        source,
    })
}

impl SqliteFlowStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let connection = Connection::open(db_path).map_err(|source| StoreError::Open {
            path: db_path.display().to_string(),
            source,
        })?;
        let store = Self {
            connection: Mutex::new(connection),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory().map_err(|source| StoreError::Open {
            path: ":memory:".to_string(),
            source,
        })?;
        let store = Self {
            connection: Mutex::new(connection),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn connect(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.connection
            .lock()
            .map_err(|_| StoreError::LockPoisoned)
    }

    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS flow_projects (
                id TEXT PRIMARY KEY,
                slug TEXT UNIQUE,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                deployed INTEGER NOT NULL,
                allowed_domains TEXT NOT NULL,
                access_key TEXT,
                widget TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS flow_snapshots (
                flow_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                published INTEGER NOT NULL,
                graph TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (flow_id, version)
            );

            CREATE TABLE IF NOT EXISTS flow_variables (
                flow_id TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                is_secret INTEGER NOT NULL,
                PRIMARY KEY (flow_id, name)
            );

            CREATE TABLE IF NOT EXISTS data_tables (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                columns TEXT NOT NULL,
                records TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS knowledge_files (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                content TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS error_logs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                flow_id TEXT,
                node_id TEXT,
                level TEXT NOT NULL,
                message TEXT NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_error_logs_flow
                ON error_logs(flow_id, id);
            ",
        )?;
        Ok(())
    }

    pub fn upsert_flow_project(&self, project: &FlowProject) -> Result<(), StoreError> {
        let allowed_domains = encode_json(&project.allowed_domains, "allowed_domains")?;
        let widget = encode_json(&project.widget, "widget")?;
        let connection = self.connect()?;
        connection.execute(
            "
            INSERT INTO flow_projects (
                id, slug, name, status, deployed, allowed_domains, access_key, widget
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                slug = excluded.slug,
                name = excluded.name,
                status = excluded.status,
                deployed = excluded.deployed,
                allowed_domains = excluded.allowed_domains,
                access_key = excluded.access_key,
                widget = excluded.widget
            ",
            params![
                project.id,
                project.slug,
                project.name,
                project.status.as_str(),
                project.deployed,
                allowed_domains,
                project.access_key,
                widget,
            ],
        )?;
        Ok(())
    }

    pub fn insert_snapshot(
        &self,
        flow_id: &str,
        version: i64,
        published: bool,
        graph: &FlowGraph,
    ) -> Result<(), StoreError> {
        let graph = encode_json(graph, "flow graph")?;
        let connection = self.connect()?;
        connection.execute(
            "
            INSERT OR REPLACE INTO flow_snapshots (flow_id, version, published, graph, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ",
            params![flow_id, version, published, graph, crate::shared::now_iso()],
        )?;
        Ok(())
    }

    pub fn upsert_variable(
        &self,
        flow_id: &str,
        variable: &FlowVariable,
    ) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "
            INSERT INTO flow_variables (flow_id, name, value, is_secret)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(flow_id, name) DO UPDATE SET
                value = excluded.value,
                is_secret = excluded.is_secret
            ",
            params![flow_id, variable.name, variable.value, variable.is_secret],
        )?;
        Ok(())
    }

    pub fn upsert_table(&self, table: &DataTable) -> Result<(), StoreError> {
        let columns = encode_json(&table.columns, "table columns")?;
        let records = encode_json(&table.records, "table records")?;
        let connection = self.connect()?;
        connection.execute(
            "
            INSERT INTO data_tables (id, name, columns, records, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                columns = excluded.columns,
                records = excluded.records,
                updated_at = excluded.updated_at
            ",
            params![
                table.id,
                table.name,
                columns,
                records,
                crate::shared::now_iso()
            ],
        )?;
        Ok(())
    }

    pub fn upsert_knowledge_file(&self, file: &KnowledgeFile) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "
            INSERT INTO knowledge_files (id, name, content) VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET name = excluded.name, content = excluded.content
            ",
            params![file.id, file.name, file.content],
        )?;
        Ok(())
    }

    pub fn error_logs(&self, flow_id: Option<&str>) -> Result<Vec<ErrorLogEntry>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "
            SELECT flow_id, node_id, level, message, metadata FROM error_logs
            WHERE (?1 IS NULL OR flow_id = ?1)
            ORDER BY id ASC
            ",
        )?;
        let rows = statement.query_map(params![flow_id], |row| {
            Ok((
                row.get::<_, Option<String>>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (flow_id, node_id, level, message, metadata) = row?;
            entries.push(ErrorLogEntry {
                flow_id,
                node_id,
                level,
                message,
                metadata: decode_json(&metadata, "error log metadata")?,
            });
        }
        Ok(entries)
    }
}

impl FlowStore for SqliteFlowStore {
    fn find_flow(&self, key: &FlowKey) -> Result<Option<FlowProject>, StoreError> {
        let connection = self.connect()?;
        let sql = match key {
            FlowKey::Id(_) => {
                "SELECT id, slug, name, status, deployed, allowed_domains, access_key, widget
                 FROM flow_projects WHERE id = ?1"
            }
            FlowKey::Slug(_) => {
                "SELECT id, slug, name, status, deployed, allowed_domains, access_key, widget
                 FROM flow_projects WHERE slug = ?1 AND deployed = 1"
            }
        };
        let row = connection
            .query_row(sql, params![key.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, Option<String>>(6)?,
                    row.get::<_, String>(7)?,
                ))
            })
            .optional()?;

        let Some((id, slug, name, status, deployed, allowed_domains, access_key, widget)) = row
        else {
            return Ok(None);
        };
        Ok(Some(FlowProject {
            id,
            slug,
            name,
            // Unknown status strings are treated as not live.
            status: FlowStatus::parse(&status).unwrap_or(FlowStatus::Inactive),
            deployed,
            allowed_domains: decode_json(&allowed_domains, "allowed_domains")?,
            access_key: access_key.filter(|key| !key.trim().is_empty()),
            widget: decode_json::<WidgetConfig>(&widget, "widget")?,
        }))
    }

    fn load_snapshot(
        &self,
        flow_id: &str,
        preference: SnapshotPreference,
    ) -> Result<Option<FlowSnapshot>, StoreError> {
        let connection = self.connect()?;
        let sql = match preference {
            SnapshotPreference::PublishedFirst => {
                "SELECT version, published, graph FROM flow_snapshots WHERE flow_id = ?1
                 ORDER BY published DESC, version DESC LIMIT 1"
            }
            SnapshotPreference::Latest => {
                "SELECT version, published, graph FROM flow_snapshots WHERE flow_id = ?1
                 ORDER BY version DESC LIMIT 1"
            }
        };
        let row = connection
            .query_row(sql, params![flow_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        let Some((version, published, graph)) = row else {
            return Ok(None);
        };
        Ok(Some(FlowSnapshot {
            flow_id: flow_id.to_string(),
            version,
            published,
            graph: decode_json(&graph, &format!("snapshot {flow_id}@{version}"))?,
        }))
    }

    fn flow_variables(&self, flow_id: &str) -> Result<Vec<FlowVariable>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT name, value, is_secret FROM flow_variables WHERE flow_id = ?1 ORDER BY name",
        )?;
        let rows = statement.query_map(params![flow_id], |row| {
            Ok(FlowVariable {
                name: row.get(0)?,
                value: row.get(1)?,
                is_secret: row.get(2)?,
            })
        })?;
        let mut variables = Vec::new();
        for row in rows {
            variables.push(row?);
        }
        Ok(variables)
    }

    fn load_table(&self, table_id: &str) -> Result<Option<DataTable>, StoreError> {
        let connection = self.connect()?;
        let row = connection
            .query_row(
                "SELECT name, columns, records FROM data_tables WHERE id = ?1",
                params![table_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;
        let Some((name, columns, records)) = row else {
            return Ok(None);
        };
        Ok(Some(DataTable {
            id: table_id.to_string(),
            name,
            columns: decode_json::<Vec<ColumnDef>>(&columns, "table columns")?,
            records: decode_json::<Vec<Record>>(&records, "table records")?,
        }))
    }

    fn save_table_records(&self, table_id: &str, records: &[Record]) -> Result<(), StoreError> {
        let records = encode_json(&records, "table records")?;
        let connection = self.connect()?;
        connection.execute(
            "UPDATE data_tables SET records = ?2, updated_at = ?3 WHERE id = ?1",
            params![table_id, records, crate::shared::now_iso()],
        )?;
        Ok(())
    }

    fn load_knowledge_file(&self, file_id: &str) -> Result<Option<KnowledgeFile>, StoreError> {
        let connection = self.connect()?;
        let file = connection
            .query_row(
                "SELECT id, name, content FROM knowledge_files WHERE id = ?1",
                params![file_id],
                |row| {
                    Ok(KnowledgeFile {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        content: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(file)
    }

    fn log_error(&self, entry: &ErrorLogEntry) -> Result<(), StoreError> {
        let metadata = encode_json(&entry.metadata, "error log metadata")?;
        let connection = self.connect()?;
        connection.execute(
            "
            INSERT INTO error_logs (flow_id, node_id, level, message, metadata, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ",
            params![
                entry.flow_id,
                entry.node_id,
                entry.level,
                entry.message,
                metadata,
                crate::shared::now_iso()
            ],
        )?;
        Ok(())
    }
}
