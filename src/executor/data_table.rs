use super::{json_input, str_input, ToolResult};
use crate::resolve::value_to_text;
use crate::shared::{generate_id, now_iso, now_millis};
use crate::store::{DataTable, FlowStore, Record};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::HashSet;

pub const OPERATIONS: &[&str] = &["create", "get", "update", "delete"];
const RECORD_ID_MAX_GENERATION_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Deserialize)]
struct Filter {
    field: String,
    #[serde(default = "default_operator")]
    operator: String,
    #[serde(default)]
    value: Value,
}

fn default_operator() -> String {
    "equals".to_string()
}

#[derive(Debug, Clone, Deserialize)]
struct Sort {
    field: String,
    #[serde(default)]
    direction: Option<String>,
}

fn parse_data(inputs: &Map<String, Value>) -> Result<Record, String> {
    match inputs.get("data") {
        None | Some(Value::Null) => Ok(Record::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(Record::new()),
        Some(Value::String(raw)) => serde_json::from_str::<Record>(raw)
            .map_err(|err| format!("Invalid data JSON: {err}")),
        Some(other) => Err(format!("Data must be an object, got {other}")),
    }
}

fn parse_filters(inputs: &Map<String, Value>) -> Vec<Filter> {
    let Some(raw) = json_input(inputs, "filters") else {
        return Vec::new();
    };
    let items = match raw {
        Value::Array(items) => items,
        single @ Value::Object(_) => vec![single],
        _ => return Vec::new(),
    };
    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<Filter>(item).ok())
        .filter(|filter| !filter.field.trim().is_empty())
        .collect()
}

fn parse_sort(inputs: &Map<String, Value>) -> Option<Sort> {
    json_input(inputs, "sort")
        .and_then(|raw| serde_json::from_value::<Sort>(raw).ok())
        .filter(|sort| !sort.field.trim().is_empty())
}

fn parse_limit(inputs: &Map<String, Value>) -> Option<usize> {
    let limit = match inputs.get("limit")? {
        Value::Number(number) => number.as_u64(),
        Value::String(raw) => raw.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    usize::try_from(limit).ok().filter(|limit| *limit > 0)
}

fn matches_filter(record: &Record, filter: &Filter) -> bool {
    let actual = record.get(&filter.field).map(value_to_text).unwrap_or_default();
    let expected = value_to_text(&filter.value);
    match filter.operator.as_str() {
        "equals" => actual == expected,
        "notEquals" => actual != expected,
        "contains" => actual.to_lowercase().contains(&expected.to_lowercase()),
        // Unknown operators do not narrow the result.
        _ => true,
    }
}

/// Records without the sort field go last in either direction.
fn compare_values(left: Option<&Value>, right: Option<&Value>, descending: bool) -> Ordering {
    match (left, right) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(left), Some(right)) => {
            let ordering = match (left.as_f64(), right.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => value_to_text(left).cmp(&value_to_text(right)),
            };
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

fn record_id(record: &Record) -> Option<String> {
    record.get("id").map(value_to_text)
}

fn allocate_record_id(records: &[Record]) -> Result<String, String> {
    let existing = records.iter().filter_map(record_id).collect::<HashSet<_>>();
    for _ in 0..RECORD_ID_MAX_GENERATION_ATTEMPTS {
        let candidate = generate_id("rec", now_millis());
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
    }
    Err(format!(
        "failed to allocate unique record id after {RECORD_ID_MAX_GENERATION_ATTEMPTS} attempts"
    ))
}

fn persist(store: &dyn FlowStore, table: &DataTable) -> Result<(), String> {
    store
        .save_table_records(&table.id, &table.records)
        .map_err(|err| format!("Failed to save table `{}`: {err}", table.id))
}

fn create(store: &dyn FlowStore, mut table: DataTable, data: Record) -> ToolResult {
    let id = match allocate_record_id(&table.records) {
        Ok(id) => id,
        Err(err) => return ToolResult::failure(err),
    };
    let mut record = data;
    record.insert("id".to_string(), Value::String(id));

    let now = now_iso();
    for column in table
        .columns
        .iter()
        .filter(|column| column.column_type == "timestamp")
    {
        let supplied = record
            .get(&column.name)
            .is_some_and(|value| !value_to_text(value).trim().is_empty());
        if !supplied {
            record.insert(column.name.clone(), Value::String(now.clone()));
        }
    }

    table.records.push(record.clone());
    if let Err(err) = persist(store, &table) {
        return ToolResult::failure(err);
    }
    ToolResult::success(json!({ "record": record }))
}

fn get(table: &DataTable, inputs: &Map<String, Value>) -> ToolResult {
    let filters = parse_filters(inputs);
    let mut records = table
        .records
        .iter()
        .filter(|record| filters.iter().all(|filter| matches_filter(record, filter)))
        .cloned()
        .collect::<Vec<_>>();

    if let Some(sort) = parse_sort(inputs) {
        let descending = sort
            .direction
            .as_deref()
            .is_some_and(|direction| direction.eq_ignore_ascii_case("desc"));
        records.sort_by(|a, b| compare_values(a.get(&sort.field), b.get(&sort.field), descending));
    }
    if let Some(limit) = parse_limit(inputs) {
        records.truncate(limit);
    }

    let count = records.len();
    ToolResult::success(json!({ "records": records, "count": count }))
}

fn update(
    store: &dyn FlowStore,
    mut table: DataTable,
    record_id_input: &str,
    data: Record,
) -> ToolResult {
    let Some(position) = table
        .records
        .iter()
        .position(|record| record_id(record).as_deref() == Some(record_id_input))
    else {
        return ToolResult::failure(format!("Record `{record_id_input}` not found"));
    };

    let record = &mut table.records[position];
    for (key, value) in data {
        if key != "id" {
            record.insert(key, value);
        }
    }
    let updated = record.clone();
    if let Err(err) = persist(store, &table) {
        return ToolResult::failure(err);
    }
    ToolResult::success(json!({ "record": updated }))
}

fn delete(store: &dyn FlowStore, mut table: DataTable, record_id_input: &str) -> ToolResult {
    let before = table.records.len();
    table
        .records
        .retain(|record| record_id(record).as_deref() != Some(record_id_input));
    let deleted = table.records.len() != before;
    if deleted {
        if let Err(err) = persist(store, &table) {
            return ToolResult::failure(err);
        }
    }
    ToolResult::success(json!({ "deleted": deleted, "recordId": record_id_input }))
}

pub(crate) fn execute(store: &dyn FlowStore, inputs: &Map<String, Value>) -> ToolResult {
    let Some(table_id) = str_input(inputs, "tableId") else {
        return ToolResult::failure("Table ID is empty");
    };
    let operation = str_input(inputs, "operation").unwrap_or("get");
    if !OPERATIONS.contains(&operation) {
        return ToolResult::failure(format!("Unknown operation `{operation}`"));
    }

    let table = match store.load_table(table_id) {
        Ok(Some(table)) => table,
        Ok(None) => return ToolResult::failure(format!("Table `{table_id}` not found")),
        Err(err) => return ToolResult::failure(format!("Failed to load table `{table_id}`: {err}")),
    };

    let record_id_input = value_to_text(inputs.get("recordId").unwrap_or(&Value::Null));
    let record_id_input = record_id_input.trim();

    match operation {
        "get" => get(&table, inputs),
        "create" | "update" => {
            let data = match parse_data(inputs) {
                Ok(data) => data,
                Err(err) => return ToolResult::failure(err),
            };
            if operation == "create" {
                return create(store, table, data);
            }
            if record_id_input.is_empty() {
                return ToolResult::failure("Record ID is required for update");
            }
            update(store, table, record_id_input, data)
        }
        _ => {
            if record_id_input.is_empty() {
                return ToolResult::failure("Record ID is required for delete");
            }
            delete(store, table, record_id_input)
        }
    }
}
