//! Monitor protocol messages
//!
//! Requests describe which tables/columns to watch; update batches carry
//! old/new row images keyed by row UUID. A row's identity always comes from
//! the batch key — column data is never consulted for it, even when a server
//! includes `_uuid` in the images.

use std::collections::HashMap;

use serde_json::{json, Map, Value};
use uuid::Uuid;

use ovsdb_core::{Error, Result, Row};

use crate::schema::{DatabaseSchema, TableSchema};

/// Which kinds of updates a monitor wants, RFC 7047 §4.1.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSelect {
    pub initial: bool,
    pub insert: bool,
    pub delete: bool,
    pub modify: bool,
}

impl MonitorSelect {
    pub fn new(initial: bool, insert: bool, delete: bool, modify: bool) -> Self {
        Self {
            initial,
            insert,
            delete,
            modify,
        }
    }

    fn to_json(self) -> Value {
        json!({
            "initial": self.initial,
            "insert": self.insert,
            "delete": self.delete,
            "modify": self.modify,
        })
    }
}

impl Default for MonitorSelect {
    fn default() -> Self {
        Self::new(true, true, true, true)
    }
}

/// One table's worth of a monitor subscription.
///
/// When `columns` is `None` the field is omitted on the wire and the server
/// monitors every column *except* `_uuid`. Callers that need the identity
/// column in each update must enumerate the columns explicitly —
/// [`MonitorRequest::all_columns`] does exactly that.
#[derive(Debug, Clone)]
pub struct MonitorRequest {
    pub table: String,
    pub columns: Option<Vec<String>>,
    pub select: MonitorSelect,
}

impl MonitorRequest {
    /// Monitor a table with the server-side default column set.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: None,
            select: MonitorSelect::default(),
        }
    }

    /// Monitor an explicit column list.
    pub fn with_columns<I, C>(table: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        Self {
            table: table.into(),
            columns: Some(columns.into_iter().map(Into::into).collect()),
            select: MonitorSelect::default(),
        }
    }

    /// Monitor every schema-described column, `_uuid` included.
    pub fn all_columns(table: &TableSchema) -> Self {
        let mut columns: Vec<String> = table.column_names().cloned().collect();
        columns.sort();
        Self {
            table: table.name().to_string(),
            columns: Some(columns),
            select: MonitorSelect::default(),
        }
    }

    pub fn select(mut self, select: MonitorSelect) -> Self {
        self.select = select;
        self
    }

    fn to_json(&self) -> Value {
        let mut spec = Map::new();
        if let Some(columns) = &self.columns {
            spec.insert("columns".to_string(), json!(columns));
        }
        spec.insert("select".to_string(), self.select.to_json());
        Value::Object(spec)
    }
}

/// Encode the monitor-requests parameter: table name → request spec.
pub(crate) fn requests_to_json(requests: &[MonitorRequest]) -> Value {
    let mut map = Map::new();
    for request in requests {
        map.insert(request.table.clone(), request.to_json());
    }
    Value::Object(map)
}

/// One row's transition inside an update batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    pub old: Option<Row>,
    pub new: Option<Row>,
}

impl RowUpdate {
    /// First sight of a row: no old image.
    pub fn is_insert(&self) -> bool {
        self.old.is_none() && self.new.is_some()
    }

    /// No new image signals deletion.
    pub fn is_delete(&self) -> bool {
        self.new.is_none()
    }

    pub fn is_modify(&self) -> bool {
        self.old.is_some() && self.new.is_some()
    }
}

/// All row transitions for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableUpdate {
    rows: HashMap<Uuid, RowUpdate>,
}

impl TableUpdate {
    pub(crate) fn from_json(table: &TableSchema, json: &Value) -> Result<TableUpdate> {
        let obj = json.as_object().ok_or_else(|| {
            Error::protocol(format!("table update for {} is not an object", table.name()))
        })?;
        let mut rows = HashMap::with_capacity(obj.len());
        for (uuid_text, images) in obj {
            let uuid = Uuid::parse_str(uuid_text)
                .map_err(|e| Error::protocol(format!("bad row uuid '{uuid_text}': {e}")))?;
            let old = match images.get("old") {
                Some(image) if !image.is_null() => Some(table.row_from_json(image)?),
                _ => None,
            };
            let new = match images.get("new") {
                Some(image) if !image.is_null() => Some(table.row_from_json(image)?),
                _ => None,
            };
            rows.insert(uuid, RowUpdate { old, new });
        }
        Ok(TableUpdate { rows })
    }

    pub fn get(&self, uuid: &Uuid) -> Option<&RowUpdate> {
        self.rows.get(uuid)
    }

    pub fn rows(&self) -> impl Iterator<Item = (&Uuid, &RowUpdate)> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// An update batch: table name → row transitions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableUpdates {
    tables: HashMap<String, TableUpdate>,
}

impl TableUpdates {
    pub fn from_json(schema: &DatabaseSchema, json: &Value) -> Result<TableUpdates> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::protocol(format!("table updates is not an object: {json}")))?;
        let mut tables = HashMap::with_capacity(obj.len());
        for (table_name, update_json) in obj {
            let table = schema.table(table_name)?;
            tables.insert(table_name.clone(), TableUpdate::from_json(table, update_json)?);
        }
        Ok(TableUpdates { tables })
    }

    pub fn table(&self, table: &str) -> Option<&TableUpdate> {
        self.tables.get(table)
    }

    pub fn tables(&self) -> impl Iterator<Item = (&String, &TableUpdate)> {
        self.tables.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::bridge_schema;
    use serde_json::json;

    #[test]
    fn test_request_omits_columns_by_default() {
        let request = MonitorRequest::new("Bridge");
        let encoded = request.to_json();
        assert!(encoded.get("columns").is_none());
        assert_eq!(encoded["select"]["initial"], json!(true));
    }

    #[test]
    fn test_all_columns_includes_identity() {
        let schema = bridge_schema();
        let request = MonitorRequest::all_columns(schema.table("Bridge").unwrap());
        let columns = request.columns.as_ref().unwrap();
        assert!(columns.iter().any(|c| c == "_uuid"));
        assert!(columns.iter().any(|c| c == "name"));
    }

    #[test]
    fn test_requests_parameter_shape() {
        let requests = vec![
            MonitorRequest::with_columns("Bridge", ["name", "flood_vlans"]),
            MonitorRequest::new("Open_vSwitch"),
        ];
        let encoded = requests_to_json(&requests);
        assert_eq!(encoded["Bridge"]["columns"], json!(["name", "flood_vlans"]));
        assert!(encoded["Open_vSwitch"].get("columns").is_none());
    }

    #[test]
    fn test_update_parse_old_new_images() {
        let schema = bridge_schema();
        let updates = TableUpdates::from_json(
            &schema,
            &json!({
                "Bridge": {
                    "36bef046-7da7-43a5-905a-c17899216fcb": {
                        "new": {"name": "br0", "stp_enable": false}
                    },
                    "9a84b0a2-3e68-4a34-90d0-d0c0d7b9d9b3": {
                        "old": {"name": "br1"}
                    },
                    "4f4e9a3c-30ca-4b4e-9b9a-4a3c1b1a2b3c": {
                        "old": {"name": "br2"},
                        "new": {"name": "br2-renamed"}
                    }
                }
            }),
        )
        .unwrap();

        let bridge = updates.table("Bridge").unwrap();
        assert_eq!(bridge.len(), 3);

        let inserted = bridge
            .get(&Uuid::parse_str("36bef046-7da7-43a5-905a-c17899216fcb").unwrap())
            .unwrap();
        assert!(inserted.is_insert());
        assert!(!inserted.is_delete());

        let deleted = bridge
            .get(&Uuid::parse_str("9a84b0a2-3e68-4a34-90d0-d0c0d7b9d9b3").unwrap())
            .unwrap();
        assert!(deleted.is_delete());

        let modified = bridge
            .get(&Uuid::parse_str("4f4e9a3c-30ca-4b4e-9b9a-4a3c1b1a2b3c").unwrap())
            .unwrap();
        assert!(modified.is_modify());
    }

    #[test]
    fn test_identity_from_batch_key_not_column_data() {
        let schema = bridge_schema();
        // The new image smuggles a different _uuid; the batch key wins.
        let updates = TableUpdates::from_json(
            &schema,
            &json!({
                "Bridge": {
                    "36bef046-7da7-43a5-905a-c17899216fcb": {
                        "new": {
                            "name": "br0",
                            "_uuid": ["uuid", "9a84b0a2-3e68-4a34-90d0-d0c0d7b9d9b3"]
                        }
                    }
                }
            }),
        )
        .unwrap();
        let key = Uuid::parse_str("36bef046-7da7-43a5-905a-c17899216fcb").unwrap();
        assert!(updates.table("Bridge").unwrap().get(&key).is_some());
    }

    #[test]
    fn test_unknown_table_is_an_error() {
        let schema = bridge_schema();
        let result = TableUpdates::from_json(&schema, &json!({"Mystery": {}}));
        assert!(matches!(result, Err(Error::UnknownTable(_))));
    }

    #[test]
    fn test_bad_row_uuid_is_an_error() {
        let schema = bridge_schema();
        let result = TableUpdates::from_json(
            &schema,
            &json!({"Bridge": {"not-a-uuid": {"new": {"name": "x"}}}}),
        );
        assert!(result.is_err());
    }
}
