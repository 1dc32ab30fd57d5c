//! In-memory replica of monitored tables
//!
//! One cache per subscription; nothing here is process-wide. Batches apply
//! atomically under the write lock, in receipt order. Every "new" image
//! replaces the row wholesale — partial column sets are never merged into an
//! existing row.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use ovsdb_core::Row;

use crate::message::TableUpdates;

#[derive(Debug, Default)]
pub struct TableCache {
    tables: RwLock<HashMap<String, HashMap<Uuid, Row>>>,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one update batch. Per-row upserts and removals within the
    /// batch are independent; the batch as a whole is applied under the
    /// write lock so no reader observes a half-applied batch.
    pub(crate) fn apply(&self, updates: &TableUpdates) {
        let mut tables = self.tables.write().expect("cache lock poisoned");
        for (table_name, table_update) in updates.tables() {
            let rows = tables.entry(table_name.clone()).or_default();
            for (uuid, row_update) in table_update.rows() {
                match &row_update.new {
                    Some(new) => {
                        rows.insert(*uuid, new.clone());
                    }
                    None => {
                        rows.remove(uuid);
                    }
                }
            }
        }
    }

    /// Look up a row by table and identity.
    pub fn get(&self, table: &str, uuid: &Uuid) -> Option<Row> {
        self.tables
            .read()
            .expect("cache lock poisoned")
            .get(table)?
            .get(uuid)
            .cloned()
    }

    /// Snapshot of a whole table.
    pub fn rows(&self, table: &str) -> HashMap<Uuid, Row> {
        self.tables
            .read()
            .expect("cache lock poisoned")
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.tables
            .read()
            .expect("cache lock poisoned")
            .get(table)
            .map(HashMap::len)
            .unwrap_or(0)
    }

    /// Names of tables the cache has seen updates for.
    pub fn table_names(&self) -> Vec<String> {
        self.tables
            .read()
            .expect("cache lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.tables.write().expect("cache lock poisoned").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::bridge_schema;
    use serde_json::json;

    fn batch(json: serde_json::Value) -> TableUpdates {
        TableUpdates::from_json(&bridge_schema(), &json).unwrap()
    }

    const BR0: &str = "36bef046-7da7-43a5-905a-c17899216fcb";

    #[test]
    fn test_insert_then_delete_visibility() {
        let cache = TableCache::new();
        let uuid = Uuid::parse_str(BR0).unwrap();

        cache.apply(&batch(json!({
            "Bridge": {BR0: {"new": {"name": "br0"}}}
        })));
        assert_eq!(cache.row_count("Bridge"), 1);
        assert!(cache.get("Bridge", &uuid).is_some());

        cache.apply(&batch(json!({
            "Bridge": {BR0: {"old": {"name": "br0"}}}
        })));
        assert_eq!(cache.row_count("Bridge"), 0);
        assert!(cache.get("Bridge", &uuid).is_none());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let cache = TableCache::new();
        let update = batch(json!({
            "Bridge": {BR0: {"new": {"name": "br0", "stp_enable": true}}}
        }));
        cache.apply(&update);
        let first = cache.rows("Bridge");
        cache.apply(&update);
        assert_eq!(cache.rows("Bridge"), first);

        let removal = batch(json!({"Bridge": {BR0: {"old": {"name": "br0"}}}}));
        cache.apply(&removal);
        cache.apply(&removal);
        assert_eq!(cache.row_count("Bridge"), 0);
    }

    #[test]
    fn test_new_image_replaces_row_wholesale() {
        let cache = TableCache::new();
        let uuid = Uuid::parse_str(BR0).unwrap();

        cache.apply(&batch(json!({
            "Bridge": {BR0: {"new": {"name": "br0", "datapath_type": "system"}}}
        })));
        // Second image omits datapath_type; the cached row must not keep it.
        cache.apply(&batch(json!({
            "Bridge": {BR0: {"old": {"name": "br0"}, "new": {"name": "br0-renamed"}}}
        })));

        let row = cache.get("Bridge", &uuid).unwrap();
        assert_eq!(row.get("name").unwrap().as_atom().unwrap().as_str(), Some("br0-renamed"));
        assert!(row.get("datapath_type").is_none());
    }

    #[test]
    fn test_tables_are_independent() {
        let cache = TableCache::new();
        cache.apply(&batch(json!({
            "Bridge": {BR0: {"new": {"name": "br0"}}},
            "Open_vSwitch": {
                "9a84b0a2-3e68-4a34-90d0-d0c0d7b9d9b3": {"new": {}}
            }
        })));
        assert_eq!(cache.row_count("Bridge"), 1);
        assert_eq!(cache.row_count("Open_vSwitch"), 1);
        let mut names = cache.table_names();
        names.sort();
        assert_eq!(names, vec!["Bridge", "Open_vSwitch"]);
    }
}
