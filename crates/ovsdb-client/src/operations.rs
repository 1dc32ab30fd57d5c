//! The OVSDB operation algebra, RFC 7047 §5.2
//!
//! Operations are built fluently against a `TableSchema` so that type,
//! cardinality and mutator mismatches fail at build time, before any network
//! I/O. The free functions (`insert`, `update`, ...) mirror how transactions
//! read in ovs tooling: `insert(bridge)?.value("name", "br0")?`.

use serde_json::{json, Map, Value};

use ovsdb_core::{Atom, Error, OvsValue, Result, Row};

use crate::schema::{ColumnKind, TableSchema};

/// Comparison function of a where-clause entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionFunction {
    Equals,
    NotEquals,
    LessThan,
    LessThanOrEquals,
    GreaterThan,
    GreaterThanOrEquals,
    Includes,
    Excludes,
}

impl ConditionFunction {
    fn as_str(&self) -> &'static str {
        match self {
            ConditionFunction::Equals => "==",
            ConditionFunction::NotEquals => "!=",
            ConditionFunction::LessThan => "<",
            ConditionFunction::LessThanOrEquals => "<=",
            ConditionFunction::GreaterThan => ">",
            ConditionFunction::GreaterThanOrEquals => ">=",
            ConditionFunction::Includes => "includes",
            ConditionFunction::Excludes => "excludes",
        }
    }
}

/// A match condition: `[column, function, value]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub function: ConditionFunction,
    pub value: OvsValue,
}

impl Condition {
    pub fn new(
        column: impl Into<String>,
        function: ConditionFunction,
        value: impl Into<OvsValue>,
    ) -> Self {
        Self {
            column: column.into(),
            function,
            value: value.into(),
        }
    }

    /// The most common condition, `column == value`.
    pub fn equals(column: impl Into<String>, value: impl Into<OvsValue>) -> Self {
        Self::new(column, ConditionFunction::Equals, value)
    }

    /// Match a row by its `_uuid` identity.
    pub fn uuid_equals(uuid: uuid::Uuid) -> Self {
        Self::new("_uuid", ConditionFunction::Equals, OvsValue::uuid(uuid))
    }

    fn to_json(&self) -> Value {
        json!([self.column, self.function.as_str(), self.value.to_json()])
    }
}

/// In-place modification verbs, RFC 7047 §5.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutator {
    Sum,
    Difference,
    Product,
    Quotient,
    Remainder,
    Insert,
    Delete,
}

impl Mutator {
    fn as_str(&self) -> &'static str {
        match self {
            Mutator::Sum => "+=",
            Mutator::Difference => "-=",
            Mutator::Product => "*=",
            Mutator::Quotient => "/=",
            Mutator::Remainder => "%=",
            Mutator::Insert => "insert",
            Mutator::Delete => "delete",
        }
    }

    /// Whether this mutator can apply to a column of the given kind. The
    /// arithmetic verbs need numeric scalars or sets of them; insert/delete
    /// need a set or map.
    pub fn applicable_to(&self, kind: &ColumnKind) -> bool {
        match self {
            Mutator::Sum | Mutator::Difference | Mutator::Product | Mutator::Quotient => {
                !kind.is_map() && kind.key.kind.is_numeric()
            }
            // Remainder is integer-only.
            Mutator::Remainder => {
                !kind.is_map() && kind.key.kind == crate::schema::BaseKind::Integer
            }
            Mutator::Insert | Mutator::Delete => kind.is_set() || kind.is_map(),
        }
    }
}

/// One mutation: `[column, mutator, value]` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub column: String,
    pub mutator: Mutator,
    pub value: OvsValue,
}

impl Mutation {
    fn to_json(&self) -> Value {
        json!([self.column, self.mutator.as_str(), self.value.to_json()])
    }
}

/// Wait-operation comparison, RFC 7047 §5.2.6.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitUntil {
    Equals,
    NotEquals,
}

impl WaitUntil {
    fn as_str(&self) -> &'static str {
        match self {
            WaitUntil::Equals => "==",
            WaitUntil::NotEquals => "!=",
        }
    }
}

/// One element of a transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Insert {
        table: String,
        row: Row,
        uuid_name: Option<String>,
    },
    Update {
        table: String,
        row: Row,
        conditions: Vec<Condition>,
    },
    Mutate {
        table: String,
        mutations: Vec<Mutation>,
        conditions: Vec<Condition>,
    },
    Delete {
        table: String,
        conditions: Vec<Condition>,
    },
    Select {
        table: String,
        conditions: Vec<Condition>,
        columns: Option<Vec<String>>,
    },
    Wait {
        table: String,
        conditions: Vec<Condition>,
        columns: Vec<String>,
        until: WaitUntil,
        rows: Vec<Row>,
        timeout_ms: Option<u64>,
    },
    Commit {
        durable: bool,
    },
    Abort,
    Comment(String),
}

impl Operation {
    /// Whether this operation can change database state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Operation::Insert { .. }
                | Operation::Update { .. }
                | Operation::Mutate { .. }
                | Operation::Delete { .. }
        )
    }

    /// The uuid-name this operation declares, if any.
    pub fn declared_uuid_name(&self) -> Option<&str> {
        match self {
            Operation::Insert { uuid_name, .. } => uuid_name.as_deref(),
            _ => None,
        }
    }

    /// Named UUIDs this operation references in its payload.
    pub fn referenced_uuid_names(&self) -> Vec<&str> {
        fn collect<'a>(value: &'a OvsValue, out: &mut Vec<&'a str>) {
            match value {
                OvsValue::Atom(Atom::NamedUuid(name)) => out.push(name),
                OvsValue::Atom(_) => {}
                OvsValue::Set(atoms) => {
                    for atom in atoms {
                        if let Atom::NamedUuid(name) = atom {
                            out.push(name);
                        }
                    }
                }
                OvsValue::Map(pairs) => {
                    for (k, v) in pairs {
                        if let Atom::NamedUuid(name) = k {
                            out.push(name);
                        }
                        if let Atom::NamedUuid(name) = v {
                            out.push(name);
                        }
                    }
                }
            }
        }

        fn from_row<'a>(row: &'a Row, names: &mut Vec<&'a str>) {
            for (_, value) in row.columns() {
                collect(value, names);
            }
        }

        let mut names = Vec::new();
        match self {
            Operation::Insert { row, .. } => from_row(row, &mut names),
            Operation::Update {
                row, conditions, ..
            } => {
                from_row(row, &mut names);
                for c in conditions {
                    collect(&c.value, &mut names);
                }
            }
            Operation::Mutate {
                mutations,
                conditions,
                ..
            } => {
                for m in mutations {
                    collect(&m.value, &mut names);
                }
                for c in conditions {
                    collect(&c.value, &mut names);
                }
            }
            Operation::Delete { conditions, .. } | Operation::Select { conditions, .. } => {
                for c in conditions {
                    collect(&c.value, &mut names);
                }
            }
            Operation::Wait {
                conditions, rows, ..
            } => {
                for c in conditions {
                    collect(&c.value, &mut names);
                }
                for row in rows {
                    from_row(row, &mut names);
                }
            }
            Operation::Commit { .. } | Operation::Abort | Operation::Comment(_) => {}
        }
        names
    }

    /// Wire representation.
    pub fn to_json(&self) -> Value {
        fn conditions_json(conditions: &[Condition]) -> Value {
            Value::Array(conditions.iter().map(Condition::to_json).collect())
        }

        match self {
            Operation::Insert {
                table,
                row,
                uuid_name,
            } => {
                let mut obj = Map::new();
                obj.insert("op".into(), json!("insert"));
                obj.insert("table".into(), json!(table));
                obj.insert("row".into(), row.to_json());
                if let Some(name) = uuid_name {
                    obj.insert("uuid-name".into(), json!(name));
                }
                Value::Object(obj)
            }
            Operation::Update {
                table,
                row,
                conditions,
            } => json!({
                "op": "update",
                "table": table,
                "where": conditions_json(conditions),
                "row": row.to_json(),
            }),
            Operation::Mutate {
                table,
                mutations,
                conditions,
            } => json!({
                "op": "mutate",
                "table": table,
                "where": conditions_json(conditions),
                "mutations": mutations.iter().map(Mutation::to_json).collect::<Vec<_>>(),
            }),
            Operation::Delete { table, conditions } => json!({
                "op": "delete",
                "table": table,
                "where": conditions_json(conditions),
            }),
            Operation::Select {
                table,
                conditions,
                columns,
            } => {
                let mut obj = Map::new();
                obj.insert("op".into(), json!("select"));
                obj.insert("table".into(), json!(table));
                obj.insert("where".into(), conditions_json(conditions));
                if let Some(columns) = columns {
                    obj.insert("columns".into(), json!(columns));
                }
                Value::Object(obj)
            }
            Operation::Wait {
                table,
                conditions,
                columns,
                until,
                rows,
                timeout_ms,
            } => {
                let mut obj = Map::new();
                obj.insert("op".into(), json!("wait"));
                if let Some(timeout) = timeout_ms {
                    obj.insert("timeout".into(), json!(timeout));
                }
                obj.insert("table".into(), json!(table));
                obj.insert("where".into(), conditions_json(conditions));
                obj.insert("columns".into(), json!(columns));
                obj.insert("until".into(), json!(until.as_str()));
                obj.insert(
                    "rows".into(),
                    Value::Array(rows.iter().map(Row::to_json).collect()),
                );
                Value::Object(obj)
            }
            Operation::Commit { durable } => json!({"op": "commit", "durable": durable}),
            Operation::Abort => json!({"op": "abort"}),
            Operation::Comment(text) => json!({"op": "comment", "comment": text}),
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Start an insert against a table.
pub fn insert(table: &TableSchema) -> InsertBuilder<'_> {
    InsertBuilder {
        table,
        row: Row::new(),
        uuid_name: None,
    }
}

pub struct InsertBuilder<'a> {
    table: &'a TableSchema,
    row: Row,
    uuid_name: Option<String>,
}

impl<'a> InsertBuilder<'a> {
    /// Set a column value, validated against the column schema.
    pub fn value(mut self, column: &str, value: impl Into<OvsValue>) -> Result<Self> {
        let value = value.into();
        self.table.column(column)?.validate(&value)?;
        self.row.insert(column, value);
        Ok(self)
    }

    /// Declare a named UUID other operations in the transaction can
    /// reference before the real identity exists.
    pub fn uuid_name(mut self, name: impl Into<String>) -> Self {
        self.uuid_name = Some(name.into());
        self
    }

    pub fn build(self) -> Operation {
        Operation::Insert {
            table: self.table.name().to_string(),
            row: self.row,
            uuid_name: self.uuid_name,
        }
    }
}

/// Start an update against a table.
pub fn update(table: &TableSchema) -> UpdateBuilder<'_> {
    UpdateBuilder {
        table,
        row: Row::new(),
        conditions: Vec::new(),
    }
}

pub struct UpdateBuilder<'a> {
    table: &'a TableSchema,
    row: Row,
    conditions: Vec<Condition>,
}

impl<'a> UpdateBuilder<'a> {
    pub fn set(mut self, column: &str, value: impl Into<OvsValue>) -> Result<Self> {
        let value = value.into();
        let schema = self.table.column(column)?;
        if !schema.is_mutable() {
            return Err(Error::validation(format!(
                "column {column} is immutable"
            )));
        }
        schema.validate(&value)?;
        self.row.insert(column, value);
        Ok(self)
    }

    pub fn filter(mut self, condition: Condition) -> Result<Self> {
        self.table.column(&condition.column)?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn build(self) -> Operation {
        Operation::Update {
            table: self.table.name().to_string(),
            row: self.row,
            conditions: self.conditions,
        }
    }
}

/// Start a mutate against a table.
pub fn mutate(table: &TableSchema) -> MutateBuilder<'_> {
    MutateBuilder {
        table,
        mutations: Vec::new(),
        conditions: Vec::new(),
    }
}

pub struct MutateBuilder<'a> {
    table: &'a TableSchema,
    mutations: Vec<Mutation>,
    conditions: Vec<Condition>,
}

impl<'a> MutateBuilder<'a> {
    /// Add a mutation; a mutator that the column's declared kind does not
    /// support is a build-time validation failure, never a silent no-op.
    pub fn mutation(
        mut self,
        column: &str,
        mutator: Mutator,
        value: impl Into<OvsValue>,
    ) -> Result<Self> {
        let value = value.into();
        let schema = self.table.column(column)?;
        if !schema.is_mutable() {
            return Err(Error::validation(format!(
                "column {column} is immutable"
            )));
        }
        if !mutator.applicable_to(schema.kind()) {
            return Err(Error::validation(format!(
                "mutator {} does not apply to column {column}",
                mutator.as_str()
            )));
        }
        schema.validate_elements(&value)?;
        self.mutations.push(Mutation {
            column: column.to_string(),
            mutator,
            value,
        });
        Ok(self)
    }

    pub fn filter(mut self, condition: Condition) -> Result<Self> {
        self.table.column(&condition.column)?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn build(self) -> Operation {
        Operation::Mutate {
            table: self.table.name().to_string(),
            mutations: self.mutations,
            conditions: self.conditions,
        }
    }
}

/// Start a delete against a table.
pub fn delete(table: &TableSchema) -> DeleteBuilder<'_> {
    DeleteBuilder {
        table,
        conditions: Vec::new(),
    }
}

pub struct DeleteBuilder<'a> {
    table: &'a TableSchema,
    conditions: Vec<Condition>,
}

impl<'a> DeleteBuilder<'a> {
    pub fn filter(mut self, condition: Condition) -> Result<Self> {
        self.table.column(&condition.column)?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn build(self) -> Operation {
        Operation::Delete {
            table: self.table.name().to_string(),
            conditions: self.conditions,
        }
    }
}

/// Start a select against a table.
pub fn select(table: &TableSchema) -> SelectBuilder<'_> {
    SelectBuilder {
        table,
        conditions: Vec::new(),
        columns: None,
    }
}

pub struct SelectBuilder<'a> {
    table: &'a TableSchema,
    conditions: Vec<Condition>,
    columns: Option<Vec<String>>,
}

impl<'a> SelectBuilder<'a> {
    pub fn column(mut self, column: &str) -> Result<Self> {
        self.table.column(column)?;
        self.columns
            .get_or_insert_with(Vec::new)
            .push(column.to_string());
        Ok(self)
    }

    pub fn filter(mut self, condition: Condition) -> Result<Self> {
        self.table.column(&condition.column)?;
        self.conditions.push(condition);
        Ok(self)
    }

    pub fn build(self) -> Operation {
        Operation::Select {
            table: self.table.name().to_string(),
            conditions: self.conditions,
            columns: self.columns,
        }
    }
}

/// Build a wait operation: an optimistic-concurrency precondition over the
/// current contents of a table.
pub fn wait(
    table: &TableSchema,
    conditions: Vec<Condition>,
    columns: Vec<String>,
    until: WaitUntil,
    rows: Vec<Row>,
) -> Result<Operation> {
    for condition in &conditions {
        table.column(&condition.column)?;
    }
    for column in &columns {
        table.column(column)?;
    }
    Ok(Operation::Wait {
        table: table.name().to_string(),
        conditions,
        columns,
        until,
        rows,
        timeout_ms: None,
    })
}

/// A commit operation; `durable` requests the change survive a restart.
pub fn commit(durable: bool) -> Operation {
    Operation::Commit { durable }
}

/// An abort operation; always fails the transaction.
pub fn abort() -> Operation {
    Operation::Abort
}

/// A comment recorded in the server log; no database effect.
pub fn comment(text: impl Into<String>) -> Operation {
    Operation::Comment(text.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::bridge_schema;
    use serde_json::json;

    #[test]
    fn test_insert_wire_shape() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();
        let op = insert(bridge)
            .value("name", "br0")
            .unwrap()
            .value("flood_vlans", OvsValue::set([34i64]))
            .unwrap()
            .uuid_name("row_br0")
            .build();

        let encoded = op.to_json();
        assert_eq!(encoded["op"], json!("insert"));
        assert_eq!(encoded["table"], json!("Bridge"));
        assert_eq!(encoded["uuid-name"], json!("row_br0"));
        assert_eq!(encoded["row"]["name"], json!("br0"));
        assert_eq!(encoded["row"]["flood_vlans"], json!(["set", [34]]));
    }

    #[test]
    fn test_insert_rejects_bad_value_before_io() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();
        assert!(matches!(
            insert(bridge).value("name", 42i64),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            insert(bridge).value("nonexistent", "x"),
            Err(Error::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_update_wire_shape() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();
        let op = update(bridge)
            .set("fail_mode", "secure")
            .unwrap()
            .filter(Condition::equals("name", "br0"))
            .unwrap()
            .build();

        let encoded = op.to_json();
        assert_eq!(encoded["op"], json!("update"));
        assert_eq!(encoded["where"], json!([["name", "==", "br0"]]));
        assert_eq!(encoded["row"]["fail_mode"], json!("secure"));
    }

    #[test]
    fn test_mutate_wire_shape() {
        let schema = bridge_schema();
        let ovs = schema.table("Open_vSwitch").unwrap();
        let op = mutate(ovs)
            .mutation(
                "bridges",
                Mutator::Insert,
                OvsValue::Set(vec![Atom::NamedUuid("row_br0".into())]),
            )
            .unwrap()
            .build();

        let encoded = op.to_json();
        assert_eq!(encoded["op"], json!("mutate"));
        assert_eq!(
            encoded["mutations"],
            json!([["bridges", "insert", ["set", [["named-uuid", "row_br0"]]]]])
        );
    }

    #[test]
    fn test_mutator_applicability() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();

        // Arithmetic on a string column is rejected.
        assert!(matches!(
            mutate(bridge).mutation("name", Mutator::Sum, 1i64),
            Err(Error::Validation(_))
        ));
        // Set insert on an atomic column is rejected.
        assert!(matches!(
            mutate(bridge).mutation("name", Mutator::Insert, "x"),
            Err(Error::Validation(_))
        ));
        // Set insert on a set column passes, with element kinds checked.
        assert!(mutate(bridge)
            .mutation("flood_vlans", Mutator::Insert, OvsValue::set([34i64]))
            .is_ok());
        assert!(mutate(bridge)
            .mutation("flood_vlans", Mutator::Insert, OvsValue::set(["bad"]))
            .is_err());
    }

    #[test]
    fn test_select_and_delete_shapes() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();

        let op = select(bridge)
            .column("name")
            .unwrap()
            .filter(Condition::equals("name", "br0"))
            .unwrap()
            .build();
        assert_eq!(op.to_json()["columns"], json!(["name"]));

        let op = delete(bridge)
            .filter(Condition::equals("name", "br0"))
            .unwrap()
            .build();
        assert_eq!(op.to_json()["op"], json!("delete"));
        assert!(op.is_mutating());
    }

    #[test]
    fn test_wait_shape() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();
        let mut expected = Row::new();
        expected.insert("name", "br0");
        let op = wait(
            bridge,
            vec![Condition::equals("name", "br0")],
            vec!["name".to_string()],
            WaitUntil::Equals,
            vec![expected],
        )
        .unwrap();
        let encoded = op.to_json();
        assert_eq!(encoded["op"], json!("wait"));
        assert_eq!(encoded["until"], json!("=="));
        assert_eq!(encoded["rows"], json!([{"name": "br0"}]));
    }

    #[test]
    fn test_commit_abort_comment_shapes() {
        assert_eq!(
            commit(true).to_json(),
            json!({"op": "commit", "durable": true})
        );
        assert_eq!(abort().to_json(), json!({"op": "abort"}));
        assert_eq!(
            comment("add br0").to_json(),
            json!({"op": "comment", "comment": "add br0"})
        );
        assert!(!comment("x").is_mutating());
    }

    #[test]
    fn test_named_uuid_bookkeeping() {
        let schema = bridge_schema();
        let bridge = schema.table("Bridge").unwrap();
        let ovs = schema.table("Open_vSwitch").unwrap();

        let ins = insert(bridge)
            .value("name", "br0")
            .unwrap()
            .uuid_name("row_br0")
            .build();
        assert_eq!(ins.declared_uuid_name(), Some("row_br0"));

        let mutate_op = mutate(ovs)
            .mutation(
                "bridges",
                Mutator::Insert,
                OvsValue::Set(vec![Atom::NamedUuid("row_br0".into())]),
            )
            .unwrap()
            .build();
        assert_eq!(mutate_op.referenced_uuid_names(), vec!["row_br0"]);
    }
}
