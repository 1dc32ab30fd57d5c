//! Self-describing database schema model
//!
//! Parsed once per database per connection from the `get_schema` reply and
//! immutable afterwards. Column kinds carry the cardinality and constraint
//! information needed to validate operation payloads before any network I/O.

use std::collections::HashMap;

use serde_json::Value;
use tracing::trace;

use ovsdb_core::{Atom, Error, OvsValue, Result, Row, Version};

/// Scalar base kinds a column can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseKind {
    Integer,
    Real,
    Boolean,
    String,
    Uuid,
}

impl BaseKind {
    fn from_name(name: &str) -> Result<BaseKind> {
        match name {
            "integer" => Ok(BaseKind::Integer),
            "real" => Ok(BaseKind::Real),
            "boolean" => Ok(BaseKind::Boolean),
            "string" => Ok(BaseKind::String),
            "uuid" => Ok(BaseKind::Uuid),
            other => Err(Error::protocol(format!("unknown base type: {other}"))),
        }
    }

    /// Whether an atom is acceptable for this base kind. Integers satisfy
    /// real columns; named UUIDs satisfy uuid columns (they resolve
    /// server-side within the transaction).
    fn admits(&self, atom: &Atom) -> bool {
        matches!(
            (self, atom),
            (BaseKind::Integer, Atom::Integer(_))
                | (BaseKind::Real, Atom::Real(_))
                | (BaseKind::Real, Atom::Integer(_))
                | (BaseKind::Boolean, Atom::Boolean(_))
                | (BaseKind::String, Atom::String(_))
                | (BaseKind::Uuid, Atom::Uuid(_))
                | (BaseKind::Uuid, Atom::NamedUuid(_))
        )
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, BaseKind::Integer | BaseKind::Real)
    }
}

/// A base type plus its optional enumeration constraint.
#[derive(Debug, Clone, PartialEq)]
pub struct BaseType {
    pub kind: BaseKind,
    pub enum_values: Option<Vec<Atom>>,
}

impl BaseType {
    fn from_json(json: &Value) -> Result<BaseType> {
        match json {
            Value::String(name) => Ok(BaseType {
                kind: BaseKind::from_name(name)?,
                enum_values: None,
            }),
            Value::Object(obj) => {
                let name = obj
                    .get("type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| Error::protocol(format!("base type missing \"type\": {json}")))?;
                let kind = BaseKind::from_name(name)?;
                let enum_values = match obj.get("enum") {
                    Some(spec) => Some(
                        OvsValue::from_json(spec)?
                            .to_set()
                            .ok_or_else(|| Error::protocol(format!("bad enum constraint: {spec}")))?,
                    ),
                    None => None,
                };
                Ok(BaseType { kind, enum_values })
            }
            _ => Err(Error::protocol(format!("bad base type: {json}"))),
        }
    }

    fn admits(&self, atom: &Atom) -> bool {
        if !self.kind.admits(atom) {
            return false;
        }
        match &self.enum_values {
            Some(allowed) => allowed.contains(atom),
            None => true,
        }
    }
}

/// Upper cardinality bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaxCardinality {
    Finite(u64),
    Unlimited,
}

impl MaxCardinality {
    fn allows(&self, n: usize) -> bool {
        match self {
            MaxCardinality::Finite(max) => (n as u64) <= *max,
            MaxCardinality::Unlimited => true,
        }
    }
}

/// The declared value kind of a column: an atomic scalar, a set of scalars,
/// or a map of scalars to scalars, with min/max cardinality.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnKind {
    pub key: BaseType,
    pub value: Option<BaseType>,
    pub min: u64,
    pub max: MaxCardinality,
}

impl ColumnKind {
    pub fn atomic(kind: BaseKind) -> ColumnKind {
        ColumnKind {
            key: BaseType {
                kind,
                enum_values: None,
            },
            value: None,
            min: 1,
            max: MaxCardinality::Finite(1),
        }
    }

    fn from_json(json: &Value) -> Result<ColumnKind> {
        match json {
            Value::String(_) => Ok(ColumnKind {
                key: BaseType::from_json(json)?,
                value: None,
                min: 1,
                max: MaxCardinality::Finite(1),
            }),
            Value::Object(obj) => {
                let key = obj
                    .get("key")
                    .ok_or_else(|| Error::protocol(format!("column type missing \"key\": {json}")))?;
                let key = BaseType::from_json(key)?;
                let value = obj.get("value").map(BaseType::from_json).transpose()?;
                let min = match obj.get("min") {
                    Some(v) => v
                        .as_u64()
                        .ok_or_else(|| Error::protocol(format!("bad min: {v}")))?,
                    None => 1,
                };
                let max = match obj.get("max") {
                    Some(Value::String(s)) if s == "unlimited" => MaxCardinality::Unlimited,
                    Some(v) => MaxCardinality::Finite(
                        v.as_u64()
                            .ok_or_else(|| Error::protocol(format!("bad max: {v}")))?,
                    ),
                    None => MaxCardinality::Finite(1),
                };
                Ok(ColumnKind {
                    key,
                    value,
                    min,
                    max,
                })
            }
            _ => Err(Error::protocol(format!("bad column type: {json}"))),
        }
    }

    /// A column holding exactly one scalar.
    pub fn is_atomic(&self) -> bool {
        self.value.is_none() && self.min == 1 && self.max == MaxCardinality::Finite(1)
    }

    pub fn is_map(&self) -> bool {
        self.value.is_some()
    }

    pub fn is_set(&self) -> bool {
        !self.is_map() && !self.is_atomic()
    }
}

/// Schema for one column.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSchema {
    name: String,
    kind: ColumnKind,
    mutable: bool,
    ephemeral: bool,
}

impl ColumnSchema {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> ColumnSchema {
        ColumnSchema {
            name: name.into(),
            kind,
            mutable: true,
            ephemeral: false,
        }
    }

    fn from_json(name: &str, json: &Value) -> Result<ColumnSchema> {
        let type_spec = json
            .get("type")
            .ok_or_else(|| Error::protocol(format!("column {name} missing \"type\"")))?;
        Ok(ColumnSchema {
            name: name.to_string(),
            kind: ColumnKind::from_json(type_spec)?,
            mutable: json.get("mutable").and_then(Value::as_bool).unwrap_or(true),
            ephemeral: json
                .get("ephemeral")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ColumnKind {
        &self.kind
    }

    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Validate a value against this column's type and cardinality. Fails
    /// before any network I/O.
    pub fn validate(&self, value: &OvsValue) -> Result<()> {
        self.check_kinds(value)?;
        let n = value.cardinality();
        if (n as u64) < self.kind.min || !self.kind.max.allows(n) {
            return Err(Error::validation(format!(
                "column {} takes between {} and {} elements, got {n}",
                self.name,
                self.kind.min,
                match self.kind.max {
                    MaxCardinality::Finite(max) => max.to_string(),
                    MaxCardinality::Unlimited => "unlimited".to_string(),
                },
            )));
        }
        Ok(())
    }

    /// Validate element kinds only, ignoring cardinality. Mutation operands
    /// add or remove a subset, so the column bounds do not apply to them.
    pub fn validate_elements(&self, value: &OvsValue) -> Result<()> {
        self.check_kinds(value)
    }

    fn check_kinds(&self, value: &OvsValue) -> Result<()> {
        let fail = |detail: String| -> Result<()> {
            Err(Error::validation(format!(
                "column {}: {detail}",
                self.name
            )))
        };
        match value {
            OvsValue::Map(pairs) => {
                let value_type = match &self.kind.value {
                    Some(value_type) => value_type,
                    None => return fail("map value for a non-map column".into()),
                };
                for (k, v) in pairs {
                    if !self.kind.key.admits(k) {
                        return fail(format!("map key {k} does not match declared kind"));
                    }
                    if !value_type.admits(v) {
                        return fail(format!("map value {v} does not match declared kind"));
                    }
                }
                Ok(())
            }
            OvsValue::Set(atoms) => {
                if self.kind.is_map() {
                    // A set against a map column carries keys, as in a
                    // delete-by-keys mutation operand.
                    for atom in atoms {
                        if !self.kind.key.admits(atom) {
                            return fail(format!("set element {atom} does not match key kind"));
                        }
                    }
                    return Ok(());
                }
                for atom in atoms {
                    if !self.kind.key.admits(atom) {
                        return fail(format!("set element {atom} does not match declared kind"));
                    }
                }
                Ok(())
            }
            OvsValue::Atom(atom) => {
                if self.kind.is_map() {
                    return fail("scalar value for a map column".into());
                }
                if !self.kind.key.admits(atom) {
                    return fail(format!("value {atom} does not match declared kind"));
                }
                Ok(())
            }
        }
    }
}

/// Schema for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableSchema {
    name: String,
    columns: HashMap<String, ColumnSchema>,
}

impl TableSchema {
    pub fn from_json(name: &str, json: &Value) -> Result<TableSchema> {
        let columns_json = json
            .get("columns")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::protocol(format!("bad table schema {name}, expected \"columns\""))
            })?;
        let mut columns = HashMap::with_capacity(columns_json.len());
        for (column_name, column_json) in columns_json {
            trace!(table = name, column = %column_name, "read column schema");
            columns.insert(
                column_name.clone(),
                ColumnSchema::from_json(column_name, column_json)?,
            );
        }
        Ok(TableSchema {
            name: name.to_string(),
            columns,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn column(&self, column: &str) -> Result<&ColumnSchema> {
        self.columns
            .get(column)
            .ok_or_else(|| Error::unknown_column(&self.name, column))
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &String> {
        self.columns.keys()
    }

    pub fn columns(&self) -> impl Iterator<Item = &ColumnSchema> {
        self.columns.values()
    }

    /// Parse a row object. Columns the schema does not describe are skipped:
    /// some servers report "hidden" columns in unfiltered monitors that
    /// never appear in `get_schema`.
    pub fn row_from_json(&self, json: &Value) -> Result<Row> {
        let obj = json
            .as_object()
            .ok_or_else(|| Error::protocol(format!("row is not an object: {json}")))?;
        let mut row = Row::new();
        for (column, value) in obj {
            if self.columns.contains_key(column) {
                row.insert(column.clone(), OvsValue::from_json(value)?);
            } else {
                trace!(table = %self.name, column = %column, "skipping undescribed column");
            }
        }
        Ok(row)
    }

    /// RFC 7047 §3.2: every table carries `_uuid` and `_version` columns
    /// that `get_schema` does not report. They matter for select, update and
    /// mutate, so the schema model declares them explicitly.
    fn with_internal_columns(mut self) -> TableSchema {
        for name in ["_uuid", "_version"] {
            self.columns.insert(
                name.to_string(),
                ColumnSchema::new(name, ColumnKind::atomic(BaseKind::Uuid)),
            );
        }
        self
    }
}

/// Immutable snapshot of one database's schema.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseSchema {
    name: String,
    version: Version,
    tables: HashMap<String, TableSchema>,
}

impl DatabaseSchema {
    /// Parse a `get_schema` reply.
    pub fn from_json(name: &str, json: &Value) -> Result<DatabaseSchema> {
        let tables_json = json.get("tables").and_then(Value::as_object).ok_or_else(|| {
            Error::protocol("bad database schema, expected \"tables\" as child".to_string())
        })?;
        let version = json
            .get("version")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::protocol("bad database schema, expected \"version\" as child".to_string())
            })?
            .parse::<Version>()?;

        let mut tables = HashMap::with_capacity(tables_json.len());
        for (table_name, table_json) in tables_json {
            trace!(table = %table_name, "read table schema");
            tables.insert(
                table_name.clone(),
                TableSchema::from_json(table_name, table_json)?,
            );
        }

        Ok(DatabaseSchema {
            name: name.to_string(),
            version,
            tables,
        })
    }

    /// Add the `_uuid`/`_version` pseudo-columns to every table.
    pub fn with_internal_columns(mut self) -> DatabaseSchema {
        self.tables = self
            .tables
            .into_iter()
            .map(|(name, table)| (name, table.with_internal_columns()))
            .collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn table(&self, table: &str) -> Result<&TableSchema> {
        self.tables
            .get(table)
            .ok_or_else(|| Error::UnknownTable(table.to_string()))
    }

    pub fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }
}
