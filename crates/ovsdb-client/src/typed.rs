//! Typed row projection
//!
//! A `TableBinding` is a static table of attribute-to-column entries, each
//! carrying the schema version range that introduced (and possibly removed)
//! the column. One generic dispatcher interprets the binding against a
//! `DatabaseSchema` and an optional backing `Row` — there is no per-call
//! reflection and no generated code. Mandatory columns gate construction;
//! optional columns simply read as absent when the schema predates them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use ovsdb_core::{Error, OvsValue, Result, Row, Version};
use uuid::Uuid;

use crate::schema::DatabaseSchema;

/// One attribute of a typed table: a named accessor bound to a column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnBinding {
    pub attribute: &'static str,
    pub column: &'static str,
    pub from_version: Option<Version>,
    pub until_version: Option<Version>,
    pub mandatory: bool,
}

impl ColumnBinding {
    pub const fn new(attribute: &'static str, column: &'static str) -> Self {
        Self {
            attribute,
            column,
            from_version: None,
            until_version: None,
            mandatory: false,
        }
    }

    /// Construction fails when the column is missing or version-gated out.
    pub const fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Schema version that introduced the column.
    pub const fn since(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    /// Last schema version carrying the column.
    pub const fn until(mut self, version: Version) -> Self {
        self.until_version = Some(version);
        self
    }
}

/// Static description of a typed table.
#[derive(Debug, Clone, Copy)]
pub struct TableBinding {
    pub database: &'static str,
    pub table: &'static str,
    pub from_version: Option<Version>,
    pub until_version: Option<Version>,
    pub columns: &'static [ColumnBinding],
}

impl TableBinding {
    pub const fn new(
        database: &'static str,
        table: &'static str,
        columns: &'static [ColumnBinding],
    ) -> Self {
        Self {
            database,
            table,
            from_version: None,
            until_version: None,
            columns,
        }
    }

    pub const fn since(mut self, version: Version) -> Self {
        self.from_version = Some(version);
        self
    }

    pub const fn until(mut self, version: Version) -> Self {
        self.until_version = Some(version);
        self
    }

    pub fn column(&self, attribute: &str) -> Option<&ColumnBinding> {
        self.columns.iter().find(|c| c.attribute == attribute)
    }
}

fn version_in_range(
    version: Version,
    from: Option<Version>,
    until: Option<Version>,
) -> bool {
    from.map_or(true, |from| version >= from) && until.map_or(true, |until| version <= until)
}

/// A typed view over a generically-stored row.
///
/// Bound either to a fresh empty row (for building an insert) or to an
/// existing row (for read access). A row-less projection is a pure schema
/// template: readable as all-absent, not writable.
#[derive(Debug, Clone)]
pub struct TypedRow {
    binding: &'static TableBinding,
    schema: Arc<DatabaseSchema>,
    row: Option<Row>,
}

impl TypedRow {
    /// Bind a table binding against a schema.
    ///
    /// Fails with `SchemaVersionMismatch` when the table is absent, the
    /// schema version falls outside the binding's range, or a mandatory
    /// column is unsupported. Optional columns never fail construction.
    pub fn bind(
        schema: Arc<DatabaseSchema>,
        binding: &'static TableBinding,
        row: Option<Row>,
    ) -> Result<TypedRow> {
        if !binding.database.is_empty() && !binding.database.eq_ignore_ascii_case(schema.name()) {
            return Err(Error::validation(format!(
                "binding for table {} targets database {}, schema describes {}",
                binding.table,
                binding.database,
                schema.name()
            )));
        }

        let version = schema.version();
        if !version_in_range(version, binding.from_version, binding.until_version) {
            return Err(Error::version_mismatch(format!(
                "table {} is not supported at schema version {version}",
                binding.table
            )));
        }
        if !schema.has_table(binding.table) {
            return Err(Error::version_mismatch(format!(
                "schema {} has no table {}",
                schema.name(),
                binding.table
            )));
        }

        for column in binding.columns {
            if column.mandatory && !Self::column_available(&schema, version, binding.table, column)
            {
                return Err(Error::version_mismatch(format!(
                    "mandatory column {} of table {} is not supported at schema version {version}",
                    column.column, binding.table
                )));
            }
        }

        Ok(TypedRow {
            binding,
            schema,
            row,
        })
    }

    fn column_available(
        schema: &DatabaseSchema,
        version: Version,
        table: &str,
        column: &ColumnBinding,
    ) -> bool {
        version_in_range(version, column.from_version, column.until_version)
            && schema
                .table(table)
                .map(|t| t.has_column(column.column))
                .unwrap_or(false)
    }

    /// Whether an attribute's column is present and version-supported.
    pub fn supports(&self, attribute: &str) -> bool {
        match self.binding.column(attribute) {
            Some(column) => Self::column_available(
                &self.schema,
                self.schema.version(),
                self.binding.table,
                column,
            ),
            None => false,
        }
    }

    /// Read an attribute. Absent and version-unsupported columns read as
    /// `None`; an attribute the binding does not declare is an error.
    pub fn get(&self, attribute: &str) -> Result<Option<&OvsValue>> {
        let column = self.lookup(attribute)?;
        if !Self::column_available(
            &self.schema,
            self.schema.version(),
            self.binding.table,
            column,
        ) {
            return Ok(None);
        }
        Ok(self.row.as_ref().and_then(|row| row.get(column.column)))
    }

    /// Write an attribute, validated against the column schema. Writing a
    /// version-unsupported column fails with `SchemaVersionMismatch`;
    /// writing on a row-less template is a validation error.
    pub fn set(&mut self, attribute: &str, value: impl Into<OvsValue>) -> Result<&mut Self> {
        let column = self.lookup(attribute)?;
        let column_name = column.column;
        if !Self::column_available(
            &self.schema,
            self.schema.version(),
            self.binding.table,
            column,
        ) {
            return Err(Error::version_mismatch(format!(
                "column {} of table {} is not supported at schema version {}",
                column.column,
                self.binding.table,
                self.schema.version()
            )));
        }
        let value = value.into();
        let table = self.schema.table(self.binding.table)?;
        table.column(column.column)?.validate(&value)?;

        let row = self.row.as_mut().ok_or_else(|| {
            Error::validation(format!(
                "typed row for {} is a schema template without a backing row",
                self.binding.table
            ))
        })?;
        row.insert(column_name, value);
        Ok(self)
    }

    fn lookup(&self, attribute: &str) -> Result<&ColumnBinding> {
        self.binding.column(attribute).ok_or_else(|| {
            Error::validation(format!(
                "table {} has no attribute {attribute}",
                self.binding.table
            ))
        })
    }

    pub fn table_name(&self) -> &str {
        self.binding.table
    }

    pub fn binding(&self) -> &'static TableBinding {
        self.binding
    }

    /// The row identity, when the backing row carries `_uuid`.
    pub fn uuid(&self) -> Option<Uuid> {
        self.row.as_ref().and_then(Row::uuid)
    }

    pub fn row(&self) -> Option<&Row> {
        self.row.as_ref()
    }

    /// Surrender the backing row, e.g. to feed an insert operation.
    pub fn into_row(self) -> Option<Row> {
        self.row
    }
}

/// Structural equality: same table, same underlying row. Two projections of
/// equal rows are equal; two row-less templates of the same table are equal.
impl PartialEq for TypedRow {
    fn eq(&self, other: &Self) -> bool {
        self.binding.table == other.binding.table && self.row == other.row
    }
}

impl Hash for TypedRow {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.binding.table.hash(state);
        self.row.hash(state);
    }
}

impl fmt::Display for TypedRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.row {
            Some(row) => write!(f, "{}[{row}]", self.binding.table),
            None => write!(f, "{}[template]", self.binding.table),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::bridge_schema;
    use ovsdb_core::Atom;

    static BRIDGE_COLUMNS: &[ColumnBinding] = &[
        ColumnBinding::new("name", "name").mandatory(),
        ColumnBinding::new("stp_enable", "stp_enable"),
        ColumnBinding::new("flood_vlans", "flood_vlans"),
        ColumnBinding::new("auto_attach", "auto_attach").since(Version::new(7, 11, 0)),
    ];

    static BRIDGE: TableBinding = TableBinding::new("Open_vSwitch", "Bridge", BRIDGE_COLUMNS);

    static FUTURE_COLUMNS: &[ColumnBinding] =
        &[ColumnBinding::new("name", "name").mandatory()];

    static FUTURE_TABLE: TableBinding =
        TableBinding::new("Open_vSwitch", "Bridge", FUTURE_COLUMNS)
            .since(Version::new(99, 0, 0));

    fn schema() -> Arc<DatabaseSchema> {
        Arc::new(bridge_schema())
    }

    #[test]
    fn test_construction_version_gating() {
        // Table-level minimum above the schema version fails.
        let err = TypedRow::bind(schema(), &FUTURE_TABLE, None).unwrap_err();
        assert!(matches!(err, Error::SchemaVersionMismatch(_)));

        // At or above the minimum succeeds.
        assert!(TypedRow::bind(schema(), &BRIDGE, None).is_ok());
    }

    #[test]
    fn test_optional_column_degrades_to_absent() {
        let mut typed = TypedRow::bind(schema(), &BRIDGE, Some(Row::new())).unwrap();
        // auto_attach needs 7.11.0; the fixture schema is 7.6.2.
        assert!(!typed.supports("auto_attach"));
        assert_eq!(typed.get("auto_attach").unwrap(), None);
        assert!(matches!(
            typed.set("auto_attach", "x"),
            Err(Error::SchemaVersionMismatch(_))
        ));
    }

    #[test]
    fn test_set_get_roundtrip() {
        let mut typed = TypedRow::bind(schema(), &BRIDGE, Some(Row::new())).unwrap();
        typed.set("name", "br0").unwrap();
        typed.set("flood_vlans", OvsValue::set([34i64])).unwrap();

        assert_eq!(
            typed.get("name").unwrap().unwrap().as_atom().unwrap().as_str(),
            Some("br0")
        );
        assert_eq!(
            typed.get("flood_vlans").unwrap().unwrap().to_set().unwrap(),
            vec![Atom::Integer(34)]
        );
    }

    #[test]
    fn test_set_validates_through_column_schema() {
        let mut typed = TypedRow::bind(schema(), &BRIDGE, Some(Row::new())).unwrap();
        assert!(matches!(
            typed.set("name", 42i64),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            typed.get("no_such_attribute"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_template_reads_absent_and_rejects_writes() {
        let mut template = TypedRow::bind(schema(), &BRIDGE, None).unwrap();
        assert_eq!(template.get("name").unwrap(), None);
        assert!(matches!(
            template.set("name", "br0"),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_structural_equality_and_hash() {
        use std::collections::hash_map::DefaultHasher;

        let mut first = TypedRow::bind(schema(), &BRIDGE, Some(Row::new())).unwrap();
        first.set("name", "br0").unwrap();
        let mut second = TypedRow::bind(schema(), &BRIDGE, Some(Row::new())).unwrap();
        second.set("name", "br0").unwrap();
        assert_eq!(first, second);

        let hash = |typed: &TypedRow| {
            let mut hasher = DefaultHasher::new();
            typed.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(hash(&first), hash(&second));

        second.set("name", "br1").unwrap();
        assert_ne!(first, second);

        // A row-less template equals itself and hashes stably.
        let template = TypedRow::bind(schema(), &BRIDGE, None).unwrap();
        let other_template = TypedRow::bind(schema(), &BRIDGE, None).unwrap();
        assert_eq!(template, other_template);
        assert_eq!(hash(&template), hash(&other_template));
    }
}
