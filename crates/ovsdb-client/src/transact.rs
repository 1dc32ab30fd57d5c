//! Transaction builder and result decoding
//!
//! A builder accumulates operations in order and submits them as one
//! `transact` call. The whole transaction is atomic on the server: either
//! all non-comment, non-wait operations commit or none do. The server may
//! truncate the result array at the first failing operation, so callers
//! compare result count against operation count to tell partial failure
//! from full completion.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use ovsdb_core::{Atom, Error, OvsValue, Result, Row};

use crate::client::OvsdbClient;
use crate::operations::Operation;
use crate::schema::DatabaseSchema;

/// A server-reported per-operation failure. Surfaced as data, never as an
/// `Err`, so callers can inspect which operation failed.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationError {
    pub error: String,
    pub details: Option<String>,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.details {
            Some(details) => write!(f, "{}: {}", self.error, details),
            None => write!(f, "{}", self.error),
        }
    }
}

/// Decoded result of one submitted operation, in submission order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OperationResult {
    pub count: Option<u64>,
    pub uuid: Option<Uuid>,
    pub rows: Option<Vec<Row>>,
    pub error: Option<OperationError>,
}

impl OperationResult {
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub(crate) fn from_json(json: &Value) -> Result<OperationResult> {
        // A null element is what servers put after the failed operation.
        if json.is_null() {
            return Ok(OperationResult::default());
        }
        let obj = json
            .as_object()
            .ok_or_else(|| Error::protocol(format!("operation result is not an object: {json}")))?;

        if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
            let error = error
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            let details = obj
                .get("details")
                .and_then(Value::as_str)
                .map(str::to_string);
            return Ok(OperationResult {
                error: Some(OperationError { error, details }),
                ..OperationResult::default()
            });
        }

        let count = obj.get("count").and_then(Value::as_u64);
        let uuid = match obj.get("uuid") {
            Some(value) => match OvsValue::from_json(value)? {
                OvsValue::Atom(Atom::Uuid(uuid)) => Some(uuid),
                other => {
                    return Err(Error::protocol(format!(
                        "operation result uuid is not a uuid: {other}"
                    )))
                }
            },
            None => None,
        };
        let rows = match obj.get("rows") {
            Some(rows) => {
                let array = rows
                    .as_array()
                    .ok_or_else(|| Error::protocol(format!("rows is not an array: {rows}")))?;
                Some(array.iter().map(Row::from_json).collect::<Result<_>>()?)
            }
            None => None,
        };

        Ok(OperationResult {
            count,
            uuid,
            rows,
            error: None,
        })
    }
}

/// Fluent accumulator for one `transact` call.
pub struct TransactionBuilder<'a> {
    client: &'a OvsdbClient,
    database: String,
    operations: Vec<Operation>,
    executed: bool,
}

impl<'a> TransactionBuilder<'a> {
    pub(crate) fn new(client: &'a OvsdbClient, schema: &DatabaseSchema) -> Self {
        Self {
            client,
            database: schema.name().to_string(),
            operations: Vec::new(),
            executed: false,
        }
    }

    /// Append an operation; order is preserved through execution.
    pub fn add(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }

    /// The accumulated operations, available before and after execution for
    /// diagnostics.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    /// Whether `execute` has already run.
    pub fn executed(&self) -> bool {
        self.executed
    }

    /// Check that every named UUID referenced by the accumulated operations
    /// is declared by an insert in this same transaction. Names never
    /// resolve across transactions.
    fn check_uuid_names(&self) -> Result<()> {
        let declared: HashSet<&str> = self
            .operations
            .iter()
            .filter_map(Operation::declared_uuid_name)
            .collect();
        for operation in &self.operations {
            for name in operation.referenced_uuid_names() {
                if !declared.contains(name) {
                    return Err(Error::validation(format!(
                        "named uuid \"{name}\" is not declared by any insert in this transaction"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Submit the accumulated operations as a single `transact` call and
    /// decode the positional result array.
    ///
    /// Executing again re-submits exactly the operations still accumulated;
    /// nothing is implicitly replayed beyond them.
    pub async fn execute(&mut self) -> Result<Vec<OperationResult>> {
        self.check_uuid_names()?;
        debug!(
            database = %self.database,
            operations = self.operations.len(),
            "executing transaction"
        );
        self.executed = true;
        self.client
            .transact_raw(&self.database, &self.operations)
            .await
    }

    /// Whether a result array covers every submitted operation. A shorter
    /// array means the server stopped at a failing operation.
    pub fn is_complete(&self, results: &[OperationResult]) -> bool {
        results.len() == self.operations.len()
    }
}

impl fmt::Display for TransactionBuilder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "transact[{}, {} operation(s)",
            self.database,
            self.operations.len()
        )?;
        for operation in &self.operations {
            write!(f, ", {operation}")?;
        }
        write!(f, "]")
    }
}

/// Decode a `transact` reply into per-operation results.
pub(crate) fn decode_results(result: &Value) -> Result<Vec<OperationResult>> {
    let array = result
        .as_array()
        .ok_or_else(|| Error::protocol(format!("transact result is not an array: {result}")))?;
    array.iter().map(OperationResult::from_json).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_insert_result_uuid() {
        let results = decode_results(&json!([
            {"uuid": ["uuid", "36bef046-7da7-43a5-905a-c17899216fcb"]}
        ]))
        .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].uuid.unwrap().to_string(),
            "36bef046-7da7-43a5-905a-c17899216fcb"
        );
        assert!(!results[0].is_error());
    }

    #[test]
    fn test_decode_error_and_trailing_null() {
        let results = decode_results(&json!([
            {"count": 1},
            {"error": "constraint violation", "details": "duplicate bridge name"},
            null
        ]))
        .unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].count, Some(1));
        assert!(results[1].is_error());
        assert_eq!(
            results[1].error.as_ref().unwrap().to_string(),
            "constraint violation: duplicate bridge name"
        );
        assert!(!results[2].is_error());
    }

    #[test]
    fn test_decode_select_rows() {
        let results = decode_results(&json!([
            {"rows": [{"name": "br0"}, {"name": "br1"}]}
        ]))
        .unwrap();
        let rows = results[0].rows.as_ref().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("name").unwrap().as_atom().unwrap().as_str(), Some("br0"));
    }

    #[test]
    fn test_decode_rejects_non_array() {
        assert!(decode_results(&json!({"count": 1})).is_err());
    }
}
