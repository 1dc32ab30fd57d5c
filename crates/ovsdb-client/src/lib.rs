//! ovsdb-client: client engine for the OVSDB management protocol (RFC 7047)
//!
//! This crate provides:
//! - Schema fetching and a self-describing schema model
//! - A transaction builder implementing the OVSDB operation algebra
//! - Monitor subscriptions replicating tables into a local cache
//! - Typed row projection over schema-described tables

pub mod cache;
pub mod client;
pub mod message;
pub mod monitor;
pub mod operations;
pub mod schema;
#[cfg(test)]
pub(crate) mod testutil;
pub mod transact;
pub mod typed;

pub use cache::TableCache;
pub use client::{EchoConfig, OvsdbClient, OvsdbConnectionInfo};
pub use message::{MonitorRequest, MonitorSelect, RowUpdate, TableUpdate, TableUpdates};
pub use monitor::{MonitorCallback, MonitorHandle};
pub use operations::{
    abort, comment, commit, delete, insert, mutate, select, update, wait, Condition,
    ConditionFunction, Mutation, Mutator, Operation, WaitUntil,
};
pub use schema::{BaseKind, ColumnKind, ColumnSchema, DatabaseSchema, TableSchema};
pub use transact::{OperationError, OperationResult, TransactionBuilder};
pub use typed::{ColumnBinding, TableBinding, TypedRow};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::cache::TableCache;
    pub use super::client::{EchoConfig, OvsdbClient};
    pub use super::message::{MonitorRequest, MonitorSelect, TableUpdates};
    pub use super::monitor::{MonitorCallback, MonitorHandle};
    pub use super::operations::{
        abort, comment, commit, delete, insert, mutate, select, update, Condition, Mutator,
        Operation,
    };
    pub use super::schema::DatabaseSchema;
    pub use super::transact::{OperationResult, TransactionBuilder};
    pub use super::typed::{ColumnBinding, TableBinding, TypedRow};
    pub use ovsdb_core::prelude::*;
    pub use ovsdb_jsonrpc::ConnectTarget;
}
