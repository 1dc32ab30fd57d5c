//! OVSDB client facade
//!
//! One client per connection. Schemas are fetched once per database and
//! cached for the connection's lifetime; transactions and monitors are
//! built against a fetched schema. All pending work fails with
//! `ConnectionClosed` when the transport goes away.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use ovsdb_core::{Error, Result, Row};
use ovsdb_jsonrpc::{ConnectTarget, JsonRpcEndpoint, NotificationHandler};

use crate::cache::TableCache;
use crate::message::{requests_to_json, MonitorRequest, TableUpdates};
use crate::monitor::{MonitorCallback, MonitorContext, MonitorHandle, MonitorRegistry};
use crate::operations::Operation;
use crate::schema::DatabaseSchema;
use crate::transact::{decode_results, OperationResult, TransactionBuilder};
use crate::typed::{TableBinding, TypedRow};

/// Echo keep-alive configuration. When the connection has been idle for
/// `interval`, the client probes with an `echo` call; an unanswered probe
/// after `timeout` marks the connection dead.
#[derive(Debug, Clone, Copy)]
pub struct EchoConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Where this client is connected.
#[derive(Debug, Clone)]
pub struct OvsdbConnectionInfo {
    endpoint: String,
}

impl OvsdbConnectionInfo {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl fmt::Display for OvsdbConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint)
    }
}

/// Asynchronous client for one OVSDB session.
pub struct OvsdbClient {
    endpoint: Arc<JsonRpcEndpoint>,
    registry: Arc<MonitorRegistry>,
    schemas: Mutex<HashMap<String, Arc<DatabaseSchema>>>,
    info: OvsdbConnectionInfo,
    echo_task: Mutex<Option<JoinHandle<()>>>,
}

impl OvsdbClient {
    /// Connect to a database server.
    pub async fn connect(target: ConnectTarget) -> Result<OvsdbClient> {
        let description = target.description();
        let stream = target.connect().await?;
        Ok(Self::from_stream(stream, description))
    }

    /// Run the engine over an already-established stream. Used by the
    /// transports above and directly by tests.
    pub fn from_stream<S>(stream: S, endpoint_description: impl Into<String>) -> OvsdbClient
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let endpoint = JsonRpcEndpoint::start(stream);
        let registry = MonitorRegistry::new();
        endpoint.set_notification_handler(
            Arc::clone(&registry) as Arc<dyn NotificationHandler>
        );
        let info = OvsdbConnectionInfo {
            endpoint: endpoint_description.into(),
        };
        info!(endpoint = %info, "ovsdb session established");
        OvsdbClient {
            endpoint,
            registry,
            schemas: Mutex::new(HashMap::new()),
            info,
            echo_task: Mutex::new(None),
        }
    }

    /// Database names the server exposes.
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        let result = self.endpoint.call("list_dbs", json!([])).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Schema for a database, from the per-connection cache when present.
    pub async fn get_schema(&self, database: &str) -> Result<Arc<DatabaseSchema>> {
        if let Some(schema) = self.database_schema(database) {
            return Ok(schema);
        }
        self.fetch_schema(database).await
    }

    /// Drop the cached schema and fetch it again from the server.
    pub async fn refresh_schema(&self, database: &str) -> Result<Arc<DatabaseSchema>> {
        self.fetch_schema(database).await
    }

    /// The cached schema, if this connection fetched it already.
    pub fn database_schema(&self, database: &str) -> Option<Arc<DatabaseSchema>> {
        self.schemas
            .lock()
            .expect("schema lock poisoned")
            .get(database)
            .cloned()
    }

    async fn fetch_schema(&self, database: &str) -> Result<Arc<DatabaseSchema>> {
        debug!(database, "fetching schema");
        let result = self.endpoint.call("get_schema", json!([database])).await?;
        let schema = Arc::new(
            DatabaseSchema::from_json(database, &result)?.with_internal_columns(),
        );
        self.schemas
            .lock()
            .expect("schema lock poisoned")
            .insert(database.to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    /// Start accumulating a transaction against a database.
    pub fn transaction(&self, schema: &DatabaseSchema) -> TransactionBuilder<'_> {
        TransactionBuilder::new(self, schema)
    }

    /// Execute a list of operations as one transaction.
    pub async fn transact(
        &self,
        schema: &DatabaseSchema,
        operations: Vec<Operation>,
    ) -> Result<Vec<OperationResult>> {
        let mut builder = self.transaction(schema);
        for operation in operations {
            builder = builder.add(operation);
        }
        builder.execute().await
    }

    pub(crate) async fn transact_raw(
        &self,
        database: &str,
        operations: &[Operation],
    ) -> Result<Vec<OperationResult>> {
        let mut params = Vec::with_capacity(operations.len() + 1);
        params.push(json!(database));
        params.extend(operations.iter().map(Operation::to_json));
        let result = self.endpoint.call("transact", Value::Array(params)).await?;
        decode_results(&result)
    }

    /// Subscribe to table changes.
    ///
    /// Returns the initial table state synchronously; every subsequent
    /// batch reaches `callback` after it has been applied to the
    /// subscription's cache, in receipt order.
    pub async fn monitor(
        &self,
        schema: &Arc<DatabaseSchema>,
        requests: &[MonitorRequest],
        callback: Arc<dyn MonitorCallback>,
    ) -> Result<(MonitorHandle, TableUpdates)> {
        let handle = MonitorHandle::new();
        let context = MonitorContext::new(Arc::clone(schema), callback);
        self.registry.register(&handle, context);

        let params = json!([schema.name(), handle.id(), requests_to_json(requests)]);
        debug!(database = schema.name(), handle = handle.id(), "starting monitor");
        match self.endpoint.call("monitor", params).await {
            Ok(result) => {
                let initial = self.registry.complete_initial(&handle, &result)?;
                Ok((handle, initial))
            }
            Err(e) => {
                self.registry.remove(&handle);
                Err(e)
            }
        }
    }

    /// Stop a subscription. The cache handed out earlier stays readable;
    /// it just stops receiving updates.
    pub async fn cancel_monitor(&self, handle: &MonitorHandle) -> Result<()> {
        if self.registry.remove(handle).is_none() {
            return Err(Error::validation(format!(
                "no such monitor: {}",
                handle.id()
            )));
        }
        self.endpoint
            .call("monitor_cancel", json!([handle.id()]))
            .await?;
        Ok(())
    }

    /// The replicated table state of one subscription.
    pub fn monitor_cache(&self, handle: &MonitorHandle) -> Option<Arc<TableCache>> {
        self.registry.get(handle).map(|context| context.cache())
    }

    /// Round-trip an echo through the server.
    pub async fn echo(&self) -> Result<()> {
        self.endpoint.call("echo", json!([])).await?;
        Ok(())
    }

    /// Start the keep-alive watchdog. Incoming echo requests are always
    /// answered regardless; this adds active probing of an idle peer.
    pub fn start_echo_service(&self, config: EchoConfig) {
        let endpoint = Arc::clone(&self.endpoint);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(config.interval).await;
                if !endpoint.is_active() {
                    return;
                }
                if endpoint.idle_for() < config.interval {
                    continue;
                }
                let probe =
                    tokio::time::timeout(config.timeout, endpoint.call("echo", json!([]))).await;
                match probe {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => {
                        warn!("echo probe failed, closing connection: {}", e);
                        endpoint.close();
                        return;
                    }
                    Err(_) => {
                        warn!("echo probe timed out, closing connection");
                        endpoint.close();
                        return;
                    }
                }
            }
        });
        if let Some(previous) = self
            .echo_task
            .lock()
            .expect("echo lock poisoned")
            .replace(task)
        {
            previous.abort();
        }
    }

    /// Stop the keep-alive watchdog; echo requests from the peer are still
    /// answered.
    pub fn stop_echo_service(&self) {
        if let Some(task) = self.echo_task.lock().expect("echo lock poisoned").take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.endpoint.is_active()
    }

    pub fn connection_info(&self) -> &OvsdbConnectionInfo {
        &self.info
    }

    /// Tear the session down: every in-flight call fails with
    /// `ConnectionClosed` and every monitor callback receives a terminal
    /// exception.
    pub fn disconnect(&self) {
        self.stop_echo_service();
        self.endpoint.close();
    }

    /// A typed row over a fresh, empty row, for building an insert.
    pub fn typed_row(&self, binding: &'static TableBinding) -> Result<TypedRow> {
        TypedRow::bind(self.schema_for(binding)?, binding, Some(Row::new()))
    }

    /// A typed view over an existing row, e.g. one read from a cache.
    pub fn wrap_row(&self, binding: &'static TableBinding, row: Row) -> Result<TypedRow> {
        TypedRow::bind(self.schema_for(binding)?, binding, Some(row))
    }

    /// A row-less schema template, for callers interested in column
    /// support only.
    pub fn schema_template(&self, binding: &'static TableBinding) -> Result<TypedRow> {
        TypedRow::bind(self.schema_for(binding)?, binding, None)
    }

    fn schema_for(&self, binding: &'static TableBinding) -> Result<Arc<DatabaseSchema>> {
        self.database_schema(binding.database)
            .ok_or_else(|| Error::UnknownDatabase(binding.database.to_string()))
    }
}

impl Drop for OvsdbClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}
