//! Monitor subscriptions
//!
//! Each subscription moves through the states: awaiting the initial
//! snapshot, steady, gone. Update notifications are handed off from the
//! connection's reader task to a worker through a channel, so a slow
//! callback can never stall frame delivery or call resolution. Within one
//! subscription, batches are processed strictly in receipt order; batches
//! that race ahead of the initial snapshot are buffered and drained once
//! the snapshot is applied.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use ovsdb_core::{Error, Result};

use ovsdb_jsonrpc::NotificationHandler;

use crate::cache::TableCache;
use crate::message::TableUpdates;
use crate::schema::DatabaseSchema;

/// Receives update batches and terminal errors for one subscription.
pub trait MonitorCallback: Send + Sync {
    /// A batch was applied to the cache.
    fn update(&self, updates: &TableUpdates);

    /// The subscription is dead: connection lost or a batch failed to
    /// parse. No further updates will be delivered.
    fn exception(&self, error: &Error);
}

/// Client-chosen identifier naming one subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MonitorHandle(String);

impl MonitorHandle {
    pub(crate) fn new() -> Self {
        MonitorHandle(Uuid::new_v4().to_string())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

enum MonitorState {
    /// Snapshot not applied yet; incoming batches are buffered in order.
    AwaitingInitial(Vec<Value>),
    Steady,
}

pub(crate) struct MonitorContext {
    schema: Arc<DatabaseSchema>,
    cache: Arc<TableCache>,
    callback: Arc<dyn MonitorCallback>,
    state: Mutex<MonitorState>,
}

impl MonitorContext {
    pub(crate) fn new(
        schema: Arc<DatabaseSchema>,
        callback: Arc<dyn MonitorCallback>,
    ) -> Arc<MonitorContext> {
        Arc::new(MonitorContext {
            schema,
            cache: Arc::new(TableCache::new()),
            callback,
            state: Mutex::new(MonitorState::AwaitingInitial(Vec::new())),
        })
    }

    pub(crate) fn cache(&self) -> Arc<TableCache> {
        Arc::clone(&self.cache)
    }
}

struct Inner {
    monitors: Mutex<HashMap<String, Arc<MonitorContext>>>,
}

impl Inner {
    fn get(&self, handle_id: &str) -> Option<Arc<MonitorContext>> {
        self.monitors
            .lock()
            .expect("monitor lock poisoned")
            .get(handle_id)
            .cloned()
    }

    fn remove(&self, handle_id: &str) -> Option<Arc<MonitorContext>> {
        self.monitors
            .lock()
            .expect("monitor lock poisoned")
            .remove(handle_id)
    }

    /// Parse and apply one steady-state batch. A batch that cannot be
    /// parsed degrades the subscription: the callback sees the error once
    /// and the subscription is dropped, never a partial or skipped apply.
    fn process(&self, handle_id: &str, context: &MonitorContext, updates_json: &Value) {
        match TableUpdates::from_json(&context.schema, updates_json) {
            Ok(updates) => {
                context.cache.apply(&updates);
                context.callback.update(&updates);
            }
            Err(e) => {
                warn!(handle = handle_id, "dropping subscription, bad update batch: {}", e);
                self.remove(handle_id);
                context.callback.exception(&e);
            }
        }
    }
}

/// Routes `update` notifications to their subscriptions.
pub(crate) struct MonitorRegistry {
    inner: Arc<Inner>,
    updates_tx: mpsc::UnboundedSender<(String, Value)>,
}

impl MonitorRegistry {
    pub(crate) fn new() -> Arc<MonitorRegistry> {
        let inner = Arc::new(Inner {
            monitors: Mutex::new(HashMap::new()),
        });
        let (updates_tx, mut updates_rx) = mpsc::unbounded_channel::<(String, Value)>();

        let worker_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            while let Some((handle_id, updates_json)) = updates_rx.recv().await {
                let context = match worker_inner.get(&handle_id) {
                    Some(context) => context,
                    None => {
                        debug!(handle = %handle_id, "update for unknown monitor, ignoring");
                        continue;
                    }
                };
                let mut state = context.state.lock().expect("state lock poisoned");
                match &mut *state {
                    MonitorState::AwaitingInitial(buffer) => buffer.push(updates_json),
                    MonitorState::Steady => {
                        drop(state);
                        worker_inner.process(&handle_id, &context, &updates_json);
                    }
                }
            }
        });

        Arc::new(MonitorRegistry { inner, updates_tx })
    }

    pub(crate) fn register(&self, handle: &MonitorHandle, context: Arc<MonitorContext>) {
        self.inner
            .monitors
            .lock()
            .expect("monitor lock poisoned")
            .insert(handle.id().to_string(), context);
    }

    pub(crate) fn remove(&self, handle: &MonitorHandle) -> Option<Arc<MonitorContext>> {
        self.inner.remove(handle.id())
    }

    pub(crate) fn get(&self, handle: &MonitorHandle) -> Option<Arc<MonitorContext>> {
        self.inner.get(handle.id())
    }

    /// Apply the initial snapshot, then drain any batches that arrived
    /// while it was in flight, in receipt order, before entering steady
    /// state.
    pub(crate) fn complete_initial(
        &self,
        handle: &MonitorHandle,
        initial_json: &Value,
    ) -> Result<TableUpdates> {
        let context = self
            .inner
            .get(handle.id())
            .ok_or_else(|| Error::protocol(format!("monitor {} is gone", handle.id())))?;

        let mut state = context.state.lock().expect("state lock poisoned");
        let initial = match TableUpdates::from_json(&context.schema, initial_json) {
            Ok(initial) => initial,
            Err(e) => {
                drop(state);
                self.inner.remove(handle.id());
                return Err(e);
            }
        };
        context.cache.apply(&initial);

        let buffered = match &mut *state {
            MonitorState::AwaitingInitial(buffer) => std::mem::take(buffer),
            MonitorState::Steady => Vec::new(),
        };
        for updates_json in &buffered {
            self.inner.process(handle.id(), &context, updates_json);
        }
        *state = MonitorState::Steady;
        Ok(initial)
    }
}

impl NotificationHandler for MonitorRegistry {
    fn notify(&self, method: &str, params: Value) {
        if method != "update" {
            debug!(method, "ignoring unhandled notification");
            return;
        }
        let mut params = match params {
            Value::Array(params) if params.len() >= 2 => params,
            other => {
                warn!("malformed update notification params: {other}");
                return;
            }
        };
        let updates_json = params.remove(1);
        let handle_id = match params.remove(0) {
            Value::String(id) => id,
            other => {
                warn!("update notification with non-string monitor id: {other}");
                return;
            }
        };
        // Non-blocking handoff; the worker preserves receipt order.
        let _ = self.updates_tx.send((handle_id, updates_json));
    }

    fn disconnected(&self, error: &Error) {
        let contexts: Vec<Arc<MonitorContext>> = {
            let mut monitors = self.inner.monitors.lock().expect("monitor lock poisoned");
            monitors.drain().map(|(_, context)| context).collect()
        };
        for context in contexts {
            context.callback.exception(error);
        }
    }
}
