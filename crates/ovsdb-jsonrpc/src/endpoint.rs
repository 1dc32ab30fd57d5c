//! Asynchronous JSON-RPC endpoint
//!
//! One endpoint per connection. A reader task decodes frames and classifies
//! them; responses resolve pending calls through oneshot channels, incoming
//! `echo` requests are answered in place, and notifications are routed to a
//! registered handler. A dedicated writer task owns the write half, fed by an
//! unbounded channel, so resolving a caller's future can never stall frame
//! delivery.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use ovsdb_core::{Error, Result};

use crate::codec::JsonFrameDecoder;
use crate::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};

/// Receives frames the endpoint does not consume itself.
pub trait NotificationHandler: Send + Sync {
    /// An unsolicited notification arrived (e.g. `update`).
    fn notify(&self, method: &str, params: Value);

    /// The connection is gone; no further notifications will arrive.
    fn disconnected(&self, error: &Error);
}

type PendingCalls = Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>;

struct Shared {
    pending: PendingCalls,
    handler: Mutex<Option<Arc<dyn NotificationHandler>>>,
    active: AtomicBool,
    last_rx: Mutex<Instant>,
}

impl Shared {
    /// Fail every pending call and notify the handler exactly once.
    fn teardown(&self, reason: &Error) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        let waiters: Vec<_> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.drain().collect()
        };
        for (id, tx) in waiters {
            trace!(id, "failing pending call on teardown");
            let _ = tx.send(Err(Error::ConnectionClosed));
        }
        let handler = self.handler.lock().expect("handler lock poisoned").clone();
        if let Some(handler) = handler {
            handler.disconnected(reason);
        }
    }
}

/// JSON-RPC call endpoint over one bidirectional stream
pub struct JsonRpcEndpoint {
    outbound: mpsc::UnboundedSender<String>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl JsonRpcEndpoint {
    /// Split the stream and spawn the reader and writer tasks.
    pub fn start<S>(stream: S) -> Arc<JsonRpcEndpoint>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::unbounded_channel::<String>();

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            handler: Mutex::new(None),
            active: AtomicBool::new(true),
            last_rx: Mutex::new(Instant::now()),
        });

        let writer = tokio::spawn(Self::run_writer(write_half, outbound_rx, Arc::clone(&shared)));
        let reader = tokio::spawn(Self::run_reader(
            read_half,
            Arc::clone(&shared),
            outbound.clone(),
        ));

        Arc::new(JsonRpcEndpoint {
            outbound,
            shared,
            next_id: AtomicU64::new(0),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
        })
    }

    /// Register the sink for unsolicited notifications.
    pub fn set_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        *self.shared.handler.lock().expect("handler lock poisoned") = Some(handler);
    }

    /// Whether the connection is still up.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Time since the last frame arrived, for keep-alive probing.
    pub fn idle_for(&self) -> Duration {
        self.shared
            .last_rx
            .lock()
            .expect("last_rx lock poisoned")
            .elapsed()
    }

    /// Issue a call and wait for the matching response.
    ///
    /// The pending-call record is registered before the frame is handed to
    /// the writer, so a response can never arrive ahead of the table entry.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        if !self.is_active() {
            return Err(Error::ConnectionClosed);
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::new(method, params, id);
        let encoded = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        debug!(method, id, "sending call");
        if self.outbound.send(encoded).is_err() {
            self.shared
                .pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(Error::ConnectionClosed);
        }

        rx.await.map_err(|_| Error::ConnectionClosed)?
    }

    /// Fire-and-forget notification.
    pub fn notify(&self, method: &str, params: Value) -> Result<()> {
        if !self.is_active() {
            return Err(Error::ConnectionClosed);
        }
        let request = JsonRpcRequest::notification(method, params);
        let encoded = serde_json::to_string(&request)?;
        self.outbound
            .send(encoded)
            .map_err(|_| Error::ConnectionClosed)
    }

    /// Tear the connection down, failing all in-flight calls.
    pub fn close(&self) {
        self.shared.teardown(&Error::ConnectionClosed);
        if let Some(task) = self.reader.lock().expect("reader lock poisoned").take() {
            task.abort();
        }
        if let Some(task) = self.writer.lock().expect("writer lock poisoned").take() {
            task.abort();
        }
    }

    async fn run_writer<W>(
        mut write_half: W,
        mut outbound_rx: mpsc::UnboundedReceiver<String>,
        shared: Arc<Shared>,
    ) where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        while let Some(frame) = outbound_rx.recv().await {
            trace!(bytes = frame.len(), "writing frame");
            if let Err(e) = write_half.write_all(frame.as_bytes()).await {
                error!("write failed: {}", e);
                shared.teardown(&Error::Transport(e.to_string()));
                return;
            }
            if let Err(e) = write_half.flush().await {
                error!("flush failed: {}", e);
                shared.teardown(&Error::Transport(e.to_string()));
                return;
            }
        }
    }

    async fn run_reader<R>(
        mut read_half: R,
        shared: Arc<Shared>,
        outbound: mpsc::UnboundedSender<String>,
    ) where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let mut decoder = JsonFrameDecoder::default();
        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let read = match read_half.read(&mut buf).await {
                Ok(0) => {
                    debug!("peer closed the connection");
                    shared.teardown(&Error::ConnectionClosed);
                    return;
                }
                Ok(n) => n,
                Err(e) => {
                    error!("read failed: {}", e);
                    shared.teardown(&Error::Transport(e.to_string()));
                    return;
                }
            };
            decoder.extend(&buf[..read]);
            *shared.last_rx.lock().expect("last_rx lock poisoned") = Instant::now();

            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => Self::dispatch(frame, &shared, &outbound),
                    Ok(None) => break,
                    Err(e) => {
                        // Once framing is lost there is no way back.
                        error!("frame decode failed: {}", e);
                        shared.teardown(&e);
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(frame: Value, shared: &Arc<Shared>, outbound: &mpsc::UnboundedSender<String>) {
        let message = match JsonRpcMessage::classify(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!("dropping unclassifiable frame: {}", e);
                return;
            }
        };
        match message {
            JsonRpcMessage::Response(response) => Self::resolve(response, shared),
            JsonRpcMessage::Request(request) => Self::answer(request, outbound),
            JsonRpcMessage::Notification(request) => {
                let handler = shared.handler.lock().expect("handler lock poisoned").clone();
                match handler {
                    Some(handler) => handler.notify(&request.method, request.params),
                    None => debug!(method = %request.method, "notification with no handler, ignoring"),
                }
            }
        }
    }

    fn resolve(response: JsonRpcResponse, shared: &Arc<Shared>) {
        let id = match response.id.as_u64() {
            Some(id) => id,
            None => {
                warn!(id = %response.id, "response with non-numeric id, dropping");
                return;
            }
        };
        let waiter = shared
            .pending
            .lock()
            .expect("pending lock poisoned")
            .remove(&id);
        match waiter {
            Some(tx) => {
                let outcome = if response.is_error() {
                    Err(Error::protocol(format!("remote error: {}", response.error)))
                } else {
                    Ok(response.result)
                };
                // A dropped receiver means the caller gave up; nothing to do.
                let _ = tx.send(outcome);
            }
            // Duplicate or late frame; resolving is strictly once.
            None => debug!(id, "response for unknown call id, dropping"),
        }
    }

    /// Answer peer-originated requests. Echo keeps the session alive and
    /// must be answered with its own params; anything else gets a null
    /// result so the peer is never left waiting on us.
    fn answer(request: JsonRpcRequest, outbound: &mpsc::UnboundedSender<String>) {
        let response = match request.method.as_str() {
            "echo" => JsonRpcResponse::success(request.id, request.params),
            other => {
                warn!(method = other, "unhandled request from peer, answering null");
                JsonRpcResponse::success(request.id, Value::Null)
            }
        };
        match serde_json::to_string(&response) {
            Ok(encoded) => {
                let _ = outbound.send(encoded);
            }
            Err(e) => error!("failed to encode response: {}", e),
        }
    }
}

impl Drop for JsonRpcEndpoint {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    async fn read_request(server: &mut DuplexStream) -> Value {
        let mut decoder = JsonFrameDecoder::default();
        let mut buf = [0u8; 4096];
        loop {
            if let Some(frame) = decoder.next_frame().unwrap() {
                return frame;
            }
            let n = server.read(&mut buf).await.unwrap();
            assert!(n > 0, "peer closed while waiting for a request");
            decoder.extend(&buf[..n]);
        }
    }

    async fn send_json(server: &mut DuplexStream, value: Value) {
        server
            .write_all(value.to_string().as_bytes())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_call_roundtrip() {
        let (client, mut server) = duplex(64 * 1024);
        let endpoint = JsonRpcEndpoint::start(client);

        let call = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("list_dbs", json!([])).await }
        });

        let request = read_request(&mut server).await;
        assert_eq!(request["method"], json!("list_dbs"));
        let id = request["id"].clone();
        send_json(
            &mut server,
            json!({"result": ["Open_vSwitch"], "error": null, "id": id}),
        )
        .await;

        let result = call.await.unwrap().unwrap();
        assert_eq!(result, json!(["Open_vSwitch"]));
    }

    #[tokio::test]
    async fn test_out_of_order_responses() {
        let (client, mut server) = duplex(64 * 1024);
        let endpoint = JsonRpcEndpoint::start(client);

        let first = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("get_schema", json!(["Open_vSwitch"])).await }
        });
        let req1 = read_request(&mut server).await;
        let second = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("list_dbs", json!([])).await }
        });
        let req2 = read_request(&mut server).await;

        // Answer in reverse order; correlation must still hold.
        send_json(
            &mut server,
            json!({"result": "second", "error": null, "id": req2["id"]}),
        )
        .await;
        send_json(
            &mut server,
            json!({"result": "first", "error": null, "id": req1["id"]}),
        )
        .await;

        assert_eq!(second.await.unwrap().unwrap(), json!("second"));
        assert_eq!(first.await.unwrap().unwrap(), json!("first"));
    }

    #[tokio::test]
    async fn test_error_response_fails_call() {
        let (client, mut server) = duplex(64 * 1024);
        let endpoint = JsonRpcEndpoint::start(client);

        let call = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("get_schema", json!(["nope"])).await }
        });
        let request = read_request(&mut server).await;
        send_json(
            &mut server,
            json!({"result": null, "error": "unknown database", "id": request["id"]}),
        )
        .await;

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_echo_answered_automatically() {
        let (client, mut server) = duplex(64 * 1024);
        let _endpoint = JsonRpcEndpoint::start(client);

        send_json(
            &mut server,
            json!({"method": "echo", "params": ["ka"], "id": "echo-1"}),
        )
        .await;

        let reply = read_request(&mut server).await;
        assert_eq!(reply["id"], json!("echo-1"));
        assert_eq!(reply["result"], json!(["ka"]));
        assert_eq!(reply["error"], Value::Null);
    }

    #[tokio::test]
    async fn test_notification_routed_to_handler() {
        struct Recorder(mpsc::UnboundedSender<(String, Value)>);
        impl NotificationHandler for Recorder {
            fn notify(&self, method: &str, params: Value) {
                let _ = self.0.send((method.to_string(), params));
            }
            fn disconnected(&self, _error: &Error) {}
        }

        let (client, mut server) = duplex(64 * 1024);
        let endpoint = JsonRpcEndpoint::start(client);
        let (tx, mut rx) = mpsc::unbounded_channel();
        endpoint.set_notification_handler(Arc::new(Recorder(tx)));

        send_json(
            &mut server,
            json!({"method": "update", "params": ["mon", {"Bridge": {}}], "id": null}),
        )
        .await;

        let (method, params) = rx.recv().await.unwrap();
        assert_eq!(method, "update");
        assert_eq!(params[0], json!("mon"));
    }

    #[tokio::test]
    async fn test_pending_calls_fail_on_close() {
        let (client, mut server) = duplex(64 * 1024);
        let endpoint = JsonRpcEndpoint::start(client);

        let call = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("transact", json!(["Open_vSwitch"])).await }
        });
        let _request = read_request(&mut server).await;
        drop(server);

        let err = call.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
        assert!(!endpoint.is_active());

        // Further calls fail fast.
        let err = endpoint.call("list_dbs", json!([])).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_duplicate_response_dropped() {
        let (client, mut server) = duplex(64 * 1024);
        let endpoint = JsonRpcEndpoint::start(client);

        let call = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("list_dbs", json!([])).await }
        });
        let request = read_request(&mut server).await;
        let id = request["id"].clone();
        send_json(&mut server, json!({"result": [], "error": null, "id": id})).await;
        assert!(call.await.unwrap().is_ok());

        // Late duplicate: silently dropped, connection stays healthy.
        send_json(
            &mut server,
            json!({"result": [], "error": null, "id": request["id"]}),
        )
        .await;
        let probe = tokio::spawn({
            let endpoint = Arc::clone(&endpoint);
            async move { endpoint.call("list_dbs", json!([])).await }
        });
        let request = read_request(&mut server).await;
        send_json(
            &mut server,
            json!({"result": ["ok"], "error": null, "id": request["id"]}),
        )
        .await;
        assert_eq!(probe.await.unwrap().unwrap(), json!(["ok"]));
    }
}
