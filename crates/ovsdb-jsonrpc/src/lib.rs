//! ovsdb-jsonrpc: the wire layer of the OVSDB client engine
//!
//! This crate provides:
//! - Self-delimiting JSON frame decoding over a byte stream
//! - JSON-RPC 1.0 message types as OVSDB speaks them
//! - An asynchronous endpoint correlating calls with responses
//! - TCP, TCP+TLS and Unix socket transports

pub mod codec;
pub mod endpoint;
pub mod protocol;
pub mod transport;

pub use codec::JsonFrameDecoder;
pub use endpoint::{JsonRpcEndpoint, NotificationHandler};
pub use protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
pub use transport::{ConnectTarget, Stream};

/// Prelude for convenient imports
pub mod prelude {
    pub use super::codec::JsonFrameDecoder;
    pub use super::endpoint::{JsonRpcEndpoint, NotificationHandler};
    pub use super::protocol::{JsonRpcMessage, JsonRpcRequest, JsonRpcResponse};
    pub use super::transport::{ConnectTarget, Stream};
}
