//! # Ttrpcurl Client
//!
//! This module implements the high-level logic for executing dynamic ttrpc requests.
//!
//! The [`TtrpcurlClient`] uses a **Typestate Pattern** so that calls can only be made once a
//! connection exists. It has two possible states:
//!
//! 1. **[`Offline`]**: The client is **not connected** to any server. It holds a
//!    [`SchemaSource`] and can be used for introspection (listing services, resolving symbols)
//!    and to prepare calls, but cannot perform them.
//! 2. **[`Online`]**: The client additionally owns a connection to a ttrpc server and can
//!    dispatch calls of any of the four shapes.
//!
//! ## Example: State Transition
//!
//! ```rust,no_run
//! use ttrpcurl_core::client::{CallContext, CallOptions, ConnectOptions, DynamicRequest, TtrpcurlClient};
//! use ttrpcurl_core::schema::{SchemaFile, SchemaParser, SchemaSource};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let parsed = SchemaParser::new().parse(vec![SchemaFile::read("greeter.proto")?])?;
//! let source = SchemaSource::merge(parsed.files, vec![]);
//!
//! // 1. Offline State (Disconnected + Local Schema)
//! let client = TtrpcurlClient::offline(source);
//! println!("{:?}", client.list_services());
//!
//! // 2. Online State (Connected + Local Schema)
//! let mut client = client.connect("/run/greeter.sock", &ConnectOptions::default()).await?;
//!
//! let request = DynamicRequest {
//!     method: "pkg.Greeter.SayHello".to_string(),
//!     payload: br#"{"name": "Ada"}"#.to_vec(),
//!     headers: vec![],
//! };
//! let mut responses: Vec<Vec<u8>> = Vec::new();
//! client
//!     .call(&CallContext::background(), request, &CallOptions::default(), &mut responses)
//!     .await?;
//! # Ok(())
//! # }
//! ```
mod context;
pub mod offline;
pub mod online;
mod types;

pub use context::*;
pub use online::call;
pub use types::*;

use crate::{
    codec::{DecodeError, EncodeError},
    schema::{SchemaSource, SymbolKind},
    ttrpc::client::{TransportError, TtrpcClient},
};

/// The main client for interacting with ttrpc servers dynamically.
///
/// The generic parameter `T` represents the current state of the client.
#[derive(Debug)]
pub struct TtrpcurlClient<T> {
    state: T,
}

/// State: Disconnected, Schema from local `.proto` files.
#[derive(Debug, Clone)]
pub struct Offline {
    source: SchemaSource,
}

/// State: Connected to server, Schema from local `.proto` files.
#[derive(Debug)]
pub struct Online {
    source: SchemaSource,
    transport: TtrpcClient,
}

pub trait SchemaState {
    fn schema_source(&self) -> &SchemaSource;
}

impl SchemaState for Offline {
    fn schema_source(&self) -> &SchemaSource {
        &self.source
    }
}

impl SchemaState for Online {
    fn schema_source(&self) -> &SchemaSource {
        &self.source
    }
}

/// Errors that can occur while preparing or performing a dynamic call.
///
/// Failures detected locally (everything up to [`CallError::InvalidRequest`]) happen before
/// any I/O.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("Invalid method name '{0}', expected 'package.Service.Method'")]
    InvalidMethodName(String),
    #[error("Method '{0}' not found")]
    MethodNotFound(String),
    #[error("Symbol '{symbol}' is a {found}, not a method")]
    WrongSymbolKind { symbol: String, found: SymbolKind },
    #[error("Failed to decode request: {0}")]
    Decode(#[from] DecodeError),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Failed to encode response: '{0}'")]
    Encode(#[from] EncodeError),
    #[error("Failed to connect: {0}")]
    Dial(#[source] TransportError),
    #[error("Transport failed: {0}")]
    Transport(#[source] TransportError),
    #[error("Remote error '{code:?}': '{message}'")]
    Remote { code: tonic::Code, message: String },
    #[error("Call stopped: {0}")]
    Canceled(CancelReason),
    #[error("Failed to write response: '{0}'")]
    Sink(#[source] std::io::Error),
}

impl From<tonic::Status> for CallError {
    fn from(status: tonic::Status) -> Self {
        CallError::Remote {
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<CancelReason> for CallError {
    fn from(reason: CancelReason) -> Self {
        CallError::Canceled(reason)
    }
}
