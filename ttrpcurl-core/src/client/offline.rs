//! # Client State: Offline
//!
//! This module defines the `TtrpcurlClient` behavior that only needs the schema: listing,
//! resolving and preparing calls. None of it performs I/O, so it is available in every state.
use super::{
    CallError, CallOptions, CallShape, ConnectOptions, DynamicRequest, MethodIdentifier, Offline,
    Online, PreparedCall, SchemaState, TtrpcurlClient,
};
use crate::{
    codec,
    schema::{ResolveError, SchemaSource, Symbol},
    ttrpc::client::{TransportError, TtrpcClient},
};
use bytes::Bytes;
use prost::Message;
use std::path::Path;
use tracing::debug;

impl TtrpcurlClient<Offline> {
    /// Creates a new `TtrpcurlClient` in the Offline state.
    ///
    /// This client starts in a **disconnected** state. It can be used to inspect the
    /// provided schema but cannot make calls.
    pub fn offline(source: SchemaSource) -> Self {
        Self {
            state: Offline { source },
        }
    }

    /// Transitions to the **Online** state by dialing the unix socket at `socket`.
    pub async fn connect(
        self,
        socket: impl AsRef<Path>,
        options: &ConnectOptions,
    ) -> Result<TtrpcurlClient<Online>, TransportError> {
        let transport = TtrpcClient::connect(socket, options.timeout)
            .await?
            .with_max_message_size(options.max_message_size);

        Ok(self.with_transport(transport))
    }

    /// Transitions to the **Online** state using an existing connection.
    pub fn with_transport(self, transport: TtrpcClient) -> TtrpcurlClient<Online> {
        TtrpcurlClient {
            state: Online {
                source: self.state.source,
                transport,
            },
        }
    }
}

impl<T> TtrpcurlClient<T>
where
    T: SchemaState,
{
    pub fn schema_source(&self) -> &SchemaSource {
        self.state.schema_source()
    }

    /// Lists all services of the schema.
    ///
    /// # Returns
    ///
    /// A sorted list of fully qualified service names (e.g. `containerd.task.v2.Task`).
    pub fn list_services(&self) -> Vec<String> {
        self.state
            .schema_source()
            .list_services()
            .into_iter()
            .map(|s| s.full_name().to_string())
            .collect()
    }

    /// Looks up a fully qualified symbol (Service, Method, Message, Field or Enum).
    pub fn resolve_symbol(&self, symbol: &str) -> Result<Symbol, ResolveError> {
        self.state.schema_source().resolve_symbol(symbol)
    }

    /// Resolves the method of a request and turns its payload into wire encoded messages.
    ///
    /// # Returns
    ///
    /// * `Ok(PreparedCall)` - The method, its shape and the encoded requests.
    /// * `Err(CallError)` - The method name is malformed or unknown, or the payload does not
    ///   match the method input.
    pub fn prepare(
        &self,
        request: &DynamicRequest,
        options: &CallOptions,
    ) -> Result<PreparedCall, CallError> {
        let id = MethodIdentifier::parse(&request.method)
            .ok_or_else(|| CallError::InvalidMethodName(request.method.clone()))?;

        let method = self
            .state
            .schema_source()
            .resolve_method(&id.to_string())
            .map_err(|err| match err {
                ResolveError::SymbolNotFound(symbol) => CallError::MethodNotFound(symbol),
                ResolveError::WrongSymbolKind { symbol, found, .. } => {
                    CallError::WrongSymbolKind { symbol, found }
                }
            })?;

        let shape = CallShape::from(&method);
        let input = method.input();
        let mut messages =
            codec::decode_all(&request.payload, options.format, &input, &options.decode)?;

        if !shape.is_client_streaming() {
            match messages.len() {
                0 => messages.push(codec::new_instance(&input)),
                1 => {}
                n => {
                    return Err(CallError::InvalidRequest(format!(
                        "{shape} method '{id}' takes a single request message, got {n}"
                    )));
                }
            }
        }

        if let Some(index) = messages.iter().position(|m| !codec::validate(m)) {
            return Err(CallError::InvalidRequest(format!(
                "request message {index} does not match '{}'",
                input.full_name()
            )));
        }

        debug!(method = %id, %shape, requests = messages.len(), "prepared call");

        Ok(PreparedCall {
            method,
            shape,
            requests: messages
                .iter()
                .map(|m| Bytes::from(m.encode_to_vec()))
                .collect(),
        })
    }
}
