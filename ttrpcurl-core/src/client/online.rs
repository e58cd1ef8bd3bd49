//! # Client State: Online
//!
//! This module defines the `TtrpcurlClient` behavior when it is connected to a ttrpc server.
//!
//! Every blocking step of a call runs through the [`CallContext`], so cancellation and
//! deadlines interrupt it. When that happens, or when the transport fails, the connection is
//! closed because the state of the stream on the server is unknown.
use super::{
    CallContext, CallError, CallOptions, CallShape, CallSummary, DynamicRequest, Offline, Online,
    PreparedCall, ResponseSink, TtrpcurlClient,
};
use crate::{
    codec,
    schema::SchemaSource,
    ttrpc::client::{ResponseStream, TtrpcClient},
};
use bytes::Bytes;
use prost_reflect::MessageDescriptor;
use std::path::Path;
use tracing::debug;

impl TtrpcurlClient<Online> {
    /// Performs a dynamic call.
    ///
    /// Resolves the method, encodes the payload into request messages and dispatches them with
    /// the exchange pattern of the method. Every response is decoded, re-encoded in
    /// [`CallOptions::format`] and emitted to `sink` as soon as it arrives.
    ///
    /// # Returns
    ///
    /// * `Ok(CallSummary)` - The call completed successfully.
    /// * `Err(CallError::Remote)` - The server finished the call with an error status.
    /// * `Err(CallError)` - Resolution, encoding, transport or cancellation failure. Responses
    ///   emitted before the failure stay emitted.
    pub async fn call<S>(
        &mut self,
        ctx: &CallContext,
        request: DynamicRequest,
        options: &CallOptions,
        sink: &mut S,
    ) -> Result<CallSummary, CallError>
    where
        S: ResponseSink,
    {
        let prepared = self.prepare(&request, options)?;
        self.dispatch(ctx, prepared, &request.headers, options, sink)
            .await
    }

    /// Dispatches an already prepared call.
    pub async fn dispatch<S>(
        &mut self,
        ctx: &CallContext,
        call: PreparedCall,
        headers: &[(String, String)],
        options: &CallOptions,
        sink: &mut S,
    ) -> Result<CallSummary, CallError>
    where
        S: ResponseSink,
    {
        let result = match ctx.err() {
            Some(reason) => Err(CallError::Canceled(reason)),
            None => {
                debug!(
                    method = %call.method.full_name(),
                    shape = %call.shape,
                    "dispatching call"
                );
                self.exchange(ctx, call, headers, options, sink).await
            }
        };

        if matches!(
            result,
            Err(CallError::Canceled(_) | CallError::Transport(_))
        ) {
            self.state.transport.close().await;
        }

        result
    }

    /// Closes the connection, going back to the **Offline** state.
    pub async fn disconnect(mut self) -> TtrpcurlClient<Offline> {
        self.state.transport.close().await;
        TtrpcurlClient::offline(self.state.source)
    }

    async fn exchange<S>(
        &mut self,
        ctx: &CallContext,
        call: PreparedCall,
        headers: &[(String, String)],
        options: &CallOptions,
        sink: &mut S,
    ) -> Result<CallSummary, CallError>
    where
        S: ResponseSink,
    {
        let PreparedCall {
            method,
            shape,
            requests,
        } = call;
        let output = method.output();
        let timeout = ctx.remaining();
        let transport = &mut self.state.transport;

        let responses = match shape {
            CallShape::Unary => {
                let payload = ctx
                    .run(transport.unary(&method, single(requests), headers, timeout))
                    .await?
                    .map_err(CallError::Transport)??;
                emit(&output, &payload, options, sink)?;
                1
            }
            CallShape::ClientStreaming => {
                let payloads = tokio_stream::iter(requests);
                let payload = ctx
                    .run(transport.client_streaming(&method, payloads, headers, timeout))
                    .await?
                    .map_err(CallError::Transport)??;
                emit(&output, &payload, options, sink)?;
                1
            }
            CallShape::ServerStreaming => {
                let mut stream = ctx
                    .run(transport.server_streaming(&method, single(requests), headers, timeout))
                    .await?
                    .map_err(CallError::Transport)?;
                drain(ctx, &mut stream, &output, options, sink).await?
            }
            CallShape::Bidirectional => {
                let payloads = tokio_stream::iter(requests);
                let mut stream = ctx
                    .run(transport.bidirectional_streaming(&method, payloads, headers, timeout))
                    .await?
                    .map_err(CallError::Transport)?;
                drain(ctx, &mut stream, &output, options, sink).await?
            }
        };

        Ok(CallSummary { shape, responses })
    }
}

/// Prepares a call, dials `socket` and performs the call on the new connection.
///
/// Failures detected locally are reported before the socket is dialed. A failed dial is
/// [`CallError::Dial`].
pub async fn call<S>(
    ctx: &CallContext,
    source: SchemaSource,
    socket: impl AsRef<Path>,
    request: DynamicRequest,
    options: &CallOptions,
    sink: &mut S,
) -> Result<CallSummary, CallError>
where
    S: ResponseSink,
{
    let offline = TtrpcurlClient::offline(source);
    let prepared = offline.prepare(&request, options)?;

    let connect = &options.connect;
    let transport = ctx
        .run(TtrpcClient::connect(socket, connect.timeout))
        .await?
        .map_err(CallError::Dial)?
        .with_max_message_size(connect.max_message_size);

    let mut client = offline.with_transport(transport);
    let result = client
        .dispatch(ctx, prepared, &request.headers, options, sink)
        .await;
    client.disconnect().await;
    result
}

/// Reads responses until the server ends the stream.
async fn drain<S>(
    ctx: &CallContext,
    stream: &mut ResponseStream<'_>,
    output: &MessageDescriptor,
    options: &CallOptions,
    sink: &mut S,
) -> Result<usize, CallError>
where
    S: ResponseSink,
{
    let mut responses = 0;
    loop {
        let next = ctx
            .run(stream.message())
            .await?
            .map_err(CallError::Transport)??;

        match next {
            Some(payload) => {
                emit(output, &payload, options, sink)?;
                responses += 1;
            }
            None => return Ok(responses),
        }
    }
}

/// The request of a single request shape. Preparing guarantees there is exactly one.
fn single(requests: Vec<Bytes>) -> Bytes {
    requests.into_iter().next().unwrap_or_default()
}

fn emit<S>(
    output: &MessageDescriptor,
    payload: &[u8],
    options: &CallOptions,
    sink: &mut S,
) -> Result<(), CallError>
where
    S: ResponseSink,
{
    let message = codec::decode_response(output, payload)
        .map_err(|err| CallError::InvalidResponse(err.to_string()))?;

    if !codec::validate(&message) {
        return Err(CallError::InvalidResponse(format!(
            "response does not match '{}'",
            output.full_name()
        )));
    }

    let encoded = codec::encode(&message, options.format, &options.encode)?;
    sink.emit(&encoded).map_err(CallError::Sink)
}
