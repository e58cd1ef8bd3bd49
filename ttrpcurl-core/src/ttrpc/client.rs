//! # Generic ttrpc Client
//!
//! This module implements a ttrpc client over a unix domain socket. It is agnostic to the
//! specific Protobuf messages being exchanged: requests and responses are opaque, already
//! encoded payloads.
//!
//! ## How it works
//!
//! Each call allocates a new stream id on the connection and opens it with a `Request`
//! envelope that names the service and method. The server answers with `Data` frames
//! (streaming responses) and finishes the stream with a `Response` envelope carrying the
//! final status.
//!
//! ## Access Patterns
//!
//! Provides specific methods for Unary, Server Streaming, Client Streaming and
//! Bidirectional Streaming calls. For the client streaming shapes, requests are written by a
//! spawned task while the caller reads responses, so both directions make progress
//! independently. A failed sender surfaces on the next read. When the call ends early, or
//! the [`ResponseStream`] is dropped, the sender stops at the next frame boundary so the
//! connection stays usable for the next call. Only [`TtrpcClient::close`] aborts it.
use super::frame::{self, Flags, Frame, FrameError, FrameReader, MessageType};
use super::proto::{KeyValue, Request, Response};
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use prost::Message;
use prost_reflect::MethodDescriptor;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tokio::{
    net::{
        UnixStream,
        unix::{OwnedReadHalf, OwnedWriteHalf},
    },
    sync::{Mutex, watch},
    task::{AbortHandle, JoinHandle},
};
use tonic::Status;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect to '{}': '{source}'", path.display())]
    Dial {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Timed out after {timeout:?} connecting to '{}'", path.display())]
    DialTimeout { path: PathBuf, timeout: Duration },
    #[error("{0}")]
    Frame(#[from] FrameError),
    #[error("Failed to decode ttrpc envelope: '{0}'")]
    Envelope(#[from] prost::DecodeError),
    #[error("Protocol violation: {0}")]
    Protocol(String),
    #[error("The connection was closed")]
    Closed,
    #[error("The request sender stopped unexpectedly")]
    SenderStopped,
}

/// A generic client for the ttrpc protocol.
pub struct TtrpcClient {
    reader: FrameReader<OwnedReadHalf>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    next_stream_id: u32,
    max_message_size: usize,
    /// Sender of the last streaming call, aborted when the connection is closed.
    sender: Option<AbortHandle>,
    closed: bool,
}

impl std::fmt::Debug for TtrpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtrpcClient")
            .field("next_stream_id", &self.next_stream_id)
            .field("max_message_size", &self.max_message_size)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl TtrpcClient {
    /// Dials the unix socket at `path`, giving up after `timeout` if one is set.
    pub async fn connect(
        path: impl AsRef<Path>,
        timeout: Option<Duration>,
    ) -> Result<Self, TransportError> {
        let path = path.as_ref();
        debug!(socket = %path.display(), "dialing ttrpc server");

        let connecting = UnixStream::connect(path);
        let connected = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, connecting)
                .await
                .map_err(|_| TransportError::DialTimeout {
                    path: path.to_path_buf(),
                    timeout,
                })?,
            None => connecting.await,
        };

        let stream = connected.map_err(|source| TransportError::Dial {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self::new(stream))
    }

    pub fn new(stream: UnixStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: FrameReader::new(reader, frame::DEFAULT_MAX_MESSAGE_SIZE),
            writer: Arc::new(Mutex::new(writer)),
            next_stream_id: 1,
            max_message_size: frame::DEFAULT_MAX_MESSAGE_SIZE,
            sender: None,
            closed: false,
        }
    }

    /// Sets the maximum encoded size of a message, in either direction.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self.reader.set_max_message_size(max);
        self
    }

    /// Shuts down the write half, after which every call fails with [`TransportError::Closed`].
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        // A frame cut short no longer matters once the connection is shut down.
        if let Some(sender) = self.sender.take() {
            sender.abort();
        }

        use tokio::io::AsyncWriteExt;
        if let Err(err) = self.writer.lock().await.shutdown().await {
            debug!(error = %err, "failed to shut down ttrpc connection");
        }
    }

    /// Performs a Unary ttrpc call (Single Request -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Bytes))` - Successful RPC execution, the encoded response message.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(TransportError)` - Failed to send the request or to read the response.
    pub async fn unary(
        &mut self,
        method: &MethodDescriptor,
        payload: Bytes,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Result<Bytes, Status>, TransportError> {
        let stream_id = self.open(method, payload, Flags::NONE, headers, timeout).await?;
        let mut stream = ResponseStream::new(&mut self.reader, stream_id, None);
        single_response(&mut stream).await
    }

    /// Performs a Server Streaming ttrpc call (Single Request -> Stream of Responses).
    ///
    /// The remote status is reported by [`ResponseStream::message`] once the stream ends.
    pub async fn server_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload: Bytes,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<ResponseStream<'_>, TransportError> {
        let stream_id = self
            .open(method, payload, Flags::REMOTE_CLOSED, headers, timeout)
            .await?;
        Ok(ResponseStream::new(&mut self.reader, stream_id, None))
    }

    /// Performs a Client Streaming ttrpc call (Stream of Requests -> Single Response).
    ///
    /// # Returns
    /// * `Ok(Ok(Bytes))` - Successful RPC execution, the encoded response message.
    /// * `Ok(Err(Status))` - RPC executed, but server returned an error.
    /// * `Err(TransportError)` - Failed to send the requests or to read the response.
    pub async fn client_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload_stream: impl Stream<Item = Bytes> + Send + 'static,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<Result<Bytes, Status>, TransportError> {
        let mut stream = self
            .start_streaming(method, payload_stream, headers, timeout)
            .await?;
        single_response(&mut stream).await
    }

    /// Performs a Bidirectional Streaming ttrpc call (Stream of Requests -> Stream of Responses).
    ///
    /// Requests are sent while responses are being read through the returned stream.
    pub async fn bidirectional_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload_stream: impl Stream<Item = Bytes> + Send + 'static,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<ResponseStream<'_>, TransportError> {
        self.start_streaming(method, payload_stream, headers, timeout)
            .await
    }

    async fn start_streaming(
        &mut self,
        method: &MethodDescriptor,
        payload_stream: impl Stream<Item = Bytes> + Send + 'static,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<ResponseStream<'_>, TransportError> {
        let stream_id = self
            .open(method, Bytes::new(), Flags::REMOTE_OPEN, headers, timeout)
            .await?;
        let (stop, stopped) = watch::channel(false);
        let task = spawn_sender(
            self.writer.clone(),
            stream_id,
            self.max_message_size,
            payload_stream,
            stopped,
        );
        self.sender = Some(task.abort_handle());

        let sender = Sender { task, stop };
        Ok(ResponseStream::new(&mut self.reader, stream_id, Some(sender)))
    }

    /// Allocates a stream id and sends the `Request` envelope that opens it.
    async fn open(
        &mut self,
        method: &MethodDescriptor,
        payload: Bytes,
        flags: Flags,
        headers: &[(String, String)],
        timeout: Option<Duration>,
    ) -> Result<u32, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }

        let stream_id = self.next_stream_id;
        self.next_stream_id = self.next_stream_id.wrapping_add(2);

        let request = build_request(method, payload, headers, timeout);
        debug!(
            stream_id,
            service = %request.service,
            method = %request.method,
            "sending ttrpc request"
        );

        let frame = Frame::new(stream_id, MessageType::Request, flags, request.encode_to_vec());
        let mut writer = self.writer.lock().await;
        frame::write_frame(&mut *writer, &frame, self.max_message_size).await?;
        Ok(stream_id)
    }
}

/// The task writing the requests of a streaming call.
struct Sender {
    task: JoinHandle<Result<(), TransportError>>,
    stop: watch::Sender<bool>,
}

impl Sender {
    /// Asks the task to stop before its next frame. A frame being written is completed.
    fn stop(self) {
        self.stop.send_replace(true);
    }
}

/// The responses of a single call, read from the shared connection.
pub struct ResponseStream<'a> {
    reader: &'a mut FrameReader<OwnedReadHalf>,
    stream_id: u32,
    sender: Option<Sender>,
    finished: bool,
}

impl<'a> ResponseStream<'a> {
    fn new(
        reader: &'a mut FrameReader<OwnedReadHalf>,
        stream_id: u32,
        sender: Option<Sender>,
    ) -> Self {
        Self {
            reader,
            stream_id,
            sender,
            finished: false,
        }
    }

    /// Returns the next response payload.
    ///
    /// # Returns
    /// * `Ok(Ok(Some(Bytes)))` - The next encoded response message.
    /// * `Ok(Ok(None))` - The server finished the stream successfully.
    /// * `Ok(Err(Status))` - The server finished the stream with an error status.
    /// * `Err(TransportError)` - The connection failed or the request sender failed.
    pub async fn message(&mut self) -> Result<Result<Option<Bytes>, Status>, TransportError> {
        if self.finished {
            return Ok(Ok(None));
        }

        loop {
            let next = match self.sender.as_mut() {
                Some(sender) => tokio::select! {
                    sent = &mut sender.task => {
                        self.sender = None;
                        match sent {
                            Ok(Ok(())) => continue,
                            Ok(Err(err)) => return Err(self.fail(err)),
                            Err(_) => return Err(self.fail(TransportError::SenderStopped)),
                        }
                    }
                    frame = self.reader.next_frame() => frame,
                },
                None => self.reader.next_frame().await,
            };

            let frame = match next {
                Ok(Some(frame)) => frame,
                Ok(None) => return Err(self.fail(TransportError::Closed)),
                Err(err) => return Err(self.fail(err.into())),
            };

            if frame.stream_id != self.stream_id {
                debug!(
                    stream_id = frame.stream_id,
                    expected = self.stream_id,
                    "ignoring frame for another stream"
                );
                continue;
            }

            match frame.kind {
                MessageType::Data => {
                    if frame.flags.contains(Flags::REMOTE_CLOSED) {
                        debug!(stream_id = self.stream_id, "server closed its side of the stream");
                    }
                    if frame.flags.contains(Flags::NO_DATA) {
                        continue;
                    }
                    debug!(stream_id = self.stream_id, bytes = frame.payload.len(), "received data frame");
                    return Ok(Ok(Some(frame.payload)));
                }
                MessageType::Response => {
                    self.finish();
                    let response = Response::decode(frame.payload)?;
                    if let Some(status) = response.status.and_then(|s| s.into_error()) {
                        debug!(stream_id = self.stream_id, code = ?status.code(), "call failed");
                        return Ok(Err(status));
                    }
                    if response.payload.is_empty() {
                        return Ok(Ok(None));
                    }
                    return Ok(Ok(Some(response.payload)));
                }
                MessageType::Request => {
                    return Err(self.fail(TransportError::Protocol(format!(
                        "unexpected request frame on stream {}",
                        self.stream_id
                    ))));
                }
            }
        }
    }

    fn fail(&mut self, err: TransportError) -> TransportError {
        self.finish();
        err
    }

    fn finish(&mut self) {
        self.finished = true;
        if let Some(sender) = self.sender.take() {
            sender.stop();
        }
    }
}

impl Drop for ResponseStream<'_> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            sender.stop();
        }
    }
}

/// Waits for the single response of a unary or client streaming call.
async fn single_response(
    stream: &mut ResponseStream<'_>,
) -> Result<Result<Bytes, Status>, TransportError> {
    match stream.message().await? {
        // An empty message encodes to zero bytes, so an OK status without payload is a response.
        Ok(payload) => Ok(Ok(payload.unwrap_or_default())),
        Err(status) => Ok(Err(status)),
    }
}

/// Writes every request as a `Data` frame, then half-closes the stream.
///
/// Once `stopped` turns true no further frame is started. Each frame is written while holding
/// the writer lock, so the next call on the connection never interleaves with it.
fn spawn_sender(
    writer: Arc<Mutex<OwnedWriteHalf>>,
    stream_id: u32,
    max: usize,
    payload_stream: impl Stream<Item = Bytes> + Send + 'static,
    mut stopped: watch::Receiver<bool>,
) -> JoinHandle<Result<(), TransportError>> {
    tokio::spawn(async move {
        let mut payload_stream = std::pin::pin!(payload_stream);
        loop {
            let next = tokio::select! {
                biased;
                _ = stopped.wait_for(|stopped| *stopped) => None,
                payload = payload_stream.next() => Some(payload),
            };
            let Some(payload) = next else {
                debug!(stream_id, "request stream stopped");
                return Ok(());
            };

            let frame = match &payload {
                Some(payload) => {
                    Frame::new(stream_id, MessageType::Data, Flags::NONE, payload.clone())
                }
                None => Frame::new(
                    stream_id,
                    MessageType::Data,
                    Flags::REMOTE_CLOSED.union(Flags::NO_DATA),
                    Bytes::new(),
                ),
            };

            let mut writer = writer.lock().await;
            if *stopped.borrow() {
                debug!(stream_id, "request stream stopped");
                return Ok(());
            }
            frame::write_frame(&mut *writer, &frame, max).await?;

            if payload.is_none() {
                debug!(stream_id, "half-closed request stream");
                return Ok(());
            }
        }
    })
}

fn build_request(
    method: &MethodDescriptor,
    payload: Bytes,
    headers: &[(String, String)],
    timeout: Option<Duration>,
) -> Request {
    let timeout_nano = timeout
        .map(|t| i64::try_from(t.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default();

    Request {
        service: method.parent_service().full_name().to_string(),
        method: method.name().to_string(),
        payload,
        timeout_nano,
        metadata: headers
            .iter()
            .map(|(key, value)| KeyValue {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
    }
}
