use crate::{
    codec::{DecodeOptions, EncodeOptions, Format},
    ttrpc::frame::DEFAULT_MAX_MESSAGE_SIZE,
};
use bytes::Bytes;
use prost_reflect::MethodDescriptor;
use std::{fmt, io::Write, time::Duration};

/// A request object encapsulating all necessary information to perform a dynamic ttrpc call.
#[derive(Debug, Clone, Default)]
pub struct DynamicRequest {
    /// The fully qualified name of the method (e.g., `my_package.Service.Method`).
    pub method: String,
    /// The textual body of the request, in the format of [`CallOptions::format`].
    /// - For Unary/ServerStreaming: a single message, or nothing for an empty one.
    /// - For ClientStreaming/Bidirectional: any number of messages, one after the other.
    pub payload: Vec<u8>,
    /// Metadata (headers) to attach to the request.
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// How long to wait for the socket to accept the connection.
    pub timeout: Option<Duration>,
    /// Largest message accepted or sent, in bytes.
    pub max_message_size: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CallOptions {
    pub format: Format,
    pub decode: DecodeOptions,
    pub encode: EncodeOptions,
    /// Used by [`crate::client::call`] when dialing.
    pub connect: ConnectOptions,
}

/// A `package.Service.Method` name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodIdentifier {
    pub package: String,
    pub service: String,
    pub method: String,
}

impl MethodIdentifier {
    /// Parses a name made of exactly three non-empty dot separated components.
    pub fn parse(name: &str) -> Option<Self> {
        let mut parts = name.split('.');
        let (Some(package), Some(service), Some(method), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return None;
        };

        if package.is_empty() || service.is_empty() || method.is_empty() {
            return None;
        }

        Some(Self {
            package: package.to_string(),
            service: service.to_string(),
            method: method.to_string(),
        })
    }

    /// The fully qualified service name, which routes the call.
    pub fn service_name(&self) -> String {
        format!("{}.{}", self.package, self.service)
    }
}

impl fmt::Display for MethodIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.package, self.service, self.method)
    }
}

/// The exchange pattern of a method, given by its streaming flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    Unary,
    ClientStreaming,
    ServerStreaming,
    Bidirectional,
}

impl CallShape {
    pub fn from_flags(client_streaming: bool, server_streaming: bool) -> Self {
        match (client_streaming, server_streaming) {
            (false, false) => CallShape::Unary,
            (true, false) => CallShape::ClientStreaming,
            (false, true) => CallShape::ServerStreaming,
            (true, true) => CallShape::Bidirectional,
        }
    }

    /// Whether the caller sends a stream of requests.
    pub fn is_client_streaming(self) -> bool {
        matches!(self, CallShape::ClientStreaming | CallShape::Bidirectional)
    }
}

impl From<&MethodDescriptor> for CallShape {
    fn from(method: &MethodDescriptor) -> Self {
        CallShape::from_flags(method.is_client_streaming(), method.is_server_streaming())
    }
}

impl fmt::Display for CallShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CallShape::Unary => "unary",
            CallShape::ClientStreaming => "client streaming",
            CallShape::ServerStreaming => "server streaming",
            CallShape::Bidirectional => "bidirectional streaming",
        })
    }
}

/// A resolved and encoded call, ready to be dispatched.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub method: MethodDescriptor,
    pub shape: CallShape,
    /// Wire encoded request messages. Exactly one unless the shape is client streaming.
    pub requests: Vec<Bytes>,
}

/// The outcome of a completed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSummary {
    pub shape: CallShape,
    /// Number of responses emitted to the sink.
    pub responses: usize,
}

/// Receives every encoded response as soon as it arrives.
pub trait ResponseSink {
    fn emit(&mut self, encoded: &[u8]) -> std::io::Result<()>;
}

impl ResponseSink for Vec<Vec<u8>> {
    fn emit(&mut self, encoded: &[u8]) -> std::io::Result<()> {
        self.push(encoded.to_vec());
        Ok(())
    }
}

/// Writes one response per line, flushing after each one.
#[derive(Debug)]
pub struct WriterSink<W>(pub W);

impl<W: Write> ResponseSink for WriterSink<W> {
    fn emit(&mut self, encoded: &[u8]) -> std::io::Result<()> {
        self.0.write_all(encoded)?;
        self.0.write_all(b"\n")?;
        self.0.flush()
    }
}
