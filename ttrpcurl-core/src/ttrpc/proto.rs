//! Envelope messages of the ttrpc protocol.
//!
//! These mirror `github.com/containerd/ttrpc/request.proto`. The `Status` message has the
//! same layout as `google.rpc.Status`.
use bytes::Bytes;

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(string, tag = "1")]
    pub service: String,
    #[prost(string, tag = "2")]
    pub method: String,
    #[prost(bytes = "bytes", tag = "3")]
    pub payload: Bytes,
    #[prost(int64, tag = "4")]
    pub timeout_nano: i64,
    #[prost(message, repeated, tag = "5")]
    pub metadata: Vec<KeyValue>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(message, optional, tag = "1")]
    pub status: Option<Status>,
    #[prost(bytes = "bytes", tag = "2")]
    pub payload: Bytes,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Status {
    #[prost(int32, tag = "1")]
    pub code: i32,
    #[prost(string, tag = "2")]
    pub message: String,
    #[prost(message, repeated, tag = "3")]
    pub details: Vec<prost_types::Any>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct KeyValue {
    #[prost(string, tag = "1")]
    pub key: String,
    #[prost(string, tag = "2")]
    pub value: String,
}

impl Status {
    /// Converts a wire status into a [`tonic::Status`], or `None` when it reports success.
    pub fn into_error(self) -> Option<tonic::Status> {
        let code = tonic::Code::from_i32(self.code);
        match code {
            tonic::Code::Ok => None,
            code => Some(tonic::Status::new(code, self.message)),
        }
    }
}
