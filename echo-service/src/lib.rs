//! # Echo Service
//!
//! **INTERNAL USE ONLY**: This crate exists solely to provide the schema and message types
//! of the ttrpc echo server used to integration test `ttrpcurl`.
//! It is not intended for production use.

/// Source of `echo.proto`, the schema of the `echo.EchoService` test service.
pub const ECHO_PROTO: &str = include_str!("../proto/echo.proto");

/// Source of `greeter.proto`, the schema of the `pkg.Greeter` test service.
pub const GREETER_PROTO: &str = include_str!("../proto/greeter.proto");

/// Message types matching the schemas above, encoded and decoded by the test server.
pub mod pb {
    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EchoRequest {
        #[prost(string, tag = "1")]
        pub message: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct EchoResponse {
        #[prost(string, tag = "1")]
        pub message: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct FailRequest {
        #[prost(int32, tag = "1")]
        pub code: i32,
        #[prost(string, tag = "2")]
        pub message: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct SlowRequest {
        #[prost(string, tag = "1")]
        pub message: String,
        #[prost(uint32, tag = "2")]
        pub count: u32,
        #[prost(uint32, tag = "3")]
        pub interval_ms: u32,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HelloRequest {
        #[prost(string, tag = "1")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, ::prost::Message)]
    pub struct HelloReply {
        #[prost(string, tag = "1")]
        pub message: String,
    }
}
