//! # Ttrpcurl Core
//!
//! `ttrpcurl-core` is the foundational library powering the ttrpcurl CLI. It provides a dynamic
//! ttrpc client capable of calling any method of a ttrpc server listening on a unix socket,
//! without compile-time knowledge of the Protobuf schema. The schema is read from `.proto`
//! sources at runtime.
//!
//! ## Key Components
//!
//! * **[`schema`]:** Parses `.proto` sources into descriptors and indexes them into a
//!   [`SchemaSource`], in which user-supplied files override bundled ones.
//! * **[`codec`]:** Builds dynamic messages from JSON or text format, and renders them back.
//! * **[`TtrpcurlClient`]:** The main entry point. It resolves methods through the schema and
//!   dispatches requests with the right exchange pattern (unary, client streaming, server
//!   streaming or bidirectional).
//! * **[`DynamicRequest`] & [`ResponseSink`]:** The primary data structures for I/O. Callers
//!   pass textual payloads and receive every textual response as soon as it arrives.
//!
//! ## Internal clients
//!
//! * **[`TtrpcClient`]:** A generic ttrpc client moving already encoded payloads over a unix
//!   socket. It knows nothing about schemas.
//!
//! ## Re-exports
//!
//! This crate re-exports `prost`, `prost-reflect` and `tonic` (for status codes) to ensure that consumers
//! use compatible versions of these underlying dependencies.
pub mod client;
pub mod codec;
pub mod schema;
pub mod ttrpc;

pub use client::{DynamicRequest, ResponseSink, TtrpcurlClient};
pub use schema::SchemaSource;
pub use ttrpc::client::TtrpcClient;

// Re-exports
pub use prost;
pub use prost_reflect;
pub use tonic;
