//! # ttrpc Transport
//!
//! This module contains the low-level building blocks for performing ttrpc calls over a unix
//! domain socket.
//!
//! The transport never looks inside request and response messages: it moves already encoded
//! Protobuf payloads, wrapped in the ttrpc envelopes and framing. Schema-aware encoding lives
//! in [`crate::codec`].
pub mod client;
pub mod frame;
pub mod proto;
