//! # Schema Resolution
//!
//! Loading `.proto` sources ([`parser`]) and querying the resulting descriptors
//! ([`source`]).
pub mod parser;
pub mod source;
mod types;

pub use parser::{Diagnostic, ParsedSchema, SchemaError, SchemaFile, SchemaParser, Severity};
pub use source::{ResolveError, SchemaSource, Tier};
pub use types::*;
