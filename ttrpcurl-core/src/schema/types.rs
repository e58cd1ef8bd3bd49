use prost_reflect::{
    EnumDescriptor, FieldDescriptor, FileDescriptor, MessageDescriptor, MethodDescriptor,
    ServiceDescriptor,
};
use std::fmt;

/// A generic wrapper for the descriptors a fully qualified name can point to.
///
/// This enum allows the schema source to return a single type when resolving symbols,
/// regardless of whether the symbol points to a Service, a Method, a Message, an Enum or a Field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Symbol {
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
    Service(ServiceDescriptor),
    Method(MethodDescriptor),
    Field(FieldDescriptor),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Message,
    Enum,
    Service,
    Method,
    Field,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SymbolKind::Message => "message",
            SymbolKind::Enum => "enum",
            SymbolKind::Service => "service",
            SymbolKind::Method => "method",
            SymbolKind::Field => "field",
        })
    }
}

impl Symbol {
    pub fn kind(&self) -> SymbolKind {
        match self {
            Symbol::Message(_) => SymbolKind::Message,
            Symbol::Enum(_) => SymbolKind::Enum,
            Symbol::Service(_) => SymbolKind::Service,
            Symbol::Method(_) => SymbolKind::Method,
            Symbol::Field(_) => SymbolKind::Field,
        }
    }

    /// Returns the name (e.g.,`MyMessage`) of the inner descriptor
    pub fn name(&self) -> &str {
        match self {
            Symbol::Message(v) => v.name(),
            Symbol::Enum(v) => v.name(),
            Symbol::Service(v) => v.name(),
            Symbol::Method(v) => v.name(),
            Symbol::Field(v) => v.name(),
        }
    }

    /// Returns the full_name (e.g.,`my.package.v1.MyMessage`) of the inner descriptor
    pub fn full_name(&self) -> &str {
        match self {
            Symbol::Message(v) => v.full_name(),
            Symbol::Enum(v) => v.full_name(),
            Symbol::Service(v) => v.full_name(),
            Symbol::Method(v) => v.full_name(),
            Symbol::Field(v) => v.full_name(),
        }
    }

    /// The file that declares the symbol.
    pub fn parent_file(&self) -> FileDescriptor {
        match self {
            Symbol::Message(v) => v.parent_file(),
            Symbol::Enum(v) => v.parent_file(),
            Symbol::Service(v) => v.parent_file(),
            Symbol::Method(v) => v.parent_service().parent_file(),
            Symbol::Field(v) => v.parent_message().parent_file(),
        }
    }

    pub fn as_message(&self) -> Option<&MessageDescriptor> {
        match self {
            Symbol::Message(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceDescriptor> {
        match self {
            Symbol::Service(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&MethodDescriptor> {
        match self {
            Symbol::Method(d) => Some(d),
            _ => None,
        }
    }
}
