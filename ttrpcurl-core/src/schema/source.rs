//! # Schema Source
//!
//! Indexes parsed schema files into a queryable symbol table.
//!
//! Files are organized in two scan tiers: the **primary** files given by the user and the
//! **included** files bundled with the tool. Lookups scan the primary tier first, then the
//! included tier, each in the order its files were given, and the first file declaring the
//! symbol wins. A primary definition therefore overrides an included one of the same name.
use super::types::{Symbol, SymbolKind};
use prost_reflect::{FileDescriptor, MessageDescriptor, MethodDescriptor, ServiceDescriptor};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Symbol '{0}' not found")]
    SymbolNotFound(String),
    #[error("Symbol '{symbol}' is a {found}, expected a {expected}")]
    WrongSymbolKind {
        symbol: String,
        expected: SymbolKind,
        found: SymbolKind,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    Primary,
    Included,
}

/// Read-only set of schema files, shareable across tasks.
#[derive(Debug, Clone)]
pub struct SchemaSource {
    /// Scan tiers, in precedence order.
    tiers: [(Tier, Vec<FileDescriptor>); 2],
}

impl SchemaSource {
    pub fn merge(primary: Vec<FileDescriptor>, included: Vec<FileDescriptor>) -> Self {
        Self {
            tiers: [(Tier::Primary, primary), (Tier::Included, included)],
        }
    }

    /// Every file in scan order, with the tier it belongs to.
    pub fn files(&self) -> impl Iterator<Item = (Tier, &FileDescriptor)> {
        self.tiers
            .iter()
            .flat_map(|(tier, files)| files.iter().map(move |file| (*tier, file)))
    }

    /// Lists the services of both tiers, sorted by fully qualified name.
    ///
    /// When several files declare a service with the same name, the one found first in scan
    /// order is listed.
    pub fn list_services(&self) -> Vec<ServiceDescriptor> {
        let mut services = BTreeMap::new();
        for (_, file) in self.files() {
            for service in file.services() {
                services
                    .entry(service.full_name().to_string())
                    .or_insert(service);
            }
        }
        services.into_values().collect()
    }

    /// Lists the top-level messages of both tiers, following the same rules as
    /// [`SchemaSource::list_services`].
    pub fn list_messages(&self) -> Vec<MessageDescriptor> {
        let mut messages = BTreeMap::new();
        for (_, file) in self.files() {
            for message in file.messages() {
                messages
                    .entry(message.full_name().to_string())
                    .or_insert(message);
            }
        }
        messages.into_values().collect()
    }

    /// Looks up a fully qualified symbol (service, method, message, field or enum).
    ///
    /// A leading `.` is accepted, as in type references of `.proto` files.
    pub fn resolve_symbol(&self, fqn: &str) -> Result<Symbol, ResolveError> {
        let name = fqn.strip_prefix('.').unwrap_or(fqn);

        self.files()
            .find_map(|(_, file)| find_in_file(file, name))
            .ok_or_else(|| ResolveError::SymbolNotFound(fqn.to_string()))
    }

    pub fn resolve_method(&self, fqn: &str) -> Result<MethodDescriptor, ResolveError> {
        match self.resolve_symbol(fqn)? {
            Symbol::Method(method) => Ok(method),
            other => Err(wrong_kind(fqn, SymbolKind::Method, &other)),
        }
    }

    pub fn resolve_service(&self, fqn: &str) -> Result<ServiceDescriptor, ResolveError> {
        match self.resolve_symbol(fqn)? {
            Symbol::Service(service) => Ok(service),
            other => Err(wrong_kind(fqn, SymbolKind::Service, &other)),
        }
    }

    pub fn resolve_message(&self, fqn: &str) -> Result<MessageDescriptor, ResolveError> {
        match self.resolve_symbol(fqn)? {
            Symbol::Message(message) => Ok(message),
            other => Err(wrong_kind(fqn, SymbolKind::Message, &other)),
        }
    }
}

fn wrong_kind(fqn: &str, expected: SymbolKind, found: &Symbol) -> ResolveError {
    ResolveError::WrongSymbolKind {
        symbol: fqn.to_string(),
        expected,
        found: found.kind(),
    }
}

/// Finds a symbol declared by `file` itself, ignoring the files it imports.
fn find_in_file(file: &FileDescriptor, name: &str) -> Option<Symbol> {
    let pool = file.parent_pool();
    let declared = |symbol: Symbol| (symbol.parent_file() == *file).then_some(symbol);

    if let Some(service) = pool.get_service_by_name(name) {
        return declared(Symbol::Service(service));
    }
    if let Some(message) = pool.get_message_by_name(name) {
        return declared(Symbol::Message(message));
    }
    if let Some(enum_desc) = pool.get_enum_by_name(name) {
        return declared(Symbol::Enum(enum_desc));
    }

    let (parent, member) = name.rsplit_once('.')?;
    if let Some(service) = pool.get_service_by_name(parent) {
        return service
            .methods()
            .find(|method| method.name() == member)
            .and_then(|method| declared(Symbol::Method(method)));
    }
    if let Some(message) = pool.get_message_by_name(parent) {
        return message
            .get_field_by_name(member)
            .and_then(|field| declared(Symbol::Field(field)));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parser::{SchemaFile, SchemaParser};

    fn parse(files: &[(&str, &str)]) -> Vec<FileDescriptor> {
        SchemaParser::new()
            .parse(
                files
                    .iter()
                    .map(|(name, contents)| SchemaFile::new(*name, *contents)),
            )
            .unwrap()
            .files
    }

    const ADMIN_PRIMARY: &str = r#"
        syntax = "proto3";
        package pkg;
        message Empty {}
        service Admin { rpc Restart(Empty) returns (Empty); }
    "#;

    const ADMIN_INCLUDED: &str = r#"
        syntax = "proto3";
        package pkg;
        message Empty {}
        message Extra { string note = 1; }
        service Admin { rpc Shutdown(Empty) returns (Empty); }
        service Health { rpc Check(Empty) returns (Empty); }
    "#;

    fn admin_source() -> SchemaSource {
        SchemaSource::merge(
            parse(&[("a.proto", ADMIN_PRIMARY)]),
            parse(&[("b.proto", ADMIN_INCLUDED)]),
        )
    }

    #[test]
    fn test_primary_overrides_included() {
        let source = admin_source();

        let service = source.resolve_service("pkg.Admin").unwrap();
        assert_eq!(service.parent_file().name(), "a.proto");
        assert!(source.resolve_method("pkg.Admin.Restart").is_ok());
    }

    #[test]
    fn test_tier_decides_precedence() {
        let source = SchemaSource::merge(
            parse(&[("b.proto", ADMIN_INCLUDED)]),
            parse(&[("a.proto", ADMIN_PRIMARY)]),
        );

        let service = source.resolve_service("pkg.Admin").unwrap();
        assert_eq!(service.parent_file().name(), "b.proto");
    }

    #[test]
    fn test_first_file_in_tier_wins() {
        let source = SchemaSource::merge(
            vec![
                parse(&[("a.proto", ADMIN_PRIMARY)]).remove(0),
                parse(&[("b.proto", ADMIN_INCLUDED)]).remove(0),
            ],
            vec![],
        );

        let service = source.resolve_service("pkg.Admin").unwrap();
        assert_eq!(service.parent_file().name(), "a.proto");
    }

    #[test]
    fn test_list_services_sorted_and_unique() {
        let source = admin_source();
        let services: Vec<_> = source
            .list_services()
            .into_iter()
            .map(|s| (s.full_name().to_string(), s.parent_file().name().to_string()))
            .collect();

        assert_eq!(
            services,
            [
                ("pkg.Admin".to_string(), "a.proto".to_string()),
                ("pkg.Health".to_string(), "b.proto".to_string()),
            ]
        );
    }

    #[test]
    fn test_list_messages() {
        let source = admin_source();
        let messages: Vec<_> = source
            .list_messages()
            .into_iter()
            .map(|m| m.full_name().to_string())
            .collect();

        assert_eq!(messages, ["pkg.Empty", "pkg.Extra"]);
    }

    #[test]
    fn test_resolve_field_and_leading_dot() {
        let source = admin_source();

        let symbol = source.resolve_symbol(".pkg.Extra.note").unwrap();
        assert_eq!(symbol.kind(), SymbolKind::Field);
        assert_eq!(symbol.full_name(), "pkg.Extra.note");
    }

    #[test]
    fn test_not_found() {
        let source = admin_source();

        assert_eq!(
            source.resolve_symbol("pkg.Missing"),
            Err(ResolveError::SymbolNotFound("pkg.Missing".to_string()))
        );
        assert_eq!(
            source.resolve_method("pkg.Admin.Missing"),
            Err(ResolveError::SymbolNotFound("pkg.Admin.Missing".to_string()))
        );
    }

    #[test]
    fn test_wrong_kind() {
        let source = admin_source();
        let err = source.resolve_method("pkg.Admin").unwrap_err();

        assert_eq!(
            err,
            ResolveError::WrongSymbolKind {
                symbol: "pkg.Admin".to_string(),
                expected: SymbolKind::Method,
                found: SymbolKind::Service,
            }
        );
    }

    #[test]
    fn test_symbols_of_fallback_imports_are_not_scanned() {
        let common = r#"
            syntax = "proto3";
            package common;
            message Money { int64 units = 1; }
        "#;
        let billing = r#"
            syntax = "proto3";
            package billing;
            import "common.proto";
            message Invoice { common.Money total = 1; }
        "#;
        let files = SchemaParser::new()
            .with_imports(vec![SchemaFile::new("common.proto", common)])
            .parse(vec![SchemaFile::new("billing.proto", billing)])
            .unwrap()
            .files;
        let source = SchemaSource::merge(files, vec![]);

        assert!(source.resolve_message("billing.Invoice").is_ok());
        assert!(matches!(
            source.resolve_message("common.Money"),
            Err(ResolveError::SymbolNotFound(_))
        ));
    }
}
