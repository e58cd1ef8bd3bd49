//! # Schema Parser
//!
//! Turns `.proto` sources into linked [`FileDescriptor`]s in two phases:
//!
//! 1. **Parse**: every file is parsed on its own into a `FileDescriptorProto`, with type
//!    references left unresolved.
//! 2. **Link**: the files are ordered so imports come before their importers and added to a
//!    single [`DescriptorPool`], which resolves type references across files.
//!
//! Either phase failing aborts the whole batch.
use miette::Diagnostic as _;
use prost_reflect::{DescriptorPool, FileDescriptor};
use prost_types::FileDescriptorProto;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    path::{Path, PathBuf},
};
use tracing::{debug, warn};

/// Field number of `dependency` in `FileDescriptorProto`.
const DEPENDENCY_FIELD: i32 = 3;
/// Field number of `syntax` in `FileDescriptorProto`.
const SYNTAX_FIELD: i32 = 12;

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to read schema file '{}': '{source}'", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("{}: {}", Position::new(.file, .line, .column), .message)]
    Parse {
        file: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },
    #[error("{}: {}", Position::new(.file, .line, .column), .message)]
    Link {
        file: String,
        line: Option<usize>,
        column: Option<usize>,
        message: String,
    },
    #[error("Schema file '{0}' was given more than once")]
    DuplicateFile(String),
}

/// A `file:line:column` prefix, omitting the unknown parts.
struct Position<'a> {
    file: &'a str,
    line: Option<usize>,
    column: Option<usize>,
}

impl<'a> Position<'a> {
    fn new(file: &'a str, line: &Option<usize>, column: &Option<usize>) -> Self {
        Self {
            file,
            line: *line,
            column: *column,
        }
    }
}

impl fmt::Display for Position<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.file)?;
        if let Some(line) = self.line {
            write!(f, ":{line}")?;
            if let Some(column) = self.column {
                write!(f, ":{column}")?;
            }
        }
        Ok(())
    }
}

/// A named schema source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaFile {
    /// The name other files use to import this one, like `pkg/service.proto`.
    pub name: String,
    pub contents: String,
}

impl SchemaFile {
    pub fn new(name: impl Into<String>, contents: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contents: contents.into(),
        }
    }

    /// Reads a schema file from disk, naming it after its path.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SchemaError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(path.to_string_lossy(), contents))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Warning => f.write_str("warning"),
        }
    }
}

/// A non fatal finding about a schema file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub file: String,
    pub line: Option<usize>,
    pub column: Option<usize>,
    pub severity: Severity,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {}: {}",
            Position::new(&self.file, &self.line, &self.column),
            self.severity,
            self.message
        )
    }
}

/// The linked files of one batch, in the order they were given.
#[derive(Debug, Clone)]
pub struct ParsedSchema {
    pub files: Vec<FileDescriptor>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, Default)]
pub struct SchemaParser {
    imports: BTreeMap<String, String>,
}

impl SchemaParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers sources that are only used to satisfy imports.
    ///
    /// They are linked when a file of the batch imports them, but they are not part of the
    /// returned [`ParsedSchema::files`].
    pub fn with_imports(mut self, files: impl IntoIterator<Item = SchemaFile>) -> Self {
        for file in files {
            self.imports.entry(file.name).or_insert(file.contents);
        }
        self
    }

    pub fn parse(
        &self,
        files: impl IntoIterator<Item = SchemaFile>,
    ) -> Result<ParsedSchema, SchemaError> {
        let mut names = Vec::new();
        let mut protos = HashMap::new();
        let mut diagnostics = Vec::new();

        for file in files {
            if protos.contains_key(&file.name) {
                return Err(SchemaError::DuplicateFile(file.name));
            }

            let proto = parse_file(&file.name, &file.contents)?;
            if let Some(diagnostic) = missing_syntax(&file.name, &proto) {
                warn!(
                    file = %diagnostic.file,
                    "{}", diagnostic.message
                );
                diagnostics.push(diagnostic);
            }

            names.push(file.name.clone());
            protos.insert(file.name, proto);
        }

        self.resolve_imports(&names, &mut protos)?;
        let order = link_order(&names, &protos)?;

        debug!(
            files = names.len(),
            imports = order.len() - names.len(),
            "linking schema files"
        );

        let mut pool = DescriptorPool::new();
        pool.add_file_descriptor_protos(order.iter().filter_map(|name| protos.remove(name)))
            .map_err(|err| SchemaError::Link {
                file: err.file().unwrap_or_default().to_string(),
                line: err.line().map(|line| line + 1),
                column: err.column().map(|column| column + 1),
                message: err.to_string(),
            })?;

        let files = names
            .iter()
            .filter_map(|name| pool.get_file_by_name(name))
            .collect();

        Ok(ParsedSchema { files, diagnostics })
    }

    /// Parses the fallback sources imported, directly or not, by the batch.
    fn resolve_imports(
        &self,
        names: &[String],
        protos: &mut HashMap<String, FileDescriptorProto>,
    ) -> Result<(), SchemaError> {
        let mut pending = names.to_vec();

        while let Some(name) = pending.pop() {
            let Some(dependencies) = protos.get(&name).map(|p| p.dependency.clone()) else {
                continue;
            };

            for (index, dependency) in dependencies.into_iter().enumerate() {
                if protos.contains_key(&dependency) {
                    continue;
                }

                let Some(contents) = self.imports.get(&dependency) else {
                    let (line, column) = protos
                        .get(&name)
                        .and_then(|p| span_start(p, &[DEPENDENCY_FIELD, index as i32]))
                        .unzip();
                    return Err(SchemaError::Link {
                        file: name,
                        line,
                        column,
                        message: format!("import '{dependency}' not found"),
                    });
                };

                let proto = parse_file(&dependency, contents)?;
                protos.insert(dependency.clone(), proto);
                pending.push(dependency);
            }
        }

        Ok(())
    }
}

fn parse_file(name: &str, contents: &str) -> Result<FileDescriptorProto, SchemaError> {
    protox_parse::parse(name, contents).map_err(|err| {
        let (line, column) = err
            .labels()
            .and_then(|mut labels| labels.next())
            .map(|label| line_column(contents, label.offset()))
            .unzip();

        SchemaError::Parse {
            file: name.to_string(),
            line,
            column,
            message: err.to_string(),
        }
    })
}

/// Orders files so that every file comes after the files it imports.
fn link_order(
    names: &[String],
    protos: &HashMap<String, FileDescriptorProto>,
) -> Result<Vec<String>, SchemaError> {
    fn visit(
        name: &str,
        protos: &HashMap<String, FileDescriptorProto>,
        visiting: &mut HashSet<String>,
        done: &mut HashSet<String>,
        order: &mut Vec<String>,
    ) -> Result<(), SchemaError> {
        if done.contains(name) {
            return Ok(());
        }
        if !visiting.insert(name.to_string()) {
            return Err(SchemaError::Link {
                file: name.to_string(),
                line: None,
                column: None,
                message: format!("import cycle through '{name}'"),
            });
        }

        if let Some(proto) = protos.get(name) {
            for dependency in &proto.dependency {
                visit(dependency, protos, visiting, done, order)?;
            }
        }

        visiting.remove(name);
        done.insert(name.to_string());
        order.push(name.to_string());
        Ok(())
    }

    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    let mut order = Vec::with_capacity(protos.len());
    for name in names {
        visit(name, protos, &mut visiting, &mut done, &mut order)?;
    }
    Ok(order)
}

fn missing_syntax(name: &str, proto: &FileDescriptorProto) -> Option<Diagnostic> {
    if proto.syntax.is_some() || span_start(proto, &[SYNTAX_FIELD]).is_some() {
        return None;
    }

    Some(Diagnostic {
        file: name.to_string(),
        line: None,
        column: None,
        severity: Severity::Warning,
        message: "no syntax specified, defaulting to proto2 syntax".to_string(),
    })
}

/// One-based start of the element at `path`, from the file's source code info.
fn span_start(proto: &FileDescriptorProto, path: &[i32]) -> Option<(usize, usize)> {
    let location = proto
        .source_code_info
        .as_ref()?
        .location
        .iter()
        .find(|location| location.path == path)?;

    let line = usize::try_from(*location.span.first()?).ok()?;
    let column = usize::try_from(*location.span.get(1)?).ok()?;
    Some((line + 1, column + 1))
}

/// One-based line and column of a byte offset.
fn line_column(source: &str, offset: usize) -> (usize, usize) {
    let before = source.get(..offset).unwrap_or(source);
    let line = before.matches('\n').count() + 1;
    let column = match before.rfind('\n') {
        Some(newline) => before[newline + 1..].chars().count() + 1,
        None => before.chars().count() + 1,
    };
    (line, column)
}
