//! Loads the proto files named on the command line into a [`SchemaSource`].
//!
//! Files found under the import paths only satisfy imports. Files are named relative to the
//! import path that contains them, the way `import` statements refer to them.
use crate::cli::SchemaArgs;
use std::path::{Path, PathBuf};
use tracing::debug;
use ttrpcurl_core::schema::{SchemaError, SchemaFile, SchemaParser, SchemaSource};

pub fn load_schema(args: &SchemaArgs) -> Result<SchemaSource, SchemaError> {
    let mut imports = Vec::new();
    for dir in &args.import_paths {
        collect_protos(dir, dir, &mut imports)?;
    }
    debug!(files = imports.len(), "found proto files in import paths");

    let includes = read_all(&args.includes, &args.import_paths)?;
    let included = SchemaParser::new()
        .with_imports(imports.iter().cloned())
        .parse(includes.iter().cloned())?;

    let primary = SchemaParser::new()
        .with_imports(includes)
        .with_imports(imports)
        .parse(read_all(&args.protos, &args.import_paths)?)?;

    Ok(SchemaSource::merge(primary.files, included.files))
}

fn read_all(paths: &[PathBuf], import_paths: &[PathBuf]) -> Result<Vec<SchemaFile>, SchemaError> {
    paths
        .iter()
        .map(|path| {
            let mut file = SchemaFile::read(path)?;
            file.name = import_name(path, import_paths);
            Ok(file)
        })
        .collect()
}

/// The name a file is imported by: its path relative to the first import path containing it,
/// or the path as given.
fn import_name(path: &Path, import_paths: &[PathBuf]) -> String {
    let relative = import_paths
        .iter()
        .find_map(|dir| path.strip_prefix(dir).ok())
        .unwrap_or(path);

    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn collect_protos(root: &Path, dir: &Path, files: &mut Vec<SchemaFile>) -> Result<(), SchemaError> {
    let io_error = |source| SchemaError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = std::fs::read_dir(dir)
        .map_err(io_error)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error)?;
    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let path = entry.path();
        if path.is_dir() {
            collect_protos(root, &path, files)?;
        } else if path.extension().is_some_and(|ext| ext == "proto") {
            let mut file = SchemaFile::read(&path)?;
            file.name = import_name(&path, &[root.to_path_buf()]);
            files.push(file);
        }
    }

    Ok(())
}
