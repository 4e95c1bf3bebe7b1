use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::CoreError;

/// Extensions picked up when walking a directory.
pub const SOURCE_EXTENSIONS: &[&str] = &["py", "lpy"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    /// Name used in diagnostics.
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

/// Load `path`, or every source file below it if it is a directory.
///
/// Directory entries come back sorted by path. A file named explicitly is
/// loaded whatever its extension.
pub fn load_sources(path: impl AsRef<Path>) -> Result<Vec<SourceFile>, CoreError> {
    let path = path.as_ref();
    if !path.is_dir() {
        return Ok(vec![read_source(path)?]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).sort_by_file_name() {
        let entry = entry.map_err(|err| CoreError::SourceIo(err.into()))?;
        let entry_path = entry.path();
        if entry.file_type().is_file() && is_source(entry_path) {
            files.push(read_source(entry_path)?);
        }
    }
    log::debug!("found {} source files under {}", files.len(), path.display());
    Ok(files)
}

fn is_source(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| SOURCE_EXTENSIONS.contains(&ext))
}

fn read_source(path: &Path) -> Result<SourceFile, CoreError> {
    let contents = fs::read_to_string(path)?;
    Ok(SourceFile {
        name: path.display().to_string(),
        path: path.to_path_buf(),
        contents,
    })
}
