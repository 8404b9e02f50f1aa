pub mod inline;
pub mod render;
pub mod sql_file;

use crate::error::WriteError;
use crate::extract::{QueryRecord, SourceFile};
use crate::log::WRITE;
use crate::shape::NamedShape;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::Builder;
use tracing::debug;

/// New content for one file, and what the file must still contain for the write to go ahead
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileWrite {
    pub path: PathBuf,
    /// `None` when the file did not exist
    pub expected: Option<String>,
    pub content: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    Unchanged,
}

///
/// The write that brings `file` in line with its shapes.
///
/// Inline files are rewritten in place, and `failed` are the file's queries that could not be
/// generated this run. A `.sql` file is never touched, its companion is written. A companion is
/// left as it is when its query failed.
///
pub fn plan(
    file: &SourceFile,
    shapes: &[NamedShape],
    failed: &[QueryRecord],
    default_type: &str,
) -> Result<Option<FileWrite>, WriteError> {
    if !file.is_sql_file() {
        if shapes.is_empty() && inline::find_namespace_block(&file.content).is_none() {
            return Ok(None);
        }

        return Ok(Some(FileWrite {
            path: file.path.clone(),
            expected: Some(file.content.clone()),
            content: inline::rewrite(&file.content, shapes, failed, default_type),
        }));
    }

    let (Some(shape), Some(path)) = (shapes.first(), sql_file::companion_path(&file.path)) else {
        return Ok(None);
    };

    Ok(Some(FileWrite {
        expected: read_if_exists(&path)?,
        content: sql_file::render(shape, &file.path, default_type),
        path,
    }))
}

///
/// All-or-nothing write.
///
/// Fails with a conflict when the file no longer holds the expected content. New content goes to a
/// temporary file in the same directory which then replaces the target, so a failure leaves the
/// original untouched.
///
pub fn write_atomic(write: &FileWrite) -> Result<WriteOutcome, WriteError> {
    let current = read_if_exists(&write.path)?;

    if current != write.expected {
        return Err(WriteError::Conflict {
            path: write.path.clone(),
        });
    }

    if current.as_deref() == Some(write.content.as_str()) {
        debug!(target: WRITE, msg = "Unchanged", path = ?write.path);
        return Ok(WriteOutcome::Unchanged);
    }

    // Write through symlinks rather than replacing them
    let target = match fs::canonicalize(&write.path) {
        Ok(target) => target,
        Err(err) if err.kind() == io::ErrorKind::NotFound => write.path.clone(),
        Err(err) => return Err(err.into()),
    };

    let dir = match target.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let existing = match fs::metadata(&target) {
        Ok(metadata) => Some(metadata.permissions()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };

    let mut builder = Builder::new();
    if existing.is_none() {
        if let Some(permissions) = new_file_permissions() {
            builder.permissions(permissions);
        }
    }

    let mut temp = builder.tempfile_in(&dir)?;
    if let Some(permissions) = existing {
        temp.as_file().set_permissions(permissions)?;
    }
    temp.write_all(write.content.as_bytes())?;
    temp.flush()?;
    temp.persist(&target)
        .map_err(|err| WriteError::Persist {
            path: write.path.clone(),
            source: err.error,
        })?;

    debug!(target: WRITE, msg = "Written", path = ?write.path);
    Ok(WriteOutcome::Written)
}

/// Mode for files we create, before the umask applies
#[cfg(unix)]
fn new_file_permissions() -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(fs::Permissions::from_mode(0o666))
}

#[cfg(not(unix))]
fn new_file_permissions() -> Option<fs::Permissions> {
    None
}

fn read_if_exists(path: &Path) -> Result<Option<String>, WriteError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}
