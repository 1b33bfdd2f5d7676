//! Atomic replace-on-write helpers shared by every persisted store.

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::trace;

use crate::error::{PmError, PmResult};

/// Serialize `value` as JSON and atomically replace `path` with it.
///
/// The data is written to a temp file in the same directory, synced, then
/// renamed over the target, so a crash leaves either the old or the new
/// generation on disk.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> PmResult<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| PmError::io(parent, e))?;

    let body = serde_json::to_vec_pretty(value).map_err(|e| PmError::Serialization {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| PmError::io(parent, e))?;
    tmp.write_all(&body).map_err(|e| PmError::io(path, e))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| PmError::io(path, e))?;
    tmp.persist(path).map_err(|e| PmError::io(path, e.error))?;

    trace!(path = %path.display(), bytes = body.len(), "Persisted");
    Ok(())
}

/// Read and deserialize a JSON file.
pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> PmResult<T> {
    let bytes = std::fs::read(path).map_err(|e| PmError::io(path, e))?;
    serde_json::from_slice(&bytes).map_err(|e| PmError::Serialization {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Remove a directory tree. A missing tree is not an error.
///
/// Read-only files are made writable first so that platforms which refuse
/// to unlink them still succeed.
pub(crate) fn remove_tree(path: &Path) -> PmResult<()> {
    if !path.exists() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(path).into_iter().flatten() {
        if let Ok(meta) = entry.metadata() {
            let mut perms = meta.permissions();
            if perms.readonly() {
                #[allow(clippy::permissions_set_readonly_false)]
                perms.set_readonly(false);
                let _ = std::fs::set_permissions(entry.path(), perms);
            }
        }
    }

    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PmError::io(path, e)),
    }
}

/// Remove a single file. A missing file is not an error.
pub(crate) fn remove_file(path: &Path) -> PmResult<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PmError::io(path, e)),
    }
}
