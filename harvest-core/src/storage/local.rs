/*!
Local filesystem storage backend.
*/

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{SaveResult, StorageBackend, WriteRequest};
use crate::payload::{RawPayload, WriteMode};
use crate::{PersistError, Result};

/// Local filesystem storage backend
///
/// Writes each artifact as a file at its resolved filename, creating any
/// missing parent directories first. Metadata and content type are not
/// recorded on disk.
///
/// # Example
/// ```rust,no_run
/// use harvest_core::storage::LocalFileStorage;
///
/// // Filenames are resolved under /var/harvest
/// let storage = LocalFileStorage::with_base_dir("/var/harvest");
/// ```
#[derive(Debug, Clone, Default)]
pub struct LocalFileStorage {
    /// Optional base directory all filenames are joined to
    base_dir: Option<PathBuf>,
}

impl LocalFileStorage {
    /// Filenames are used as-is
    pub fn new() -> Self {
        Self { base_dir: None }
    }

    /// Filenames are resolved relative to `base_dir`
    pub fn with_base_dir<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: Some(base_dir.as_ref().to_path_buf()),
        }
    }

    fn resolve_path(&self, filename: &str) -> PathBuf {
        match &self.base_dir {
            Some(base) => base.join(filename),
            None => PathBuf::from(filename),
        }
    }

    /// Create every missing directory above `path`
    fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| PersistError::persistence(parent, e))?;
            }
        }
        Ok(())
    }

    fn write_payload(&self, path: &Path, payload: &RawPayload) -> Result<WriteMode> {
        let body = payload.encode();
        fs::write(path, &body.bytes).map_err(|e| PersistError::persistence(path, e))?;
        Ok(body.mode)
    }
}

impl StorageBackend for LocalFileStorage {
    fn write(&self, request: &WriteRequest<'_>) -> Result<SaveResult> {
        let full_path = self.resolve_path(request.filename);

        self.ensure_parent_dir(&full_path)?;
        let mode = self.write_payload(&full_path, request.payload)?;

        debug!(
            path = %full_path.display(),
            size = request.payload.len(),
            mode = ?mode,
            "Wrote artifact to local filesystem"
        );

        let path = match &self.base_dir {
            Some(_) => full_path.to_string_lossy().into_owned(),
            None => request.filename.to_string(),
        };
        Ok(SaveResult::Local { path })
    }
}
