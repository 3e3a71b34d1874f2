//! File-storage collaborator.
//!
//! The engine treats stored files as opaque references. The only operation it
//! ever requests is deletion, invoked best-effort during forced deletion; a
//! storage failure must never poison the database transaction.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;

use crate::error::FileStorageError;

/// Narrow interface to wherever document files actually live.
#[async_trait]
pub trait FileStorage: Send + Sync {
    /// Delete the stored file behind `file_ref`. Deleting a reference that no
    /// longer resolves is not an error.
    async fn delete_stored_file(&self, file_ref: &str) -> Result<(), FileStorageError>;
}

/// Local-disk storage rooted at a fixed directory, matching the original
/// deployment's upload folder.
#[derive(Debug, Clone)]
pub struct LocalFiles {
    root: PathBuf,
}

impl LocalFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a reference under the root, rejecting anything that would
    /// escape it.
    fn resolve(&self, file_ref: &str) -> Result<PathBuf, FileStorageError> {
        let trimmed = file_ref.trim();
        if trimmed.is_empty() {
            return Err(FileStorageError::InvalidRef {
                file_ref: file_ref.to_string(),
                message: "reference must not be empty".to_string(),
            });
        }

        let raw = Path::new(trimmed);
        if raw.is_absolute() {
            return Err(FileStorageError::InvalidRef {
                file_ref: file_ref.to_string(),
                message: "reference must be relative to the storage root".to_string(),
            });
        }

        let mut resolved = self.root.clone();
        for component in raw.components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                _ => {
                    return Err(FileStorageError::InvalidRef {
                        file_ref: file_ref.to_string(),
                        message: "reference must not contain '..' components".to_string(),
                    });
                }
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl FileStorage for LocalFiles {
    async fn delete_stored_file(&self, file_ref: &str) -> Result<(), FileStorageError> {
        let path = self.resolve(file_ref)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(FileStorageError::Delete {
                file_ref: file_ref.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FileStorage, LocalFiles};

    #[tokio::test]
    async fn deletes_file_under_root() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scan.pdf");
        std::fs::write(&path, b"pdf").expect("seed file");

        let files = LocalFiles::new(dir.path());
        files.delete_stored_file("scan.pdf").await.expect("delete");
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = LocalFiles::new(dir.path());
        files
            .delete_stored_file("never-uploaded.pdf")
            .await
            .expect("idempotent delete");
    }

    #[tokio::test]
    async fn rejects_traversal_references() {
        let dir = tempfile::tempdir().expect("tempdir");
        let files = LocalFiles::new(dir.path());
        assert!(files.delete_stored_file("../etc/passwd").await.is_err());
        assert!(files.delete_stored_file("/etc/passwd").await.is_err());
        assert!(files.delete_stored_file("   ").await.is_err());
    }
}
