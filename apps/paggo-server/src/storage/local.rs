//! Local filesystem storage

use std::path::{Component, Path, PathBuf};

use super::types::{StorageError, StoredObject};

/// Stores uploaded files under a single root directory
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    /// Create a storage rooted at `root`.
    ///
    /// Relative roots are anchored at the current working directory so that
    /// every path handed out is absolute.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()?.join(root)
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a relative key
    pub fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(relative))
    }

    /// Write `data` under `key`, creating parent directories as needed.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<StoredObject, StorageError> {
        let path = self.resolve(key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;

        tracing::debug!(key, path = %path.display(), size = data.len(), "Stored object");

        Ok(StoredObject {
            key: key.to_string(),
            absolute_path: path,
            size: data.len() as u64,
        })
    }

    /// Read a file back by absolute path.
    ///
    /// Paths outside the storage root are rejected.
    pub async fn read(&self, absolute_path: &Path) -> Result<Vec<u8>, StorageError> {
        if !absolute_path.starts_with(&self.root) {
            return Err(StorageError::InvalidKey(
                absolute_path.display().to_string(),
            ));
        }

        match tokio::fs::read(absolute_path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::ObjectNotFound(absolute_path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a stored file by absolute path. Missing files are not an error.
    pub async fn remove(&self, absolute_path: &Path) -> Result<(), StorageError> {
        if !absolute_path.starts_with(&self.root) {
            return Err(StorageError::InvalidKey(
                absolute_path.display().to_string(),
            ));
        }

        match tokio::fs::remove_file(absolute_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_and_read() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        let stored = storage.put("uploads/abc.pdf", b"%PDF-1.4").await.unwrap();
        assert!(stored.absolute_path.is_absolute());
        assert_eq!(stored.absolute_path, dir.path().join("uploads/abc.pdf"));
        assert_eq!(stored.size, 8);

        let bytes = storage.read(&stored.absolute_path).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4");
    }

    #[test]
    fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        assert!(matches!(storage.resolve("../etc/passwd"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(storage.resolve("/abs/path"), Err(StorageError::InvalidKey(_))));
        assert!(matches!(storage.resolve(""), Err(StorageError::InvalidKey(_))));
        assert!(storage.resolve("a/b.png").is_ok());
    }

    #[tokio::test]
    async fn test_read_missing_and_foreign_paths() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        let missing = dir.path().join("nope.png");
        assert!(matches!(
            storage.read(&missing).await,
            Err(StorageError::ObjectNotFound(_))
        ));

        let other = TempDir::new().unwrap();
        assert!(matches!(
            storage.read(&other.path().join("x.png")).await,
            Err(StorageError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_remove() {
        let dir = TempDir::new().unwrap();
        let storage = LocalStorage::new(dir.path()).unwrap();

        let stored = storage.put("gone.png", b"png").await.unwrap();
        storage.remove(&stored.absolute_path).await.unwrap();
        assert!(!stored.absolute_path.exists());

        // second delete is a no-op
        storage.remove(&stored.absolute_path).await.unwrap();

        let other = TempDir::new().unwrap();
        assert!(matches!(
            storage.remove(&other.path().join("x.png")).await,
            Err(StorageError::InvalidKey(_))
        ));
    }
}
