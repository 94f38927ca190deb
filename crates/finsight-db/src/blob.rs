//! Filesystem blob storage for uploads and artifacts.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use finsight_core::{BlobStore, Result};

/// Filesystem implementation of `BlobStore`.
///
/// Stores blobs in a directory hierarchy sharded by the report's UUIDv7.
/// Handle format: `blobs/{first-2-hex}/{next-2-hex}/{uuid}/{name}`
pub struct FilesystemBlobStore {
    base_path: PathBuf,
}

impl FilesystemBlobStore {
    /// Create a new filesystem blob store rooted at the given directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn full_path(&self, handle: &str) -> PathBuf {
        self.base_path.join(handle)
    }

    /// Validate that the store can write, read, and delete files.
    ///
    /// Performs a full round-trip test at startup to catch filesystem issues
    /// (overlayfs quirks, permission errors, missing directories) early.
    pub async fn validate(&self) -> std::result::Result<(), String> {
        let test_dir = self.base_path.join("blobs/.health-check");
        let test_file = test_dir.join("test.bin");

        fs::create_dir_all(&test_dir)
            .await
            .map_err(|e| format!("create_dir_all({:?}): {}", test_dir, e))?;

        let data = b"storage-health-check";
        fs::write(&test_file, data)
            .await
            .map_err(|e| format!("write({:?}): {}", test_file, e))?;

        let read_data = fs::read(&test_file)
            .await
            .map_err(|e| format!("read({:?}): {}", test_file, e))?;
        if read_data != data {
            return Err("read-back mismatch".to_string());
        }

        fs::remove_file(&test_file)
            .await
            .map_err(|e| format!("remove_file({:?}): {}", test_file, e))?;
        let _ = fs::remove_dir(&test_dir).await; // Best-effort cleanup

        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn put(&self, handle: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(handle);
        debug!(
            subsystem = "db",
            component = "blob_store",
            blob_handle = %handle,
            file_size = data.len(),
            "blob: put"
        );

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await.map_err(|e| {
                warn!(parent = %parent.display(), error = %e, "blob: create_dir_all failed");
                e
            })?;
        }

        // Atomic write: temp file + rename
        let temp_path = full_path.with_extension("tmp");
        let mut file = fs::File::create(&temp_path).await.map_err(|e| {
            warn!(temp_path = %temp_path.display(), error = %e, "blob: File::create failed");
            e
        })?;
        file.write_all(data).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &full_path).await.map_err(|e| {
            warn!(from = %temp_path.display(), to = %full_path.display(), error = %e, "blob: rename failed");
            e
        })?;

        // 0644, no execute
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&full_path, std::fs::Permissions::from_mode(0o644)).await?;
        }

        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>> {
        Ok(fs::read(self.full_path(handle)).await?)
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        let full_path = self.full_path(handle);
        if fs::try_exists(&full_path).await? {
            fs::remove_file(full_path).await?;
        }
        Ok(())
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        Ok(fs::try_exists(self.full_path(handle)).await?)
    }
}

/// Compute BLAKE3 hash of data with "blake3:" prefix.
pub fn compute_content_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    format!("blake3:{}", hash.to_hex())
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsight_core::{generate_blob_handle, new_v7};

    #[tokio::test]
    async fn put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());

        let handle = generate_blob_handle(&new_v7(), "upload.pdf");
        store.put(&handle, b"hello").await.unwrap();

        assert!(store.exists(&handle).await.unwrap());
        assert_eq!(store.get(&handle).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());

        let handle = generate_blob_handle(&new_v7(), "upload.pdf");
        store.put(&handle, b"hello").await.unwrap();

        store.delete(&handle).await.unwrap();
        assert!(!store.exists(&handle).await.unwrap());
        // Deleting again is not an error
        store.delete(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn validate_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemBlobStore::new(dir.path());
        store.validate().await.unwrap();
    }

    #[test]
    fn content_hash_is_stable_and_prefixed() {
        let h1 = compute_content_hash(b"statement");
        let h2 = compute_content_hash(b"statement");
        assert_eq!(h1, h2);
        assert!(h1.starts_with("blake3:"));
        assert_ne!(h1, compute_content_hash(b"other"));
    }
}
