//! Blob storage for uploaded source PDFs

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

/// A stored object and where the extraction service can fetch it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub key: String,
    pub url: String,
}

/// Trait for blob storage
///
/// Implementations:
/// - `LocalBlobStore`: local directory served over HTTP at `/blobs`
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store `data`; the store chooses the key
    async fn put(&self, filename: &str, data: Bytes) -> Result<StoredBlob>;

    /// Read an object back
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Delete an object; a missing object is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// URL issued for `key`
    fn url(&self, key: &str) -> String;

    /// Get provider name for logging
    fn name(&self) -> &str;
}

/// Generate a key of the form `papers/YYYYMMDD/<uuid>.<ext>`
pub fn generate_key(filename: &str) -> String {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "pdf".to_string());

    format!(
        "papers/{}/{}.{}",
        Utc::now().format("%Y%m%d"),
        Uuid::new_v4(),
        extension
    )
}

/// Filesystem-backed blob store
pub struct LocalBlobStore {
    root: PathBuf,
    base_url: String,
}

impl LocalBlobStore {
    /// Create a store rooted at `root`, issuing URLs under `base_url`
    pub fn new(root: PathBuf, base_url: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn blob_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if key.is_empty() || !safe {
            return Err(Error::validation(format!("Invalid blob key: {}", key)));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn put(&self, filename: &str, data: Bytes) -> Result<StoredBlob> {
        let key = generate_key(filename);
        let path = self.blob_path(&key)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| Error::collaborator(format!("Failed to store blob {}: {}", key, e)))?;

        tracing::debug!("[{}] stored {} bytes for {}", key, data.len(), filename);

        Ok(StoredBlob {
            url: self.url(&key),
            key,
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        let path = self.blob_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", key)))
            }
            Err(e) => Err(Error::collaborator(format!("Failed to read blob {}: {}", key, e))),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.blob_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::collaborator(format!(
                "Failed to delete blob {}: {}",
                key, e
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let path = self.blob_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    fn url(&self, key: &str) -> String {
        format!("{}/blobs/{}", self.base_url, key)
    }

    fn name(&self) -> &str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_layout() {
        let key = generate_key("Attention Is All You Need.PDF");
        let parts: Vec<&str> = key.split('/').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "papers");
        assert_eq!(parts[1].len(), 8);
        assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[2].ends_with(".pdf"));
        assert_ne!(generate_key("a.pdf"), generate_key("a.pdf"));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), "http://host:8000/").unwrap();

        let blob = store.put("paper.pdf", Bytes::from_static(b"%PDF-1.7")).await.unwrap();
        assert!(blob.url.starts_with("http://host:8000/blobs/papers/"));
        assert!(store.exists(&blob.key).await.unwrap());
        assert_eq!(store.get(&blob.key).await.unwrap(), Bytes::from_static(b"%PDF-1.7"));

        store.delete(&blob.key).await.unwrap();
        assert!(!store.exists(&blob.key).await.unwrap());
        // deleting twice is fine
        store.delete(&blob.key).await.unwrap();
        assert!(matches!(store.get(&blob.key).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalBlobStore::new(dir.path().to_path_buf(), "http://host").unwrap();
        assert!(store.get("../etc/passwd").await.is_err());
        assert!(store.delete("/abs/path").await.is_err());
    }
}
