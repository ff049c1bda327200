use crate::error::StorageError;
use crate::traits::FileStorage;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Keeps uploaded files under a local directory and hands out `file://` URLs.
#[derive(Debug, Clone)]
pub struct LocalFileStorage {
    root: PathBuf,
}

impl LocalFileStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn resolve_reference(reference: &str) -> Result<PathBuf, StorageError> {
    if reference.starts_with("file://") {
        let url = Url::parse(reference)?;
        return url
            .to_file_path()
            .map_err(|_| StorageError::InvalidReference(reference.to_string()));
    }
    if reference.trim().is_empty() {
        return Err(StorageError::InvalidReference(reference.to_string()));
    }
    Ok(PathBuf::from(reference))
}

#[async_trait]
impl FileStorage for LocalFileStorage {
    async fn put(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let base_name = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| StorageError::InvalidReference(file_name.to_string()))?;

        tokio::fs::create_dir_all(&self.root).await?;
        let target = self
            .root
            .join(format!("{}-{}", Uuid::new_v4().simple(), base_name));
        tokio::fs::write(&target, bytes).await?;

        let absolute = tokio::fs::canonicalize(&target).await?;
        let url = Url::from_file_path(&absolute)
            .map_err(|_| StorageError::InvalidReference(absolute.display().to_string()))?;

        debug!(reference = %url, content_type, size = bytes.len(), "stored upload");
        Ok(url.to_string())
    }

    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, StorageError> {
        let path = resolve_reference(reference)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(reference.to_string()))
            }
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn stored_file_can_be_fetched_by_reference() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let storage = LocalFileStorage::new(dir.path().join("uploads"));

        let reference = storage
            .put(b"%PDF-1.4 body", "nested/dir/rules.pdf", "application/pdf")
            .await?;
        assert!(reference.starts_with("file://"));
        assert!(reference.ends_with("-rules.pdf"));

        let bytes = storage.fetch(&reference).await?;
        assert_eq!(bytes, b"%PDF-1.4 body");
        Ok(())
    }

    #[tokio::test]
    async fn same_file_name_never_overwrites_an_earlier_upload(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let storage = LocalFileStorage::new(dir.path());

        let mut stored = Vec::new();
        for round in 0..20 {
            let first = format!("FIRST-{round}");
            let second = format!("SECOND-{round}");
            let first_ref = storage.put(first.as_bytes(), "a/rules.pdf", "application/pdf").await?;
            let second_ref = storage.put(second.as_bytes(), "b/rules.pdf", "application/pdf").await?;
            assert_ne!(first_ref, second_ref);
            stored.push((first_ref, first));
            stored.push((second_ref, second));
        }

        for (reference, body) in stored {
            assert_eq!(storage.fetch(&reference).await?, body.into_bytes());
        }
        Ok(())
    }

    #[tokio::test]
    async fn plain_paths_are_accepted() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("a.pdf");
        std::fs::write(&path, b"abc")?;

        let storage = LocalFileStorage::new(dir.path());
        let bytes = storage.fetch(&path.to_string_lossy()).await?;
        assert_eq!(bytes, b"abc");
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_is_not_found() {
        let dir = tempdir().expect("tempdir");
        let storage = LocalFileStorage::new(dir.path());
        let missing = dir.path().join("missing.pdf");

        let result = storage.fetch(&missing.to_string_lossy()).await;
        assert!(matches!(result, Err(StorageError::NotFound(_))));
    }
}
