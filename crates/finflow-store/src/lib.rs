//! Filesystem-backed artifact storage.
//!
//! Artifacts are plain text documents addressed by path. The store is the
//! single durability boundary of the flow: branches write retrieval
//! results and corpus files through it, and the synthesis stage reads
//! them back.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use finflow_core::error::{FlowError, Result};
use finflow_core::traits::ArtifactStore;

/// Artifact store over the local filesystem.
#[derive(Debug, Clone, Default)]
pub struct FsArtifactStore;

impl FsArtifactStore {
    pub fn new() -> Self {
        Self
    }
}

fn map_read_err(path: &Path, e: std::io::Error) -> FlowError {
    if e.kind() == ErrorKind::NotFound {
        FlowError::ArtifactNotFound(PathBuf::from(path))
    } else {
        FlowError::Io(e)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn append(&self, path: &Path, text: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_path_buf();
        let text = text.to_string();
        Box::pin(async move {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await?;
            file.write_all(text.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
    }

    fn write(&self, path: &Path, text: &str) -> BoxFuture<'_, Result<()>> {
        let path = path.to_path_buf();
        let text = text.to_string();
        Box::pin(async move {
            tokio::fs::write(&path, text.as_bytes()).await?;
            Ok(())
        })
    }

    fn read_to_string(&self, path: &Path) -> BoxFuture<'_, Result<String>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| map_read_err(&path, e))
        })
    }

    fn remove(&self, path: &Path) -> BoxFuture<'_, Result<()>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(FlowError::Io(e)),
            }
        })
    }

    fn clear_dir(&self, dir: &Path) -> BoxFuture<'_, Result<()>> {
        let dir = dir.to_path_buf();
        Box::pin(async move {
            // Pre-existing contents are deleted, not merged
            match tokio::fs::remove_dir_all(&dir).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(FlowError::Io(e)),
            }
            tokio::fs::create_dir_all(&dir).await?;
            debug!(dir = %dir.display(), "Cache directory cleared");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_creates_and_extends() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new();
        let path = dir.path().join("report.txt");

        store.append(&path, "first\n").await.unwrap();
        store.append(&path, "second\n").await.unwrap();

        let content = store.read_to_string(&path).await.unwrap();
        assert_eq!(content, "first\nsecond\n");
    }

    #[tokio::test]
    async fn test_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new();
        let path = dir.path().join("report.txt");

        store.write(&path, "old").await.unwrap();
        store.write(&path, "new").await.unwrap();

        assert_eq!(store.read_to_string(&path).await.unwrap(), "new");
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new();
        let path = dir.path().join("missing.txt");

        let err = store.read_to_string(&path).await.unwrap_err();
        assert!(matches!(err, FlowError::ArtifactNotFound(p) if p == path));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new();
        let path = dir.path().join("corpus.txt");

        store.write(&path, "stale").await.unwrap();
        store.remove(&path).await.unwrap();
        store.remove(&path).await.unwrap();

        assert!(store.read_to_string(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_dir_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new();
        let cache = dir.path().join("cache");

        store.clear_dir(&cache).await.unwrap();
        store.write(&cache.join("leftover.txt"), "x").await.unwrap();

        store.clear_dir(&cache).await.unwrap();
        assert!(cache.is_dir());
        assert!(store.read_to_string(&cache.join("leftover.txt")).await.is_err());
    }
}
