// ABOUTME: Filesystem-backed object storage using tokio::fs
// ABOUTME: Stores objects under root/{owner}/{id} with .pending markers for reservations
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

use super::{ObjectRef, ObjectStatus, ObjectStorage};
use crate::errors::{AppError, AppResult};

const PENDING_SUFFIX: &str = ".pending";

/// Object storage rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsObjectStorage {
    root: PathBuf,
}

impl FsObjectStorage {
    /// Storage rooted at `root`; directories are created lazily
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, object: &ObjectRef) -> PathBuf {
        self.root.join(&object.owner).join(&object.object_id)
    }

    fn pending_path(&self, object: &ObjectRef) -> PathBuf {
        self.root
            .join(&object.owner)
            .join(format!("{}{PENDING_SUFFIX}", object.object_id))
    }

    async fn ensure_namespace(&self, object: &ObjectRef) -> AppResult<()> {
        fs::create_dir_all(self.root.join(&object.owner))
            .await
            .map_err(|e| {
                AppError::storage(format!("Failed to create namespace {}: {e}", object.owner))
            })
    }

    fn new_object(user_id: &str) -> AppResult<ObjectRef> {
        ObjectRef::for_user(user_id, Uuid::new_v4().to_string())
    }

    async fn write_marker(&self, object: &ObjectRef) -> AppResult<()> {
        self.ensure_namespace(object).await?;
        fs::write(self.pending_path(object), b"")
            .await
            .map_err(|e| AppError::storage(format!("Failed to reserve {object}: {e}")))
    }
}

async fn exists(path: &Path) -> AppResult<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(AppError::storage(format!(
            "Failed to stat {}: {e}",
            path.display()
        ))),
    }
}

#[async_trait]
impl ObjectStorage for FsObjectStorage {
    async fn stat(&self, url: &str) -> AppResult<ObjectStatus> {
        let object = ObjectRef::parse(url)?;
        if exists(&self.object_path(&object)).await? {
            Ok(ObjectStatus::Ready)
        } else if exists(&self.pending_path(&object)).await? {
            Ok(ObjectStatus::Pending)
        } else {
            Ok(ObjectStatus::Missing)
        }
    }

    async fn duplicate(&self, url: &str, new_owner: &str) -> AppResult<String> {
        let source = ObjectRef::parse(url)?;
        let copy = Self::new_object(new_owner)?;
        match self.stat(url).await? {
            ObjectStatus::Ready => {
                self.ensure_namespace(&copy).await?;
                fs::copy(self.object_path(&source), self.object_path(&copy))
                    .await
                    .map_err(|e| AppError::storage(format!("Failed to duplicate {url}: {e}")))?;
                debug!(source = %url, copy = %copy, "Object duplicated");
            }
            ObjectStatus::Pending => {
                self.write_marker(&copy).await?;
                debug!(source = %url, copy = %copy, "Pending object reserved in new namespace");
            }
            ObjectStatus::Missing => return Err(AppError::not_found(format!("Object {url}"))),
        }
        Ok(copy.to_string())
    }

    async fn put(&self, owner: &str, bytes: &[u8]) -> AppResult<String> {
        let object = Self::new_object(owner)?;
        self.ensure_namespace(&object).await?;
        fs::write(self.object_path(&object), bytes)
            .await
            .map_err(|e| AppError::storage(format!("Failed to write {object}: {e}")))?;
        Ok(object.to_string())
    }

    async fn reserve(&self, owner: &str) -> AppResult<String> {
        let object = Self::new_object(owner)?;
        self.write_marker(&object).await?;
        Ok(object.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_stat_ready() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let url = storage.put("alice", b"hello").await.unwrap();
        assert!(url.starts_with("store://alice/"));
        assert_eq!(storage.stat(&url).await.unwrap(), ObjectStatus::Ready);
    }

    #[tokio::test]
    async fn test_reserved_object_is_pending() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let url = storage.reserve("alice").await.unwrap();
        assert_eq!(storage.stat(&url).await.unwrap(), ObjectStatus::Pending);
    }

    #[tokio::test]
    async fn test_pending_object_is_reserved_for_new_owner() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let url = storage.reserve("alice").await.unwrap();
        let copy = storage.duplicate(&url, "bob").await.unwrap();

        assert!(copy.starts_with("store://bob/"));
        assert_eq!(storage.stat(&copy).await.unwrap(), ObjectStatus::Pending);
        assert_eq!(storage.stat(&url).await.unwrap(), ObjectStatus::Pending);
    }

    #[tokio::test]
    async fn test_email_owner_gets_encoded_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let original = storage.put("alice", b"payload").await.unwrap();
        let copy = storage.duplicate(&original, "carol@example.com").await.unwrap();

        let copied = ObjectRef::parse(&copy).unwrap();
        assert!(copied.is_owned_by("carol@example.com"));
        assert_eq!(storage.stat(&copy).await.unwrap(), ObjectStatus::Ready);
        let reserved = storage.reserve("carol@example.com").await.unwrap();
        assert_eq!(storage.stat(&reserved).await.unwrap(), ObjectStatus::Pending);
    }

    #[tokio::test]
    async fn test_unknown_object_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let status = storage.stat("store://alice/nothing-here").await.unwrap();
        assert_eq!(status, ObjectStatus::Missing);
        assert!(storage.duplicate("store://alice/nothing-here", "bob").await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_copies_into_new_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsObjectStorage::new(dir.path());

        let original = storage.put("alice", b"payload").await.unwrap();
        let copy = storage.duplicate(&original, "bob").await.unwrap();

        assert_ne!(copy, original);
        assert!(copy.starts_with("store://bob/"));
        let copied = ObjectRef::parse(&copy).unwrap();
        let bytes = fs::read(dir.path().join("bob").join(&copied.object_id)).await.unwrap();
        assert_eq!(bytes, b"payload");
    }
}
