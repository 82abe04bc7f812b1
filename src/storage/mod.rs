// ABOUTME: Object storage contract for files referenced by turn parts
// ABOUTME: Parses store:// references and exposes the filesystem-backed implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Object storage
//!
//! File parts carry a `store://{owner}/{object}` reference. Objects live in a
//! per-owner namespace; forking a conversation duplicates referenced objects
//! into the forking user's namespace so the copies never alias the source.

/// Local filesystem implementation
pub mod filesystem;

use std::fmt;

use async_trait::async_trait;

use crate::errors::{AppError, AppResult};

pub use filesystem::FsObjectStorage;

/// URL scheme prefix of stored objects
pub const SCHEME_PREFIX: &str = "store://";

/// Availability of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectStatus {
    /// Fully written and readable
    Ready,
    /// Reserved and still being generated
    Pending,
    /// Unknown to storage
    Missing,
}

impl ObjectStatus {
    /// Whether a turn may reference an object in this state
    #[must_use]
    pub const fn is_referenceable(self) -> bool {
        matches!(self, Self::Ready | Self::Pending)
    }
}

/// Parsed `store://{owner}/{object}` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    /// Owning user namespace
    pub owner: String,
    /// Object identifier within the namespace
    pub object_id: String,
}

impl ObjectRef {
    /// Build a reference, validating both segments
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUT` if a segment is empty or contains characters
    /// outside `[A-Za-z0-9._-]`, or is a relative path component
    pub fn new(owner: impl Into<String>, object_id: impl Into<String>) -> AppResult<Self> {
        let owner = owner.into();
        let object_id = object_id.into();
        validate_segment(&owner)?;
        validate_segment(&object_id)?;
        Ok(Self { owner, object_id })
    }

    /// New object in `user_id`'s namespace
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUT` if `object_id` is not a valid segment
    pub fn for_user(user_id: &str, object_id: impl Into<String>) -> AppResult<Self> {
        Self::new(namespace_for(user_id), object_id)
    }

    /// Whether the object lives in `user_id`'s namespace
    #[must_use]
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner == namespace_for(user_id)
    }

    /// Parse a `store://` URL
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUT` for other schemes or malformed paths
    pub fn parse(url: &str) -> AppResult<Self> {
        let path = url
            .strip_prefix(SCHEME_PREFIX)
            .ok_or_else(|| AppError::invalid_input(format!("Unsupported file URL: {url}")))?;
        let (owner, object_id) = path
            .split_once('/')
            .ok_or_else(|| AppError::invalid_input(format!("Malformed file URL: {url}")))?;
        Self::new(owner, object_id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME_PREFIX}{}/{}", self.owner, self.object_id)
    }
}

/// Storage namespace of a user
///
/// Ids that are already valid path segments are used as-is unless they start
/// with `_`. Every other id becomes `_` followed by its hex-encoded bytes, so
/// two users never share a namespace.
#[must_use]
pub fn namespace_for(user_id: &str) -> String {
    if !user_id.starts_with('_') && is_valid_segment(user_id) {
        user_id.to_owned()
    } else {
        format!("_{}", hex::encode(user_id))
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && segment != ".."
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

fn validate_segment(segment: &str) -> AppResult<()> {
    if is_valid_segment(segment) {
        Ok(())
    } else {
        Err(AppError::invalid_input(format!(
            "Invalid storage path segment: {segment:?}"
        )))
    }
}

/// Blob storage used by file parts
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Availability of the object behind `url`
    async fn stat(&self, url: &str) -> AppResult<ObjectStatus>;

    /// Copy the object behind `url` into `new_owner`'s namespace
    ///
    /// Returns the URL of the copy. An object still being generated gets a
    /// pending placeholder in the new namespace.
    async fn duplicate(&self, url: &str, new_owner: &str) -> AppResult<String>;

    /// Store `bytes` as a new ready object owned by `owner`
    async fn put(&self, owner: &str, bytes: &[u8]) -> AppResult<String>;

    /// Reserve a new object that will be written later
    async fn reserve(&self, owner: &str) -> AppResult<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_display() {
        let parsed = ObjectRef::parse("store://alice/report.pdf").unwrap();
        assert_eq!(parsed.owner, "alice");
        assert_eq!(parsed.object_id, "report.pdf");
        assert_eq!(parsed.to_string(), "store://alice/report.pdf");
    }

    #[test]
    fn test_parse_rejects_foreign_and_traversal() {
        assert!(ObjectRef::parse("https://example.com/a.png").is_err());
        assert!(ObjectRef::parse("store://alice").is_err());
        assert!(ObjectRef::parse("store://../etc").is_err());
        assert!(ObjectRef::parse("store://alice/../../passwd").is_err());
        assert!(ObjectRef::parse("store:///x").is_err());
    }

    #[test]
    fn test_plain_user_ids_are_their_own_namespace() {
        assert_eq!(namespace_for("alice"), "alice");
        assert_eq!(namespace_for("user-42.eu"), "user-42.eu");
    }

    #[test]
    fn test_other_user_ids_are_hex_encoded() {
        let email = namespace_for("carol@example.com");
        assert_eq!(email, format!("_{}", hex::encode("carol@example.com")));
        assert!(ObjectRef::for_user("carol@example.com", "obj").is_ok());

        // A literal id shaped like an encoded one cannot claim its namespace
        assert_ne!(namespace_for(&email), email);
        assert_ne!(namespace_for(".."), "..");
        assert!(ObjectRef::for_user("..", "obj").is_ok());
    }

    #[test]
    fn test_ownership_follows_namespace() {
        let object = ObjectRef::for_user("carol@example.com", "obj").unwrap();
        assert!(object.is_owned_by("carol@example.com"));
        assert!(!object.is_owned_by("carol"));
        assert!(!ObjectRef::parse("store://bob/obj").unwrap().is_owned_by("alice"));
    }
}
