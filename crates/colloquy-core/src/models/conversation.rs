// ABOUTME: Conversation record types for database persistence and listing
// ABOUTME: Ownership and visibility decide who may read, continue, or fork a conversation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Who besides the owner may read a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Owner only
    #[default]
    Private,
    /// Readable by anyone; writes by non-owners fork
    Public,
}

impl Visibility {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::Public => "public",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Self::Private),
            "public" => Ok(Self::Public),
            other => Err(AppError::invalid_input(format!(
                "Unknown visibility: {other}"
            ))),
        }
    }
}

/// Database representation of a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationRecord {
    /// Unique conversation ID (client supplied, immutable)
    pub id: String,
    /// User ID who owns the conversation
    pub owner_id: String,
    /// Conversation title
    pub title: String,
    /// Current visibility
    pub visibility: Visibility,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// Bumped after every committed turn and every owner edit
    pub updated_at: DateTime<Utc>,
    /// When the current visibility took effect
    pub visible_at: DateTime<Utc>,
}

impl ConversationRecord {
    /// New private conversation owned by `owner_id`
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            visibility: Visibility::Private,
            created_at: now,
            updated_at: now,
            visible_at: now,
        }
    }

    /// Whether `user_id` owns this conversation
    #[must_use]
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    /// Whether `user_id` may read this conversation
    #[must_use]
    pub fn is_readable_by(&self, user_id: &str) -> bool {
        self.is_owned_by(user_id) || self.visibility == Visibility::Public
    }
}

/// Summary of a conversation for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Conversation ID
    pub id: String,
    /// Conversation title
    pub title: String,
    /// Current visibility
    pub visibility: Visibility,
    /// Number of stored turns
    pub turn_count: i64,
    /// When the conversation was created
    pub created_at: DateTime<Utc>,
    /// When the conversation was last updated
    pub updated_at: DateTime<Utc>,
}
