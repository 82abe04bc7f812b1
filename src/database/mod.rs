// ABOUTME: Storage contracts for conversations, turns and quota counters
// ABOUTME: Declares the ChatStore and QuotaStore traits and the SQLite implementation
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Database
//!
//! The turn pipeline only talks to storage through [`ChatStore`] and
//! [`QuotaStore`]. Every write that touches more than one row is a single
//! transaction inside the implementation, so callers never hold a
//! transaction across an await on another collaborator.

/// SQLite implementation of both stores
pub mod sqlite;
/// Retry with exponential backoff for transactional writes
pub mod transactions;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::errors::AppResult;
use crate::models::{
    ConversationRecord, ConversationSummary, QuotaCounter, QuotaResource, TurnPart, TurnRecord,
    TurnRole, Visibility, Vote,
};

pub use sqlite::SqliteDatabase;
pub use transactions::{retry_transaction, RetryExhausted, RetryPolicy};

/// A regeneration applied atomically
#[derive(Debug, Clone)]
pub struct Regeneration {
    /// Conversation being regenerated
    pub conversation_id: String,
    /// Owner predicate for the write
    pub owner_id: String,
    /// Turn whose suffix is replaced
    pub target_turn_id: String,
    /// Stored role of the target turn as observed before streaming
    pub target_role: TurnRole,
    /// Replacement parts for a user target; ignored for assistant targets
    pub user_parts: Option<Vec<TurnPart>>,
    /// The freshly generated assistant turn
    pub assistant_turn: TurnRecord,
}

/// Result of a committed regeneration
#[derive(Debug, Clone)]
pub struct RegenerationOutcome {
    /// Turns removed from the conversation
    pub removed_turns: u64,
    /// The user turn after its parts were replaced, for user targets
    pub updated_user_turn: Option<TurnRecord>,
}

/// Conversation and turn persistence
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Fetch a conversation by id regardless of owner
    async fn get_conversation(&self, conversation_id: &str) -> AppResult<Option<ConversationRecord>>;

    /// Insert a conversation
    ///
    /// Returns `false` when a conversation with the same id already exists;
    /// the existing row is left untouched.
    async fn create_conversation(&self, conversation: &ConversationRecord) -> AppResult<bool>;

    /// Insert a forked conversation together with its copied turns
    ///
    /// All rows are written in one transaction. An existing id is a
    /// `RESOURCE_ALREADY_EXISTS` error.
    async fn fork_conversation(
        &self,
        conversation: &ConversationRecord,
        turns: &[TurnRecord],
    ) -> AppResult<()>;

    /// Conversations owned by `owner_id`, most recently updated first
    async fn list_conversations(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationSummary>>;

    /// Rename a conversation; `false` when no row matched the owner predicate
    async fn update_title(
        &self,
        conversation_id: &str,
        owner_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Change visibility; `visible_at` moves only when the value changes
    async fn update_visibility(
        &self,
        conversation_id: &str,
        owner_id: &str,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> AppResult<bool>;

    /// Delete a conversation and its turns
    async fn delete_conversation(&self, conversation_id: &str, owner_id: &str) -> AppResult<bool>;

    /// All turns of a conversation in `(created_at, id)` order
    async fn get_turns(&self, conversation_id: &str) -> AppResult<Vec<TurnRecord>>;

    /// A single turn of a conversation
    async fn get_turn(&self, conversation_id: &str, turn_id: &str) -> AppResult<Option<TurnRecord>>;

    /// Creation time of the newest turn, if any
    async fn last_turn_at(&self, conversation_id: &str) -> AppResult<Option<DateTime<Utc>>>;

    /// Append turns and bump `updated_at` in one transaction
    ///
    /// Fails with `PERMISSION_DENIED` when the owner predicate matches no
    /// conversation row; nothing is written in that case.
    async fn append_turns(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turns: &[TurnRecord],
    ) -> AppResult<()>;

    /// Replace the suffix of a conversation starting at the target turn
    async fn regenerate(&self, regeneration: &Regeneration) -> AppResult<RegenerationOutcome>;

    /// Set or clear the vote on an assistant turn
    async fn set_vote(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turn_id: &str,
        vote: Option<Vote>,
    ) -> AppResult<bool>;
}

/// Rolling-window usage counters
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Current counter row, if the user ever consumed `resource`
    async fn get_counter(&self, user_id: &str, resource: QuotaResource)
        -> AppResult<Option<QuotaCounter>>;

    /// Add `amount` to the counter, opening a new window when the stored one ended
    ///
    /// The reset and the increment are one statement.
    async fn increment(
        &self,
        user_id: &str,
        resource: QuotaResource,
        amount: u64,
        now: DateTime<Utc>,
        window: Duration,
    ) -> AppResult<QuotaCounter>;
}
