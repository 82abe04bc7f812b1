// ABOUTME: Conversation management outside the turn pipeline
// ABOUTME: Listing, reading, renaming, sharing, deleting conversations and voting on replies
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::chat::{DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
use crate::database::ChatStore;
use crate::errors::{AppResult, ChatError, ValidationIssue};
use crate::models::{
    ConversationRecord, ConversationSummary, TurnMetadata, TurnRecord, TurnRole, Visibility, Vote,
};

/// A conversation with its ordered turns
#[derive(Debug, Clone, Serialize)]
pub struct ConversationDetail {
    /// Conversation row
    pub conversation: ConversationRecord,
    /// Turns in storage order
    pub turns: Vec<TurnRecord>,
}

/// Owner-facing conversation operations
pub struct ConversationService<'a> {
    store: &'a dyn ChatStore,
    title_max_length: usize,
}

impl<'a> ConversationService<'a> {
    /// Service over `store`
    #[must_use]
    pub const fn new(store: &'a dyn ChatStore, title_max_length: usize) -> Self {
        Self {
            store,
            title_max_length,
        }
    }

    /// Caller's conversations, most recently updated first
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails
    pub async fn list(
        &self,
        owner_id: &str,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> AppResult<Vec<ConversationSummary>> {
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        let offset = offset.unwrap_or(0).max(0);
        self.store.list_conversations(owner_id, limit, offset).await
    }

    /// Conversation and turns, for the owner or anyone when public
    ///
    /// # Errors
    ///
    /// [`ChatError::NotFound`] or [`ChatError::AccessDenied`]
    pub async fn get(
        &self,
        caller_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationDetail, ChatError> {
        let conversation = self.find(conversation_id).await?;
        if !conversation.is_readable_by(caller_id) {
            return Err(ChatError::access_denied(format!(
                "Conversation {conversation_id} is private"
            )));
        }
        let turns = self.store.get_turns(conversation_id).await?;
        Ok(ConversationDetail {
            conversation,
            turns,
        })
    }

    /// Rename a conversation
    ///
    /// # Errors
    ///
    /// Validation, not-found, or access errors
    pub async fn rename(
        &self,
        caller_id: &str,
        conversation_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> Result<ConversationRecord, ChatError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ChatError::invalid(ValidationIssue::turn("title is empty")));
        }
        if title.chars().count() > self.title_max_length {
            return Err(ChatError::invalid(ValidationIssue::turn(format!(
                "title is longer than {} characters",
                self.title_max_length
            ))));
        }

        self.owned(caller_id, conversation_id).await?;
        if !self
            .store
            .update_title(conversation_id, caller_id, title, now)
            .await?
        {
            return Err(ChatError::not_found(format!("Conversation {conversation_id}")));
        }
        self.find(conversation_id).await
    }

    /// Change who may read a conversation
    ///
    /// # Errors
    ///
    /// Not-found or access errors
    pub async fn set_visibility(
        &self,
        caller_id: &str,
        conversation_id: &str,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> Result<ConversationRecord, ChatError> {
        self.owned(caller_id, conversation_id).await?;
        if !self
            .store
            .update_visibility(conversation_id, caller_id, visibility, now)
            .await?
        {
            return Err(ChatError::not_found(format!("Conversation {conversation_id}")));
        }
        self.find(conversation_id).await
    }

    /// Delete a conversation and its turns
    ///
    /// # Errors
    ///
    /// Not-found or access errors
    pub async fn delete(&self, caller_id: &str, conversation_id: &str) -> Result<(), ChatError> {
        self.owned(caller_id, conversation_id).await?;
        if self
            .store
            .delete_conversation(conversation_id, caller_id)
            .await?
        {
            Ok(())
        } else {
            Err(ChatError::not_found(format!("Conversation {conversation_id}")))
        }
    }

    /// Set or clear the vote on an assistant turn
    ///
    /// # Errors
    ///
    /// Not-found or access errors, or a validation error for user turns
    pub async fn vote(
        &self,
        caller_id: &str,
        conversation_id: &str,
        turn_id: &str,
        vote: Option<Vote>,
    ) -> Result<TurnRecord, ChatError> {
        self.owned(caller_id, conversation_id).await?;
        let turn = self
            .store
            .get_turn(conversation_id, turn_id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("Turn {turn_id}")))?;
        if turn.role != TurnRole::Assistant {
            return Err(ChatError::invalid(ValidationIssue::turn(
                "only assistant turns can be voted on",
            )));
        }

        self.store
            .set_vote(conversation_id, caller_id, turn_id, vote)
            .await?;
        Ok(TurnRecord {
            metadata: TurnMetadata {
                vote,
                ..turn.metadata
            },
            ..turn
        })
    }

    async fn find(&self, conversation_id: &str) -> Result<ConversationRecord, ChatError> {
        self.store
            .get_conversation(conversation_id)
            .await?
            .ok_or_else(|| ChatError::not_found(format!("Conversation {conversation_id}")))
    }

    async fn owned(
        &self,
        caller_id: &str,
        conversation_id: &str,
    ) -> Result<ConversationRecord, ChatError> {
        let conversation = self.find(conversation_id).await?;
        if conversation.is_owned_by(caller_id) {
            Ok(conversation)
        } else {
            Err(ChatError::access_denied(format!(
                "Only the owner may modify conversation {conversation_id}"
            )))
        }
    }
}
