// ABOUTME: Resolves which conversation a chat turn writes to and with what access
// ABOUTME: Creates missing conversations, forks shared ones on write, and derives titles
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Conversation resolution
//!
//! Rules are evaluated in a fixed order and the first match wins:
//!
//! 1. unknown id: create it for the caller
//! 2. caller owns it: use it
//! 3. private and not owned: access denied
//! 4. public, not owned, new turn with a distinct fork target: fork
//! 5. otherwise: read-only (the reply streams but no turn is stored)

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::constants::chat::DEFAULT_TITLE;
use crate::database::ChatStore;
use crate::errors::{AppError, ChatError};
use crate::logging::ChatLogger;
use crate::models::time::next_after;
use crate::models::{
    ChatTrigger, ConversationRecord, Identity, InboundTurn, TurnMetadata, TurnPart, TurnRecord,
    Visibility,
};
use crate::storage::ObjectStorage;

/// How the caller may use the resolved conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    /// Created by this request
    Created,
    /// Caller is the owner
    Owner,
    /// Copied from a shared conversation into a new one owned by the caller
    Forked,
    /// Shared conversation the caller may read but not write
    ReadOnly,
}

impl Access {
    /// Whether turns may be persisted
    #[must_use]
    pub const fn is_writable(self) -> bool {
        !matches!(self, Self::ReadOnly)
    }
}

/// Result of conversation resolution
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Conversation the turn continues; differs from the requested id after a fork
    pub conversation_id: String,
    /// Caller's access
    pub access: Access,
    /// The resolved conversation
    pub conversation: ConversationRecord,
}

/// Inputs of a resolution
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    /// Requested conversation id
    pub conversation_id: &'a str,
    /// Id for a fork, supplied by clients that want fork-on-write
    pub fork_target_id: Option<&'a str>,
    /// What the request does
    pub trigger: ChatTrigger,
    /// Submitted user turn, used for the title of a new conversation
    pub inbound: &'a InboundTurn,
}

/// Conversation resolver
pub struct ConversationResolver<'a> {
    store: &'a dyn ChatStore,
    storage: &'a dyn ObjectStorage,
    title_max_length: usize,
}

impl<'a> ConversationResolver<'a> {
    /// Resolver writing through `store` and duplicating files in `storage`
    #[must_use]
    pub const fn new(
        store: &'a dyn ChatStore,
        storage: &'a dyn ObjectStorage,
        title_max_length: usize,
    ) -> Self {
        Self {
            store,
            storage,
            title_max_length,
        }
    }

    /// Resolve the conversation a turn belongs to
    ///
    /// # Errors
    ///
    /// - [`ChatError::AccessDenied`] for a private conversation owned by someone else
    /// - [`ChatError::CreateFailed`] / [`ChatError::ForkFailed`] when the write fails
    /// - [`ChatError::Store`] when the lookup itself fails
    pub async fn resolve(
        &self,
        caller: &Identity,
        request: ResolveRequest<'_>,
        now: DateTime<Utc>,
    ) -> Result<Resolution, ChatError> {
        let existing = match self.store.get_conversation(request.conversation_id).await? {
            Some(conversation) => conversation,
            None => {
                let title = derive_title(request.inbound, self.title_max_length);
                let record =
                    ConversationRecord::new(request.conversation_id, &caller.user_id, title, now);
                let create_failed = |source: AppError| ChatError::CreateFailed {
                    conversation_id: request.conversation_id.to_owned(),
                    source,
                };
                match self.store.create_conversation(&record).await {
                    Ok(true) => {
                        return Ok(Resolution {
                            conversation_id: record.id.clone(),
                            access: Access::Created,
                            conversation: record,
                        })
                    }
                    // Lost an insert race; the winner's row decides access below
                    Ok(false) => self
                        .store
                        .get_conversation(request.conversation_id)
                        .await
                        .map_err(create_failed)?
                        .ok_or_else(|| {
                            create_failed(AppError::internal(
                                "Conversation disappeared after a conflicting insert",
                            ))
                        })?,
                    Err(source) => return Err(create_failed(source)),
                }
            }
        };

        if existing.is_owned_by(&caller.user_id) {
            return Ok(Resolution {
                conversation_id: existing.id.clone(),
                access: Access::Owner,
                conversation: existing,
            });
        }

        if existing.visibility == Visibility::Private {
            return Err(ChatError::access_denied(format!(
                "Conversation {} is private",
                existing.id
            )));
        }

        let fork_target = request
            .fork_target_id
            .map(str::trim)
            .filter(|target| !target.is_empty() && *target != existing.id);
        if let (ChatTrigger::New, Some(target_id)) = (request.trigger, fork_target) {
            let (forked, copied) = self
                .fork(&existing, target_id, caller, now)
                .await
                .map_err(|source| ChatError::ForkFailed {
                    source_id: existing.id.clone(),
                    target_id: target_id.to_owned(),
                    source,
                })?;
            ChatLogger::log_fork(&caller.user_id, &existing.id, target_id, copied);
            return Ok(Resolution {
                conversation_id: forked.id.clone(),
                access: Access::Forked,
                conversation: forked,
            });
        }

        Ok(Resolution {
            conversation_id: existing.id.clone(),
            access: Access::ReadOnly,
            conversation: existing,
        })
    }

    /// Copy `source` and its turns into a new private conversation owned by the caller
    async fn fork(
        &self,
        source: &ConversationRecord,
        target_id: &str,
        caller: &Identity,
        now: DateTime<Utc>,
    ) -> Result<(ConversationRecord, usize), AppError> {
        // One read gives a consistent snapshot of the source
        let turns = self.store.get_turns(&source.id).await?;

        let mut copies = Vec::with_capacity(turns.len());
        let mut last = None;
        for turn in turns {
            let mut parts = Vec::with_capacity(turn.parts.len());
            for part in turn.parts {
                parts.push(self.copy_part(part, &caller.user_id).await?);
            }
            let created_at = next_after(turn.created_at, last);
            last = Some(created_at);
            copies.push(TurnRecord {
                id: Uuid::new_v4().to_string(),
                conversation_id: target_id.to_owned(),
                author_id: turn.author_id,
                role: turn.role,
                parts,
                metadata: TurnMetadata {
                    vote: None,
                    ..turn.metadata
                },
                created_at,
            });
        }

        let conversation = ConversationRecord::new(target_id, &caller.user_id, &source.title, now);
        self.store.fork_conversation(&conversation, &copies).await?;
        Ok((conversation, copies.len()))
    }

    async fn copy_part(&self, part: TurnPart, new_owner: &str) -> Result<TurnPart, AppError> {
        match part {
            TurnPart::File {
                url,
                media_type,
                name,
            } => Ok(TurnPart::File {
                url: self.storage.duplicate(&url, new_owner).await?,
                media_type,
                name,
            }),
            other @ (TurnPart::Text { .. } | TurnPart::ToolInvocation { .. }) => Ok(other),
        }
    }
}

/// Title for a new conversation from its first message
///
/// Uses the first text part with whitespace collapsed. Longer text is cut at
/// the last word boundary that fits and marked with an ellipsis.
#[must_use]
pub fn derive_title(inbound: &InboundTurn, max_length: usize) -> String {
    let collapsed = inbound
        .first_text()
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default();

    if collapsed.is_empty() {
        return DEFAULT_TITLE.to_owned();
    }
    if collapsed.chars().count() <= max_length {
        return collapsed;
    }

    let budget = max_length.saturating_sub(1);
    let cut: String = collapsed.chars().take(budget).collect();
    let next_is_space = collapsed.chars().nth(budget) == Some(' ');
    let shortened = if next_is_space {
        cut.as_str()
    } else {
        cut.rsplit_once(' ').map_or(cut.as_str(), |(head, _)| head)
    };
    format!("{}…", shortened.trim_end())
}
