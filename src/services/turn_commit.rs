// ABOUTME: Persists a finished turn: appends new pairs or regenerates in place
// ABOUTME: Retries transient store failures and raises the commit-failure signal when retries run out
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::database::{retry_transaction, ChatStore, Regeneration, RetryExhausted, RetryPolicy};
use crate::errors::{AppError, ChatError};
use crate::logging::ChatLogger;
use crate::models::time::next_after;
use crate::models::{TurnMetadata, TurnPart, TurnRecord, TurnRole};
use crate::services::turn_streamer::StreamSummary;

/// How a finished turn is persisted
#[derive(Debug, Clone)]
pub enum CommitPlan {
    /// Append the user turn and the reply
    Append {
        /// User turn, stamped before streaming started
        user_turn: TurnRecord,
    },
    /// Replace `target_turn_id` and everything after it
    Regenerate {
        /// Turn being regenerated
        target_turn_id: String,
        /// Stored role of the target
        target_role: TurnRole,
        /// New content of a user target
        user_parts: Option<Vec<TurnPart>>,
    },
    /// Nothing is stored
    ReadOnly,
}

/// Result of a commit
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Turns written by this commit, in order
    pub turns: Vec<TurnRecord>,
    /// Whether anything was stored
    pub persisted: bool,
    /// Turns removed by a regeneration
    pub removed_turns: u64,
}

/// Who is committing where
#[derive(Debug, Clone, Copy)]
pub struct CommitTarget<'a> {
    /// Resolved conversation
    pub conversation_id: &'a str,
    /// Caller; owns the resolved conversation when it is writable
    pub user_id: &'a str,
    /// Model that produced the reply
    pub model: Option<&'a str>,
}

/// Turn committer
pub struct TurnCommitter<'a> {
    store: &'a dyn ChatStore,
    policy: RetryPolicy,
    failures: &'a AtomicU64,
}

impl<'a> TurnCommitter<'a> {
    /// Committer retrying with `policy` and counting exhausted commits in `failures`
    #[must_use]
    pub const fn new(store: &'a dyn ChatStore, policy: RetryPolicy, failures: &'a AtomicU64) -> Self {
        Self {
            store,
            policy,
            failures,
        }
    }

    /// Persist the outcome of a stream
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::CommitFailed`] when every attempt failed
    pub async fn commit(
        &self,
        target: CommitTarget<'_>,
        plan: CommitPlan,
        summary: &StreamSummary,
        now: DateTime<Utc>,
    ) -> Result<CommitOutcome, ChatError> {
        let outcome = match plan {
            CommitPlan::ReadOnly => CommitOutcome::default(),
            CommitPlan::Append { user_turn } => {
                let assistant = assistant_turn(
                    target,
                    summary,
                    next_after(now, Some(user_turn.created_at)),
                );
                let turns = vec![user_turn, assistant];
                let batch = &turns;
                retry_transaction(
                    move || {
                        self.store
                            .append_turns(target.conversation_id, target.user_id, batch)
                    },
                    self.policy,
                )
                .await
                .map_err(|exhausted| self.fail(target, exhausted))?;

                CommitOutcome {
                    turns,
                    persisted: true,
                    removed_turns: 0,
                }
            }
            CommitPlan::Regenerate {
                target_turn_id,
                target_role,
                user_parts,
            } => {
                let (target_id, parts) = (&target_turn_id, &user_parts);
                // Stamp read and regeneration are retried together
                let attempt = move || async move {
                    let last = self.store.last_turn_at(target.conversation_id).await?;
                    let regeneration = Regeneration {
                        conversation_id: target.conversation_id.to_owned(),
                        owner_id: target.user_id.to_owned(),
                        target_turn_id: target_id.clone(),
                        target_role,
                        user_parts: parts.clone(),
                        assistant_turn: assistant_turn(target, summary, next_after(now, last)),
                    };
                    let result = self.store.regenerate(&regeneration).await?;
                    Ok::<_, AppError>((result, regeneration))
                };
                let (result, regeneration) = retry_transaction(attempt, self.policy)
                    .await
                    .map_err(|exhausted| self.fail(target, exhausted))?;

                ChatLogger::log_regeneration(
                    target.user_id,
                    target.conversation_id,
                    &regeneration.target_turn_id,
                    target_role,
                    result.removed_turns,
                );

                let mut turns: Vec<TurnRecord> = result.updated_user_turn.into_iter().collect();
                turns.push(regeneration.assistant_turn);
                CommitOutcome {
                    turns,
                    persisted: true,
                    removed_turns: result.removed_turns,
                }
            }
        };

        ChatLogger::log_commit(
            target.user_id,
            target.conversation_id,
            &summary.finish_reason,
            summary.usage,
            outcome.persisted,
        );
        Ok(outcome)
    }

    fn fail(&self, target: CommitTarget<'_>, exhausted: RetryExhausted) -> ChatError {
        self.failures.fetch_add(1, Ordering::Relaxed);
        ChatLogger::log_commit_failed(
            target.user_id,
            target.conversation_id,
            exhausted.attempts,
            &exhausted.error.to_string(),
        );
        ChatError::CommitFailed {
            attempts: exhausted.attempts,
            source: exhausted.error,
        }
    }
}

fn assistant_turn(
    target: CommitTarget<'_>,
    summary: &StreamSummary,
    created_at: DateTime<Utc>,
) -> TurnRecord {
    TurnRecord {
        id: Uuid::new_v4().to_string(),
        conversation_id: target.conversation_id.to_owned(),
        author_id: target.user_id.to_owned(),
        role: TurnRole::Assistant,
        parts: summary.assistant_parts(),
        metadata: TurnMetadata {
            usage: Some(summary.usage),
            vote: None,
            model: target.model.map(str::to_owned),
            finish_reason: Some(summary.finish_reason.clone()),
        },
        created_at,
    }
}
