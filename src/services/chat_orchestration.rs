// ABOUTME: Runs one chat turn through admission, resolution, transcript, streaming and commit
// ABOUTME: Pre-stream failures return errors; later outcomes are delivered as turn events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat turn orchestration
//!
//! [`ChatOrchestrator::start_turn`] runs every stage that can reject a
//! request inline, so admission, access, validation and lookup failures come
//! back as a plain [`ChatError`] before anything is streamed. Once the
//! transcript is ready the rest of the turn runs in a spawned task that owns
//! its own handle on the shared resources. The client only sees what that
//! task relays; disconnecting does not stop it from committing.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{trace, warn};
use uuid::Uuid;

use crate::constants::chat::STREAM_CHANNEL_CAPACITY;
use crate::database::RetryPolicy;
use crate::errors::{AppError, ChatError, ErrorCode, ValidationIssue};
use crate::llm::prompts;
use crate::logging::ChatLogger;
use crate::models::time::{self, next_after};
use crate::models::{
    ChatTrigger, Identity, InboundTurn, QuotaSnapshot, TokenUsage, TurnMetadata, TurnRecord,
    TurnRole,
};
use crate::resources::ServerResources;
use crate::services::admission::{AdmissionController, QuotaCharge};
use crate::services::conversation_resolver::{
    Access, ConversationResolver, Resolution, ResolveRequest,
};
use crate::services::transcript::{build_model_messages, merge, TranscriptPreparer, TranscriptTurn};
use crate::services::turn_commit::{CommitPlan, CommitTarget, TurnCommitter};
use crate::services::turn_streamer::{StreamEvent, StreamRequest, TurnStreamer};

// ============================================================================
// Request / Event Types
// ============================================================================

/// Caller preferences for one turn
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatPreferences {
    /// Model override
    #[serde(default)]
    pub model: Option<String>,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Locale the reply should be written for
    #[serde(default)]
    pub locale: Option<String>,
}

/// Body of `POST /api/chat`
#[derive(Debug, Clone, Deserialize)]
pub struct ChatTurnRequest {
    /// Conversation to continue or create
    pub conversation_id: String,
    /// Id for the copy when writing to someone else's public conversation
    #[serde(default)]
    pub fork_target_id: Option<String>,
    /// The user's message
    #[serde(default)]
    pub inbound_turn: InboundTurn,
    /// New turn or regeneration
    #[serde(default)]
    pub trigger: ChatTrigger,
    /// Turn to regenerate
    #[serde(default)]
    pub regenerate_target_turn_id: Option<String>,
    /// Caller preferences
    #[serde(default)]
    pub preferences: ChatPreferences,
}

/// Event sent to the client while a turn runs
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// First event: where the turn is written
    Conversation {
        /// Resolved conversation; differs from the requested id after a fork
        conversation_id: String,
        /// Caller's access
        access: Access,
    },
    /// Text fragment
    Delta {
        /// Fragment text
        text: String,
    },
    /// Tool call requested by the model
    ToolCall {
        /// Provider call id
        call_id: String,
        /// Tool name
        tool_name: String,
        /// Arguments
        arguments: Value,
    },
    /// Turn is finished and durable
    Finish {
        /// Why generation stopped
        finish_reason: String,
        /// Token usage of the reply
        usage: TokenUsage,
        /// Turns written by this request
        turns: Vec<TurnRecord>,
        /// Caller's quota after charging
        #[serde(skip_serializing_if = "Option::is_none")]
        quota: Option<QuotaSnapshot>,
    },
    /// Stream or commit failure
    Error {
        /// Machine-readable code
        code: ErrorCode,
        /// Description
        message: String,
    },
}

impl TurnEvent {
    fn from_app_error(error: &AppError) -> Self {
        Self::Error {
            code: error.code,
            message: error.message.clone(),
        }
    }

    fn from_chat_error(error: &ChatError) -> Self {
        Self::Error {
            code: error.code(),
            message: error.to_string(),
        }
    }
}

/// Output of the trigger-specific pre-stream stages
struct Staged {
    transcript: Vec<TranscriptTurn>,
    resolution: Resolution,
    plan: CommitPlan,
    files: u64,
}

/// Everything the streaming task needs once the pre-stream stages passed
struct PreparedTurn {
    resolution: Resolution,
    plan: CommitPlan,
    stream: StreamRequest,
    model: String,
    files: u64,
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Chat turn orchestrator
pub struct ChatOrchestrator {
    resources: Arc<ServerResources>,
}

impl ChatOrchestrator {
    /// Orchestrator over the shared resources
    #[must_use]
    pub const fn new(resources: Arc<ServerResources>) -> Self {
        Self { resources }
    }

    /// Run the pre-stream stages and start the turn
    ///
    /// Returns the receiver of the turn's events. The first event names the
    /// resolved conversation; the last is `finish` or `error`.
    ///
    /// # Errors
    ///
    /// Returns the first pre-stream failure: admission, validation, access,
    /// lookup, or conversation create/fork
    pub async fn start_turn(
        &self,
        identity: Identity,
        request: ChatTurnRequest,
    ) -> Result<mpsc::Receiver<TurnEvent>, ChatError> {
        let now = time::now();
        let admission =
            AdmissionController::new(self.resources.quota.as_ref(), &self.resources.config.quota);
        admission.admit(&identity, &request.inbound_turn, now).await?;
        if request.conversation_id.trim().is_empty() {
            return Err(ChatError::invalid(ValidationIssue::turn(
                "conversation_id must not be blank",
            )));
        }

        let Staged {
            transcript,
            resolution,
            plan,
            files,
        } = match request.trigger {
            ChatTrigger::New => self.prepare_new(&identity, &request, now).await?,
            ChatTrigger::Regenerate => self.prepare_regeneration(&identity, &request, now).await?,
        };

        let model = request
            .preferences
            .model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.resources.model.default_model().to_owned());
        let system_context = self.system_context(&request.preferences);
        let stream = StreamRequest {
            messages: build_model_messages(&system_context, &transcript),
            tools: self.resources.tools.definitions().to_vec(),
            model: Some(model.clone()),
            temperature: request.preferences.temperature,
        };

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let turn = PreparedTurn {
            resolution,
            plan,
            stream,
            model,
            files,
        };
        tokio::spawn(run_turn(Arc::clone(&self.resources), identity, turn, tx));
        Ok(rx)
    }

    async fn prepare_new(
        &self,
        identity: &Identity,
        request: &ChatTurnRequest,
        now: DateTime<Utc>,
    ) -> Result<Staged, ChatError> {
        let resources = &self.resources;
        let preparer =
            TranscriptPreparer::new(resources.storage.as_ref(), resources.config.chat.max_text_length);
        // Validation first: a rejected turn must not create or fork anything
        let validated = preparer
            .validate(&identity.user_id, &request.inbound_turn)
            .await?;

        let resolution = self
            .resolver()
            .resolve(
                identity,
                ResolveRequest {
                    conversation_id: &request.conversation_id,
                    fork_target_id: request.fork_target_id.as_deref(),
                    trigger: ChatTrigger::New,
                    inbound: &request.inbound_turn,
                },
                now,
            )
            .await?;

        let prior = resources.store.get_turns(&resolution.conversation_id).await?;
        let transcript = merge(&prior, Some(&validated));
        let files = validated.file_count();

        let plan = if resolution.access.is_writable() {
            CommitPlan::Append {
                user_turn: TurnRecord {
                    id: Uuid::new_v4().to_string(),
                    conversation_id: resolution.conversation_id.clone(),
                    author_id: identity.user_id.clone(),
                    role: TurnRole::User,
                    parts: validated.into_parts(),
                    metadata: TurnMetadata::default(),
                    created_at: next_after(now, prior.last().map(|turn| turn.created_at)),
                },
            }
        } else {
            CommitPlan::ReadOnly
        };

        Ok(Staged {
            transcript,
            resolution,
            plan,
            files,
        })
    }

    async fn prepare_regeneration(
        &self,
        identity: &Identity,
        request: &ChatTurnRequest,
        now: DateTime<Utc>,
    ) -> Result<Staged, ChatError> {
        let resources = &self.resources;
        let target_id = request
            .regenerate_target_turn_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                ChatError::invalid(ValidationIssue::turn(
                    "regenerate_target_turn_id is required for regeneration",
                ))
            })?;

        // Regeneration never creates a conversation
        if resources
            .store
            .get_conversation(&request.conversation_id)
            .await?
            .is_none()
        {
            return Err(ChatError::not_found(format!(
                "Conversation {}",
                request.conversation_id
            )));
        }

        let resolution = self
            .resolver()
            .resolve(
                identity,
                ResolveRequest {
                    conversation_id: &request.conversation_id,
                    fork_target_id: None,
                    trigger: ChatTrigger::Regenerate,
                    inbound: &request.inbound_turn,
                },
                now,
            )
            .await?;
        let turns = resources.store.get_turns(&resolution.conversation_id).await?;
        let position = turns
            .iter()
            .position(|turn| turn.id == target_id)
            .ok_or_else(|| ChatError::not_found(format!("Turn {target_id}")))?;
        let (prior, rest) = turns.split_at(position);
        let target_role = rest
            .first()
            .map_or(TurnRole::Assistant, |target| target.role);

        let (transcript, user_parts, files) = match target_role {
            TurnRole::User => {
                let preparer = TranscriptPreparer::new(
                    resources.storage.as_ref(),
                    resources.config.chat.max_text_length,
                );
                let validated = preparer
            .validate(&identity.user_id, &request.inbound_turn)
            .await?;
                let transcript = merge(prior, Some(&validated));
                let files = validated.file_count();
                (transcript, Some(validated.into_parts()), files)
            }
            TurnRole::Assistant => (merge(prior, None), None, 0),
        };

        // A shared conversation is only read: the reply streams and nothing is replaced
        let plan = if resolution.access.is_writable() {
            CommitPlan::Regenerate {
                target_turn_id: target_id.to_owned(),
                target_role,
                user_parts,
            }
        } else {
            CommitPlan::ReadOnly
        };
        Ok(Staged {
            transcript,
            resolution,
            plan,
            files,
        })
    }

    fn resolver(&self) -> ConversationResolver<'_> {
        ConversationResolver::new(
            self.resources.store.as_ref(),
            self.resources.storage.as_ref(),
            self.resources.config.chat.title_max_length,
        )
    }

    fn system_context(&self, preferences: &ChatPreferences) -> String {
        let base = prompts::system_prompt(self.resources.config.chat.system_prompt.as_deref());
        match preferences
            .locale
            .as_deref()
            .map(str::trim)
            .filter(|locale| !locale.is_empty())
        {
            Some(locale) => format!("{base}\n\nWrite replies for the locale {locale}."),
            None => base.to_owned(),
        }
    }
}

/// Tokens billed for a reply
#[must_use]
pub const fn billed_tokens(usage: TokenUsage, charge_input_tokens: bool) -> u64 {
    if charge_input_tokens {
        usage.total()
    } else {
        usage.output_tokens
    }
}

async fn emit(tx: &mpsc::Sender<TurnEvent>, event: TurnEvent) {
    if tx.send(event).await.is_err() {
        trace!("Client gone, turn continues without relaying");
    }
}

async fn run_turn(
    resources: Arc<ServerResources>,
    identity: Identity,
    turn: PreparedTurn,
    tx: mpsc::Sender<TurnEvent>,
) {
    let conversation_id = turn.resolution.conversation_id;
    emit(
        &tx,
        TurnEvent::Conversation {
            conversation_id: conversation_id.clone(),
            access: turn.resolution.access,
        },
    )
    .await;

    let config = &resources.config.chat;
    let streamer = TurnStreamer::new(Arc::clone(&resources.model), config.stream_max_duration);
    let mut stream = streamer.start(turn.stream);

    let mut terminal = None;
    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Delta { text } => emit(&tx, TurnEvent::Delta { text }).await,
            StreamEvent::ToolCall(call) => {
                emit(
                    &tx,
                    TurnEvent::ToolCall {
                        call_id: call.call_id,
                        tool_name: call.tool_name,
                        arguments: call.arguments,
                    },
                )
                .await;
            }
            StreamEvent::Completed(summary) => terminal = Some((summary, None)),
            StreamEvent::Failed { error, summary } => terminal = Some((summary, Some(error))),
        }
    }

    let Some((summary, failure)) = terminal else {
        emit(
            &tx,
            TurnEvent::from_app_error(&AppError::internal("Model stream ended without a result")),
        )
        .await;
        return;
    };

    if let Some(error) = failure {
        ChatLogger::log_stream_failure(&conversation_id, summary.emitted_any, &error.message);
        emit(&tx, TurnEvent::from_app_error(&error)).await;
        // Nothing was produced: nothing to store and nothing to charge
        if !summary.emitted_any {
            return;
        }
    }

    let now = time::now();
    let committer = TurnCommitter::new(
        resources.store.as_ref(),
        RetryPolicy::new(config.commit_max_attempts, config.commit_retry_base_delay),
        &resources.commit_failures,
    );
    let target = CommitTarget {
        conversation_id: &conversation_id,
        user_id: &identity.user_id,
        model: Some(&turn.model),
    };

    match committer.commit(target, turn.plan, &summary, now).await {
        Ok(outcome) => {
            let quota_config = &resources.config.quota;
            let admission = AdmissionController::new(resources.quota.as_ref(), quota_config);
            let charge = QuotaCharge {
                messages: 1,
                tokens: billed_tokens(summary.usage, quota_config.charge_input_tokens),
                files: turn.files,
            };
            admission.charge(&identity.user_id, charge, now).await;

            let quota = match admission.snapshot(&identity, now).await {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    warn!(user.id = %identity.user_id, error = %e, "Failed to read quota snapshot");
                    None
                }
            };
            emit(
                &tx,
                TurnEvent::Finish {
                    finish_reason: summary.finish_reason,
                    usage: summary.usage,
                    turns: outcome.turns,
                    quota,
                },
            )
            .await;
        }
        Err(error) => emit(&tx, TurnEvent::from_chat_error(&error)).await,
    }
}
