// ABOUTME: Validates inbound user turns and merges them with stored history
// ABOUTME: Converts the merged transcript into model messages with attachments and tool calls
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Transcript preparation
//!
//! Validation is read-only: it inspects every part of the inbound turn,
//! collects one [`ValidationIssue`] per offending part and never writes. The
//! pipeline validates before resolving the conversation, so a rejected turn
//! leaves the store untouched.

use crate::constants::media_types;
use crate::errors::{ChatError, ValidationIssue};
use crate::llm::{Attachment, ChatMessage, ToolCall};
use crate::models::{InboundTurn, TurnPart, TurnRecord, TurnRole};
use crate::storage::{ObjectRef, ObjectStorage};

/// One turn of the transcript sent to the model
#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptTurn {
    /// Author role
    pub role: TurnRole,
    /// Ordered content
    pub parts: Vec<TurnPart>,
}

/// An inbound turn that passed validation
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedTurn {
    parts: Vec<TurnPart>,
}

impl ValidatedTurn {
    /// Validated parts, in submission order
    #[must_use]
    pub fn parts(&self) -> &[TurnPart] {
        &self.parts
    }

    /// Number of file parts
    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.parts.iter().filter(|part| part.is_file()).count() as u64
    }

    /// Take ownership of the parts
    #[must_use]
    pub fn into_parts(self) -> Vec<TurnPart> {
        self.parts
    }
}

/// Transcript preparer
pub struct TranscriptPreparer<'a> {
    storage: &'a dyn ObjectStorage,
    max_text_length: usize,
}

impl<'a> TranscriptPreparer<'a> {
    /// Preparer checking file references against `storage`
    #[must_use]
    pub const fn new(storage: &'a dyn ObjectStorage, max_text_length: usize) -> Self {
        Self {
            storage,
            max_text_length,
        }
    }

    /// Check every part of an inbound user turn submitted by `user_id`
    ///
    /// File parts must reference objects in the caller's own namespace.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Validation`] listing every offending part, or
    /// [`ChatError::Store`] if object storage cannot be queried
    pub async fn validate(
        &self,
        user_id: &str,
        inbound: &InboundTurn,
    ) -> Result<ValidatedTurn, ChatError> {
        if inbound.parts.is_empty() {
            return Err(ChatError::invalid(ValidationIssue::turn(
                "turn must contain at least one part",
            )));
        }

        let mut issues = Vec::new();
        for (index, part) in inbound.parts.iter().enumerate() {
            if let Some(reason) = self.check_part(user_id, part).await? {
                issues.push(ValidationIssue::at(index, reason));
            }
        }

        if issues.is_empty() {
            Ok(ValidatedTurn {
                parts: inbound.parts.clone(),
            })
        } else {
            Err(ChatError::Validation { issues })
        }
    }

    async fn check_part(
        &self,
        user_id: &str,
        part: &TurnPart,
    ) -> Result<Option<String>, ChatError> {
        match part {
            TurnPart::Text { text } => {
                if text.trim().is_empty() {
                    return Ok(Some("text is empty".to_owned()));
                }
                let length = text.chars().count();
                if length > self.max_text_length {
                    return Ok(Some(format!(
                        "text is {length} characters, the limit is {}",
                        self.max_text_length
                    )));
                }
                Ok(None)
            }
            TurnPart::File {
                url, media_type, ..
            } => {
                if !media_types::is_supported(media_type) {
                    return Ok(Some(format!("unsupported media type {media_type}")));
                }
                let Ok(object) = ObjectRef::parse(url) else {
                    return Ok(Some(format!("invalid file reference {url}")));
                };
                if !object.is_owned_by(user_id) {
                    return Ok(Some(format!("file {url} belongs to another user")));
                }
                let status = self.storage.stat(url).await?;
                if status.is_referenceable() {
                    Ok(None)
                } else {
                    Ok(Some(format!("file {url} does not exist")))
                }
            }
            TurnPart::ToolInvocation { .. } => {
                Ok(Some("tool invocations are only allowed on assistant turns".to_owned()))
            }
        }
    }

    /// Validate `inbound` and append it to `prior`
    ///
    /// # Errors
    ///
    /// Same as [`Self::validate`]
    pub async fn prepare(
        &self,
        user_id: &str,
        prior: &[TurnRecord],
        inbound: &InboundTurn,
    ) -> Result<(Vec<TranscriptTurn>, ValidatedTurn), ChatError> {
        let validated = self.validate(user_id, inbound).await?;
        Ok((merge(prior, Some(&validated)), validated))
    }
}

/// Stored history followed by the inbound turn, if any
#[must_use]
pub fn merge(prior: &[TurnRecord], inbound: Option<&ValidatedTurn>) -> Vec<TranscriptTurn> {
    let mut transcript: Vec<TranscriptTurn> = prior
        .iter()
        .map(|turn| TranscriptTurn {
            role: turn.role,
            parts: turn.parts.clone(),
        })
        .collect();
    if let Some(turn) = inbound {
        transcript.push(TranscriptTurn {
            role: TurnRole::User,
            parts: turn.parts.clone(),
        });
    }
    transcript
}

/// Model messages for a transcript, led by the system context
///
/// Text parts are joined with newlines, file parts become attachments, and
/// tool invocations become tool calls on the assistant message followed by
/// one tool message per recorded result.
#[must_use]
pub fn build_model_messages(system_context: &str, transcript: &[TranscriptTurn]) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(transcript.len() + 1);
    if !system_context.trim().is_empty() {
        messages.push(ChatMessage::system(system_context));
    }

    for turn in transcript {
        let mut texts = Vec::new();
        let mut attachments = Vec::new();
        let mut tool_calls = Vec::new();
        let mut tool_results = Vec::new();

        for part in &turn.parts {
            match part {
                TurnPart::Text { text } => texts.push(text.as_str()),
                TurnPart::File {
                    url,
                    media_type,
                    name,
                } => attachments.push(Attachment {
                    url: url.clone(),
                    media_type: media_type.clone(),
                    name: name.clone(),
                }),
                TurnPart::ToolInvocation {
                    call_id,
                    tool_name,
                    arguments,
                    result,
                } => {
                    tool_calls.push(ToolCall {
                        call_id: call_id.clone(),
                        tool_name: tool_name.clone(),
                        arguments: arguments.clone(),
                    });
                    if let Some(result) = result {
                        tool_results.push(ChatMessage::tool_result(call_id, result.to_string()));
                    }
                }
            }
        }

        let content = texts.join("\n");
        let message = match turn.role {
            TurnRole::User => ChatMessage::user(content).with_attachments(attachments),
            TurnRole::Assistant => ChatMessage::assistant(content)
                .with_attachments(attachments)
                .with_tool_calls(tool_calls),
        };
        messages.push(message);
        messages.extend(tool_results);
    }

    messages
}
