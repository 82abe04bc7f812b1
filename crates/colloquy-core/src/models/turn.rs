// ABOUTME: Turn record types: role, tagged content parts, metadata and the inbound turn payload
// ABOUTME: Turns order within a conversation by (created_at, id) ascending
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::AppError;

/// Author role of a stored turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    /// Human input
    User,
    /// Model output
    Assistant,
}

impl TurnRole {
    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for TurnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TurnRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            other => Err(AppError::invalid_input(format!("Unknown turn role: {other}"))),
        }
    }
}

/// One piece of turn content
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnPart {
    /// Plain text
    Text {
        /// Text content
        text: String,
    },
    /// Reference to an uploaded or generated object
    File {
        /// Object storage URL
        url: String,
        /// MIME type
        media_type: String,
        /// Display name
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Tool call requested by the model
    ToolInvocation {
        /// Provider call identifier
        call_id: String,
        /// Tool name
        tool_name: String,
        /// Arguments as sent by the model
        arguments: Value,
        /// Tool output, when one was recorded
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
    },
}

impl TurnPart {
    /// Text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// File part without a display name
    #[must_use]
    pub fn file(url: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self::File {
            url: url.into(),
            media_type: media_type.into(),
            name: None,
        }
    }

    /// Whether this is a file reference
    #[must_use]
    pub const fn is_file(&self) -> bool {
        matches!(self, Self::File { .. })
    }

    /// Text body for text parts
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::File { .. } | Self::ToolInvocation { .. } => None,
        }
    }
}

/// Thumbs up or down on an assistant turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    /// Positive feedback
    Up,
    /// Negative feedback
    Down,
}

/// Token usage for one model invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Prompt tokens
    pub input_tokens: u64,
    /// Completion tokens
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Sum of prompt and completion tokens
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }
}

/// Mutable-by-vote metadata attached to a turn
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnMetadata {
    /// Token usage of the invocation that produced the turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Caller feedback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote: Option<Vote>,
    /// Model that produced the turn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Why generation stopped (`stop`, `length`, `error`, `timeout`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Database representation of a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    /// Unique turn ID
    pub id: String,
    /// Conversation the turn belongs to
    pub conversation_id: String,
    /// User who authored the turn (the requester for assistant turns)
    pub author_id: String,
    /// Author role
    pub role: TurnRole,
    /// Ordered content
    pub parts: Vec<TurnPart>,
    /// Usage, vote and finish metadata
    pub metadata: TurnMetadata,
    /// Creation instant; primary ordering key
    pub created_at: DateTime<Utc>,
}

impl TurnRecord {
    /// Concatenated text of every text part
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(TurnPart::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// The user message submitted with a chat request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InboundTurn {
    /// Ordered content
    #[serde(default)]
    pub parts: Vec<TurnPart>,
}

impl InboundTurn {
    /// Turn holding a single text part
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![TurnPart::text(text)],
        }
    }

    /// Number of file parts, used for file quota accounting
    #[must_use]
    pub fn file_count(&self) -> u64 {
        self.parts.iter().filter(|part| part.is_file()).count() as u64
    }

    /// First text part, if any
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.parts.iter().find_map(TurnPart::as_text)
    }
}

/// What a chat request asks the pipeline to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatTrigger {
    /// Append a new user turn and its reply
    #[default]
    #[serde(alias = "NEW", alias = "submit-message")]
    New,
    /// Replace an existing turn and everything after it
    #[serde(alias = "REGENERATE", alias = "regenerate-message")]
    Regenerate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_parts_use_tagged_wire_format() {
        let json = serde_json::json!([
            { "type": "text", "text": "hi" },
            { "type": "file", "url": "mem://a.png", "media_type": "image/png" },
            { "type": "tool_invocation", "call_id": "c1", "tool_name": "search", "arguments": {"q": "x"} }
        ]);
        let parts: Vec<TurnPart> = serde_json::from_value(json).unwrap();

        assert_eq!(parts[0], TurnPart::text("hi"));
        assert!(parts[1].is_file());
        assert!(matches!(
            &parts[2],
            TurnPart::ToolInvocation { tool_name, result: None, .. } if tool_name == "search"
        ));
    }

    #[test]
    fn test_inbound_turn_counts_files() {
        let turn = InboundTurn {
            parts: vec![
                TurnPart::text("look"),
                TurnPart::file("a", "image/png"),
                TurnPart::file("b", "application/pdf"),
            ],
        };
        assert_eq!(turn.file_count(), 2);
        assert_eq!(turn.first_text(), Some("look"));
    }

    #[test]
    fn test_trigger_accepts_upper_case_aliases() {
        let trigger: ChatTrigger = serde_json::from_str("\"REGENERATE\"").unwrap();
        assert_eq!(trigger, ChatTrigger::Regenerate);
        let trigger: ChatTrigger = serde_json::from_str("\"new\"").unwrap();
        assert_eq!(trigger, ChatTrigger::New);
    }
}
