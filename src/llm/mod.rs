// ABOUTME: Model client abstraction for streamed chat completions
// ABOUTME: Defines messages, tool declarations, stream events and the ModelClient trait
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Model client interface
//!
//! The turn streamer talks to a language model through [`ModelClient`]. A
//! completion is a stream of [`ModelEvent`] values: text deltas, tool calls
//! requested by the model, and one `Finished` event carrying the finish
//! reason and, when the upstream reports it, token usage.
//!
//! ```rust,no_run
//! use colloquy_server::llm::{ChatMessage, ChatRequest, ModelClient};
//!
//! async fn example(client: &dyn ModelClient) {
//!     let request = ChatRequest::new(vec![
//!         ChatMessage::system("Be brief."),
//!         ChatMessage::user("Hello"),
//!     ]);
//!     let stream = client.complete_stream(&request).await;
//! }
//! ```

mod openai_compatible;
pub mod prompts;
pub mod sse_parser;

pub use openai_compatible::{OpenAiCompatibleClient, OpenAiCompatibleConfig};

use std::pin::Pin;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::Stream;

use crate::errors::AppError;
use crate::models::TokenUsage;

// ============================================================================
// Message Types
// ============================================================================

/// Author of a model message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Instructions for the model
    System,
    /// Human input
    User,
    /// Model output
    Assistant,
    /// Result of a tool call
    Tool,
}

impl MessageRole {
    /// Wire name of the role
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Reference to a stored file offered to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    /// Storage URL
    pub url: String,
    /// MIME type
    pub media_type: String,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Tool call requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Provider-assigned call id
    pub call_id: String,
    /// Name of the declared tool
    pub tool_name: String,
    /// Arguments as JSON
    pub arguments: Value,
}

/// One message of a model conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author
    pub role: MessageRole,
    /// Text content
    pub content: String,
    /// Files referenced by a user message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
    /// Tool calls made by an assistant message
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// Call answered by a tool message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    /// Message with the given role and text
    #[must_use]
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            attachments: Vec::new(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// System message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    /// User message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    /// Assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }

    /// Tool result answering `call_id`
    #[must_use]
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new(MessageRole::Tool, content)
        }
    }

    /// Attach files
    #[must_use]
    pub fn with_attachments(mut self, attachments: Vec<Attachment>) -> Self {
        self.attachments = attachments;
        self
    }

    /// Record tool calls on an assistant message
    #[must_use]
    pub fn with_tool_calls(mut self, tool_calls: Vec<ToolCall>) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}

// ============================================================================
// Tools
// ============================================================================

/// Tool the model may call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Function name
    pub name: String,
    /// What the tool does
    pub description: String,
    /// JSON schema of the arguments
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

/// Tool declarations offered on every completion
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

impl ToolRegistry {
    /// Empty registry
    #[must_use]
    pub const fn new() -> Self {
        Self { tools: Vec::new() }
    }

    /// Add a declaration, replacing one with the same name
    pub fn register(&mut self, tool: ToolDefinition) {
        self.tools.retain(|t| t.name != tool.name);
        self.tools.push(tool);
    }

    /// All declarations
    #[must_use]
    pub fn definitions(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Whether no tools are declared
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

// ============================================================================
// Request/Stream Types
// ============================================================================

/// Completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    /// Conversation so far, system message first
    pub messages: Vec<ChatMessage>,
    /// Model override
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Output cap
    pub max_tokens: Option<u32>,
    /// Tools offered to the model
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
}

impl ChatRequest {
    /// Request with default settings
    #[must_use]
    pub const fn new(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
            tools: Vec::new(),
        }
    }

    /// Override the model
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the temperature
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Cap output tokens
    #[must_use]
    pub const fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Offer tools
    #[must_use]
    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    /// Characters of prompt text, used to estimate input tokens
    #[must_use]
    pub fn prompt_chars(&self) -> usize {
        self.messages.iter().map(|m| m.content.chars().count()).sum()
    }
}

/// One event of a streamed completion
#[derive(Debug, Clone, PartialEq)]
pub enum ModelEvent {
    /// Text fragment
    Delta(String),
    /// Complete tool call
    ToolCall(ToolCall),
    /// End of the completion
    Finished {
        /// Provider finish reason
        finish_reason: String,
        /// Usage reported by the upstream, if any
        usage: Option<TokenUsage>,
    },
}

/// Stream of completion events
pub type ModelStream = Pin<Box<dyn Stream<Item = Result<ModelEvent, AppError>> + Send>>;

// ============================================================================
// Client Trait
// ============================================================================

/// Streaming language model client
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &str;

    /// Model used when the request does not name one
    fn default_model(&self) -> &str;

    /// Start a streamed completion
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be sent or the upstream rejects it
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ModelStream, AppError>;

    /// Whether the upstream is reachable
    ///
    /// # Errors
    ///
    /// Returns an error if the check itself cannot be performed
    async fn health_check(&self) -> Result<bool, AppError>;
}
