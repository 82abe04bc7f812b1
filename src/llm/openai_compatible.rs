// ABOUTME: Streaming client for OpenAI-compatible chat completion endpoints
// ABOUTME: Works with Ollama, vLLM, LocalAI and hosted OpenAI-style APIs
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # `OpenAI`-compatible client
//!
//! Sends `POST {base_url}/chat/completions` with `stream: true` and
//! `stream_options.include_usage`, then turns the SSE response into
//! [`ModelEvent`]s. Tool call fragments are accumulated by index and emitted
//! as whole calls before the `Finished` event.

use std::collections::BTreeMap;
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument, warn};

use super::sse_parser::{sse_events, SseEvent};
use super::{ChatMessage, ChatRequest, ModelClient, ModelEvent, ModelStream, ToolCall, ToolDefinition};
use crate::config::LlmConfig;
use crate::constants::{finish_reasons, service_names, timeouts};
use crate::errors::AppError;
use crate::models::TokenUsage;

// ============================================================================
// API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
    stream_options: OpenAiStreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAiTool>>,
}

#[derive(Debug, Serialize)]
struct OpenAiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: OpenAiFunction,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiFunction {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiMessage {
    role: &'static str,
    content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<OpenAiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: &'static str,
    function: OpenAiFunctionCall,
}

#[derive(Debug, Clone, Serialize)]
struct OpenAiFunctionCall {
    name: String,
    arguments: String,
}

impl From<&ChatMessage> for OpenAiMessage {
    fn from(msg: &ChatMessage) -> Self {
        let mut content = msg.content.clone();
        for attachment in &msg.attachments {
            if !content.is_empty() {
                content.push('\n');
            }
            let name = attachment.name.as_deref().unwrap_or("file");
            content.push_str(&format!(
                "[attached {name} ({}): {}]",
                attachment.media_type, attachment.url
            ));
        }

        Self {
            role: msg.role.as_str(),
            content,
            tool_calls: msg
                .tool_calls
                .iter()
                .map(|call| OpenAiToolCall {
                    id: call.call_id.clone(),
                    call_type: "function",
                    function: OpenAiFunctionCall {
                        name: call.tool_name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect(),
            tool_call_id: msg.tool_call_id.clone(),
        }
    }
}

impl From<&ToolDefinition> for OpenAiTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    #[serde(default)]
    delta: OpenAiDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<OpenAiToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiToolCallDelta {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<OpenAiFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    #[serde(rename = "prompt_tokens")]
    prompt: u64,
    #[serde(rename = "completion_tokens")]
    completion: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorResponse {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    message: String,
    #[serde(rename = "type")]
    error_type: Option<String>,
}

// ============================================================================
// Stream assembly
// ============================================================================

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl PartialToolCall {
    fn finish(self, index: usize) -> ToolCall {
        let arguments = if self.arguments.trim().is_empty() {
            Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&self.arguments).unwrap_or(Value::String(self.arguments))
        };
        ToolCall {
            call_id: if self.id.is_empty() {
                format!("call_{index}")
            } else {
                self.id
            },
            tool_name: self.name,
            arguments,
        }
    }
}

/// Folds stream chunks into model events
#[derive(Debug, Default)]
struct ChunkAssembler {
    tool_calls: BTreeMap<usize, PartialToolCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl ChunkAssembler {
    /// Apply one chunk; returns the text delta it carried, if any
    fn apply(&mut self, chunk: OpenAiStreamChunk) -> Option<String> {
        if let Some(usage) = chunk.usage {
            self.usage = Some(TokenUsage {
                input_tokens: usage.prompt,
                output_tokens: usage.completion,
            });
        }

        let mut text = String::new();
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content {
                text.push_str(&content);
            }
            for delta in choice.delta.tool_calls {
                let entry = self.tool_calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    entry.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        entry.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        entry.arguments.push_str(&arguments);
                    }
                }
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        (!text.is_empty()).then_some(text)
    }

    /// Buffered tool calls followed by the terminal event
    fn finish(self) -> Vec<ModelEvent> {
        let mut events: Vec<ModelEvent> = self
            .tool_calls
            .into_iter()
            .map(|(index, call)| ModelEvent::ToolCall(call.finish(index)))
            .collect();
        events.push(ModelEvent::Finished {
            finish_reason: self
                .finish_reason
                .unwrap_or_else(|| finish_reasons::STOP.to_owned()),
            usage: self.usage,
        });
        events
    }
}

// ============================================================================
// Client
// ============================================================================

/// Connection settings for an `OpenAI`-compatible endpoint
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleConfig {
    /// Base URL including the `/v1` segment
    pub base_url: String,
    /// Bearer token; local servers usually need none
    pub api_key: Option<String>,
    /// Model used when the request names none
    pub default_model: String,
}

impl From<&LlmConfig> for OpenAiCompatibleConfig {
    fn from(config: &LlmConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
        }
    }
}

/// Streaming client for `OpenAI`-style chat completions
pub struct OpenAiCompatibleClient {
    client: Client,
    config: OpenAiCompatibleConfig,
}

impl OpenAiCompatibleClient {
    /// Build the HTTP client
    ///
    /// No overall request timeout is set; the turn streamer bounds stream
    /// duration itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed
    pub fn new(config: OpenAiCompatibleConfig) -> Result<Self, AppError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(timeouts::LLM_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| AppError::internal(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, config })
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    fn add_auth_header(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(ref api_key) = self.config.api_key {
            request.header("Authorization", format!("Bearer {api_key}"))
        } else {
            request
        }
    }

    fn connect_error(&self, e: &reqwest::Error) -> AppError {
        if e.is_connect() {
            AppError::external_unavailable(
                service_names::MODEL_API,
                format!("Cannot connect to model server at {}", self.config.base_url),
            )
        } else {
            AppError::external_service(service_names::MODEL_API, format!("Request failed: {e}"))
        }
    }

    fn parse_error_response(status: StatusCode, body: &str) -> AppError {
        if let Ok(error_response) = serde_json::from_str::<OpenAiErrorResponse>(body) {
            let message = error_response.error.message;
            match status.as_u16() {
                401 | 403 => AppError::external_service(
                    service_names::MODEL_API,
                    format!("Model API rejected credentials: {message}"),
                ),
                429 => AppError::external_unavailable(
                    service_names::MODEL_API,
                    format!("Model API rate limited: {message}"),
                ),
                404 => AppError::external_service(
                    service_names::MODEL_API,
                    format!("Model or endpoint not found: {message}"),
                ),
                _ => AppError::external_service(
                    service_names::MODEL_API,
                    format!(
                        "{} - {message}",
                        error_response.error.error_type.as_deref().unwrap_or("unknown")
                    ),
                ),
            }
        } else {
            match status.as_u16() {
                502..=504 => AppError::external_unavailable(
                    service_names::MODEL_API,
                    "Model server is not responding",
                ),
                _ => AppError::external_service(
                    service_names::MODEL_API,
                    format!(
                        "API error ({status}): {}",
                        body.chars().take(200).collect::<String>()
                    ),
                ),
            }
        }
    }

    fn build_request(&self, request: &ChatRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request
                .model
                .clone()
                .unwrap_or_else(|| self.config.default_model.clone()),
            messages: request.messages.iter().map(OpenAiMessage::from).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            stream_options: OpenAiStreamOptions { include_usage: true },
            tools: (!request.tools.is_empty())
                .then(|| request.tools.iter().map(OpenAiTool::from).collect()),
        }
    }
}

#[async_trait]
impl ModelClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        "openai-compatible"
    }

    fn default_model(&self) -> &str {
        &self.config.default_model
    }

    #[instrument(skip(self, request), fields(model = %request.model.as_deref().unwrap_or(&self.config.default_model)))]
    async fn complete_stream(&self, request: &ChatRequest) -> Result<ModelStream, AppError> {
        let body = self.build_request(request);
        debug!(
            messages = body.messages.len(),
            tools = body.tools.as_ref().map_or(0, Vec::len),
            "Sending streaming chat completion request"
        );

        let http_request = self
            .client
            .post(self.api_url("chat/completions"))
            .header("Content-Type", "application/json")
            .json(&body);

        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "Failed to send streaming request");
                self.connect_error(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::parse_error_response(status, &body));
        }

        let mut events = Box::pin(sse_events(response.bytes_stream(), service_names::MODEL_API));
        let stream = stream! {
            let mut assembler = ChunkAssembler::default();
            let mut terminated = false;
            while let Some(event) = events.next().await {
                match event {
                    Ok(SseEvent::Data(json)) => match serde_json::from_str::<OpenAiStreamChunk>(&json) {
                        Ok(chunk) => {
                            if let Some(text) = assembler.apply(chunk) {
                                yield Ok(ModelEvent::Delta(text));
                            }
                        }
                        Err(e) => warn!(error = %e, "Skipping unparseable stream chunk"),
                    },
                    Ok(SseEvent::Done) => {
                        terminated = true;
                        break;
                    }
                    Err(e) => {
                        yield Err(e);
                        return;
                    }
                }
            }

            if !terminated && assembler.finish_reason.is_none() {
                yield Err(AppError::external_service(
                    service_names::MODEL_API,
                    "Stream ended before completion",
                ));
                return;
            }
            for event in assembler.finish() {
                yield Ok(event);
            }
        };

        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<bool, AppError> {
        let http_request = self.client.get(self.api_url("models"));
        let response = self
            .add_auth_header(http_request)
            .send()
            .await
            .map_err(|e| self.connect_error(&e))?;

        let healthy = response.status().is_success();
        if !healthy {
            warn!(status = %response.status(), "Model health check failed");
        }
        Ok(healthy)
    }
}
