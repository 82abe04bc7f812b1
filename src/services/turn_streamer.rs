// ABOUTME: Drives one model completion and relays its events to the turn pipeline
// ABOUTME: Drains the upstream in a spawned task bounded by the stream deadline
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Turn streaming
//!
//! [`TurnStreamer::start`] spawns a task that reads the model stream to the
//! end even if nobody is listening, so a reply that started is always
//! summarized. The receiver sees deltas and tool calls as they arrive and
//! then exactly one terminal event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{timeout_at, Instant};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::constants::chat::{CHARS_PER_TOKEN_ESTIMATE, STREAM_CHANNEL_CAPACITY};
use crate::constants::finish_reasons;
use crate::constants::service_names::MODEL_API;
use crate::errors::AppError;
use crate::llm::{ChatMessage, ChatRequest, ModelClient, ModelEvent, ToolCall, ToolDefinition};
use crate::models::{TokenUsage, TurnPart};

/// What to send to the model
#[derive(Debug, Clone, Default)]
pub struct StreamRequest {
    /// Model messages, system context first
    pub messages: Vec<ChatMessage>,
    /// Tools offered to the model
    pub tools: Vec<ToolDefinition>,
    /// Model override
    pub model: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
}

/// Everything the stream produced
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSummary {
    /// Concatenated text
    pub content: String,
    /// Tool calls in arrival order
    pub tool_calls: Vec<ToolCall>,
    /// Why generation stopped
    pub finish_reason: String,
    /// Reported or estimated usage
    pub usage: TokenUsage,
    /// Whether `usage` was estimated from character counts
    pub usage_estimated: bool,
    /// Whether any delta or tool call was produced
    pub emitted_any: bool,
}

impl StreamSummary {
    /// Parts of the assistant turn: text first, then tool invocations
    #[must_use]
    pub fn assistant_parts(&self) -> Vec<TurnPart> {
        let mut parts = Vec::with_capacity(self.tool_calls.len() + 1);
        if !self.content.is_empty() {
            parts.push(TurnPart::text(self.content.clone()));
        }
        parts.extend(self.tool_calls.iter().map(|call| TurnPart::ToolInvocation {
            call_id: call.call_id.clone(),
            tool_name: call.tool_name.clone(),
            arguments: call.arguments.clone(),
            result: None,
        }));
        parts
    }
}

/// Event relayed from the model
#[derive(Debug)]
pub enum StreamEvent {
    /// Text fragment
    Delta {
        /// Fragment text
        text: String,
    },
    /// Tool call requested by the model
    ToolCall(ToolCall),
    /// Stream ended normally
    Completed(StreamSummary),
    /// Stream ended with an error or hit the deadline
    Failed {
        /// What went wrong
        error: AppError,
        /// Output produced before the failure
        summary: StreamSummary,
    },
}

/// Receiving end of a started stream
#[derive(Debug)]
pub struct TurnStream {
    events: mpsc::Receiver<StreamEvent>,
}

impl TurnStream {
    /// Next event; `None` after the terminal event
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }
}

/// Starts model completions
#[derive(Clone)]
pub struct TurnStreamer {
    model: Arc<dyn ModelClient>,
    max_duration: Duration,
}

impl TurnStreamer {
    /// Streamer over `model`, cutting every stream off after `max_duration`
    #[must_use]
    pub fn new(model: Arc<dyn ModelClient>, max_duration: Duration) -> Self {
        Self {
            model,
            max_duration,
        }
    }

    /// Spawn the completion and return its event receiver
    #[must_use]
    pub fn start(&self, request: StreamRequest) -> TurnStream {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let model = Arc::clone(&self.model);
        let deadline = Instant::now() + self.max_duration;
        let max_duration = self.max_duration;
        tokio::spawn(async move {
            drive(model.as_ref(), request, deadline, max_duration, tx).await;
        });
        TurnStream { events: rx }
    }
}

#[derive(Default)]
struct Accumulator {
    content: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<String>,
    usage: Option<TokenUsage>,
}

impl Accumulator {
    fn emitted_any(&self) -> bool {
        !self.content.is_empty() || !self.tool_calls.is_empty()
    }

    fn into_summary(self, prompt_chars: usize, finish_reason: Option<&str>) -> StreamSummary {
        let emitted_any = self.emitted_any();
        let (usage, usage_estimated) = self.usage.map_or_else(
            || {
                let estimate = TokenUsage {
                    input_tokens: estimate_tokens(prompt_chars),
                    output_tokens: estimate_tokens(self.content.chars().count()),
                };
                (estimate, true)
            },
            |usage| (usage, false),
        );
        let finish_reason = finish_reason
            .map(str::to_owned)
            .or(self.finish_reason)
            .unwrap_or_else(|| finish_reasons::STOP.to_owned());
        StreamSummary {
            content: self.content,
            tool_calls: self.tool_calls,
            finish_reason,
            usage,
            usage_estimated,
            emitted_any,
        }
    }
}

/// Token count estimate of `chars` characters, rounded up
#[must_use]
pub const fn estimate_tokens(chars: usize) -> u64 {
    chars.div_ceil(CHARS_PER_TOKEN_ESTIMATE) as u64
}

async fn drive(
    model: &dyn ModelClient,
    request: StreamRequest,
    deadline: Instant,
    max_duration: Duration,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut chat_request = ChatRequest::new(request.messages).with_tools(request.tools);
    if let Some(name) = request.model {
        chat_request = chat_request.with_model(name);
    }
    if let Some(temperature) = request.temperature {
        chat_request = chat_request.with_temperature(temperature);
    }
    let prompt_chars = chat_request.prompt_chars();

    let mut acc = Accumulator::default();
    let outcome = timeout_at(deadline, pump(model, &chat_request, &mut acc, &tx)).await;

    let terminal = match outcome {
        Ok(Ok(())) => StreamEvent::Completed(acc.into_summary(prompt_chars, None)),
        Ok(Err(error)) => StreamEvent::Failed {
            error,
            summary: acc.into_summary(prompt_chars, Some(finish_reasons::ERROR)),
        },
        Err(_) => StreamEvent::Failed {
            error: AppError::external_service(
                MODEL_API,
                format!("Model stream exceeded {max_duration:?}"),
            ),
            summary: acc.into_summary(prompt_chars, Some(finish_reasons::TIMEOUT)),
        },
    };

    if tx.send(terminal).await.is_err() {
        debug!("Turn stream receiver dropped before the terminal event");
    }
}

async fn pump(
    model: &dyn ModelClient,
    request: &ChatRequest,
    acc: &mut Accumulator,
    tx: &mpsc::Sender<StreamEvent>,
) -> Result<(), AppError> {
    let mut stream = model.complete_stream(request).await?;

    while let Some(event) = stream.next().await {
        match event? {
            ModelEvent::Delta(text) => {
                if text.is_empty() {
                    continue;
                }
                acc.content.push_str(&text);
                // A closed receiver must not stop the drain
                let _ = tx.send(StreamEvent::Delta { text }).await;
            }
            ModelEvent::ToolCall(call) => {
                acc.tool_calls.push(call.clone());
                let _ = tx.send(StreamEvent::ToolCall(call)).await;
            }
            ModelEvent::Finished {
                finish_reason,
                usage,
            } => {
                acc.finish_reason = Some(finish_reason);
                acc.usage = usage;
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio_stream::{iter, pending};

    use super::*;
    use crate::llm::ModelStream;

    struct Scripted(Vec<Result<ModelEvent, &'static str>>);

    #[async_trait]
    impl ModelClient for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn default_model(&self) -> &str {
            "scripted-1"
        }

        async fn complete_stream(&self, _request: &ChatRequest) -> Result<ModelStream, AppError> {
            let events: Vec<_> = self
                .0
                .iter()
                .map(|event| event.clone().map_err(|e| AppError::external_service("test", e)))
                .collect();
            Ok(Box::pin(iter(events)))
        }

        async fn health_check(&self) -> Result<bool, AppError> {
            Ok(true)
        }
    }

    struct Stalled;

    #[async_trait]
    impl ModelClient for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        fn default_model(&self) -> &str {
            "stalled-1"
        }

        async fn complete_stream(&self, _request: &ChatRequest) -> Result<ModelStream, AppError> {
            Ok(Box::pin(pending()))
        }

        async fn health_check(&self) -> Result<bool, AppError> {
            Ok(true)
        }
    }

    fn streamer(events: Vec<Result<ModelEvent, &'static str>>) -> TurnStreamer {
        TurnStreamer::new(Arc::new(Scripted(events)), Duration::from_secs(5))
    }

    async fn collect(mut stream: TurnStream) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = stream.next().await {
            events.push(event);
        }
        events
    }

    fn request() -> StreamRequest {
        StreamRequest {
            messages: vec![ChatMessage::user("12345678")],
            ..StreamRequest::default()
        }
    }

    #[tokio::test]
    async fn test_completed_summary_uses_reported_usage() {
        let events = collect(
            streamer(vec![
                Ok(ModelEvent::Delta("Hi ".into())),
                Ok(ModelEvent::Delta("there!".into())),
                Ok(ModelEvent::Finished {
                    finish_reason: "stop".into(),
                    usage: Some(TokenUsage {
                        input_tokens: 5,
                        output_tokens: 3,
                    }),
                }),
            ])
            .start(request()),
        )
        .await;

        assert_eq!(events.len(), 3);
        let Some(StreamEvent::Completed(summary)) = events.last() else {
            panic!("expected completion");
        };
        assert_eq!(summary.content, "Hi there!");
        assert_eq!(summary.usage.output_tokens, 3);
        assert!(!summary.usage_estimated);
        assert!(summary.emitted_any);
    }

    #[tokio::test]
    async fn test_missing_usage_is_estimated() {
        let events = collect(
            streamer(vec![Ok(ModelEvent::Delta("abcde".into()))]).start(request()),
        )
        .await;

        let Some(StreamEvent::Completed(summary)) = events.last() else {
            panic!("expected completion");
        };
        assert!(summary.usage_estimated);
        assert_eq!(summary.usage.input_tokens, 2);
        assert_eq!(summary.usage.output_tokens, 2);
        assert_eq!(summary.finish_reason, "stop");
    }

    #[tokio::test]
    async fn test_mid_stream_error_keeps_partial_output() {
        let events = collect(
            streamer(vec![Ok(ModelEvent::Delta("partial".into())), Err("reset")]).start(request()),
        )
        .await;

        let Some(StreamEvent::Failed { summary, .. }) = events.last() else {
            panic!("expected failure");
        };
        assert_eq!(summary.content, "partial");
        assert_eq!(summary.finish_reason, "error");
        assert!(summary.emitted_any);
    }

    #[tokio::test]
    async fn test_sub_second_limit_is_reported_exactly() {
        let streamer = TurnStreamer::new(Arc::new(Stalled), Duration::from_millis(20));
        let events = collect(streamer.start(request())).await;

        let Some(StreamEvent::Failed { error, summary }) = events.last() else {
            panic!("expected failure");
        };
        assert_eq!(summary.finish_reason, "timeout");
        assert!(error.message.ends_with("exceeded 20ms"), "{}", error.message);
    }

    #[tokio::test]
    async fn test_error_before_any_token() {
        let events = collect(streamer(vec![Err("refused")]).start(request())).await;

        assert_eq!(events.len(), 1);
        let Some(StreamEvent::Failed { summary, .. }) = events.last() else {
            panic!("expected failure");
        };
        assert!(!summary.emitted_any);
    }

    #[test]
    fn test_assistant_parts_put_text_before_tool_calls() {
        let summary = StreamSummary {
            content: "checking".into(),
            tool_calls: vec![ToolCall {
                call_id: "c1".into(),
                tool_name: "lookup".into(),
                arguments: serde_json::json!({"q": 1}),
            }],
            finish_reason: "tool_calls".into(),
            usage: TokenUsage::default(),
            usage_estimated: true,
            emitted_any: true,
        };
        let parts = summary.assistant_parts();
        assert_eq!(parts[0], TurnPart::text("checking"));
        assert!(matches!(&parts[1], TurnPart::ToolInvocation { tool_name, .. } if tool_name == "lookup"));
    }

    #[test]
    fn test_estimate_rounds_up() {
        assert_eq!(estimate_tokens(0), 0);
        assert_eq!(estimate_tokens(1), 1);
        assert_eq!(estimate_tokens(8), 2);
        assert_eq!(estimate_tokens(9), 3);
    }
}
