// ABOUTME: Server-Sent Events framing for streamed model responses
// ABOUTME: Buffers partial lines across network chunks and joins multi-line data fields
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # SSE framing
//!
//! Network chunks and SSE events do not line up: one chunk may carry several
//! events, and one JSON payload may be split across chunks. [`SseDecoder`]
//! keeps the unterminated tail between calls and dispatches an event when
//! the blank line that ends it arrives. Consecutive `data:` lines of one
//! event are joined with `\n`.

use std::fmt::Display;
use std::mem;

use async_stream::stream;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};

use crate::errors::AppError;

/// A dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    /// Payload of the `data:` field(s)
    Data(String),
    /// The `[DONE]` sentinel used by OpenAI-style APIs
    Done,
}

/// Incremental SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes after the last newline; may end inside a UTF-8 sequence
    tail: Vec<u8>,
    /// `data:` lines of the event being assembled
    data: Vec<String>,
}

impl SseDecoder {
    /// Empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk and collect every event it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.tail.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.tail.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.tail.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }

        events
    }

    /// Dispatch whatever is left when the byte stream ends
    pub fn finish(&mut self) -> Option<SseEvent> {
        let rest = mem::take(&mut self.tail);
        let rest = String::from_utf8_lossy(&rest);
        let trimmed = rest.trim_end_matches('\r');
        if !trimmed.is_empty() {
            if let Some(event) = self.process_line(trimmed) {
                return Some(event);
            }
        }
        self.dispatch()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = line.split_once(':').map_or((line, ""), |(f, v)| {
            (f, v.strip_prefix(' ').unwrap_or(v))
        });
        if field == "data" {
            self.data.push(value.to_owned());
        }
        // event:, id: and retry: carry nothing the model clients use
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            return None;
        }
        let payload = mem::take(&mut self.data).join("\n");
        if payload.trim() == "[DONE]" {
            Some(SseEvent::Done)
        } else if payload.trim().is_empty() {
            None
        } else {
            Some(SseEvent::Data(payload))
        }
    }
}

/// Decode a byte stream into SSE events
///
/// A transport error is yielded once and ends the stream.
pub fn sse_events<S, E>(
    byte_stream: S,
    service: &'static str,
) -> impl Stream<Item = Result<SseEvent, AppError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send,
{
    stream! {
        let mut decoder = SseDecoder::new();
        let mut byte_stream = Box::pin(byte_stream);
        while let Some(chunk) = byte_stream.next().await {
            match chunk {
                Ok(bytes) => {
                    for event in decoder.feed(&bytes) {
                        yield Ok(event);
                    }
                }
                Err(e) => {
                    yield Err(AppError::external_service(service, format!("Stream read error: {e}")));
                    return;
                }
            }
        }
        if let Some(event) = decoder.finish() {
            yield Ok(event);
        }
    }
}
