// ABOUTME: Domain service layer for the chat turn pipeline
// ABOUTME: Admission, resolution, transcript, streaming, commit and conversation management
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Domain service layer
//!
//! Protocol-agnostic business logic. Route handlers authenticate the caller
//! and translate between HTTP and these services; every rule about quotas,
//! ownership and turn ordering lives here.

/// Quota admission before a turn and accounting after it
pub mod admission;

/// Turn pipeline driver tying the stages together
pub mod chat_orchestration;

/// Create, continue, fork or deny the target conversation
pub mod conversation_resolver;

/// Listing, reading, renaming, sharing, deleting and voting
pub mod conversations;

/// Inbound turn validation and model message building
pub mod transcript;

/// Persisting finished turns with retries
pub mod turn_commit;

/// Spawned model stream drain with a deadline
pub mod turn_streamer;
