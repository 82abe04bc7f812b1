// ABOUTME: Core data models for conversations, turns, quota counters and caller identity
// ABOUTME: Re-exports the record and request types shared by the store, services and routes
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Data Models
//!
//! Plain data carried between the persistent store, the turn pipeline and the
//! HTTP layer.
//!
//! ## Core Models
//!
//! - `ConversationRecord`: a conversation row with owner and visibility
//! - `TurnRecord`: one stored user or assistant turn with its ordered parts
//! - `TurnPart`: tagged union of text, file and tool invocation content
//! - `QuotaCounter`: rolling-window usage counter for one user and resource
//! - `Identity`: the authenticated caller

mod conversation;
mod identity;
mod quota;
mod turn;

pub use conversation::{ConversationRecord, ConversationSummary, Visibility};
pub use identity::{Identity, UserRole};
pub use quota::{QuotaCounter, QuotaLimits, QuotaResource, QuotaSnapshot, QuotaUsage};
pub use turn::{
    ChatTrigger, InboundTurn, TokenUsage, TurnMetadata, TurnPart, TurnRecord, TurnRole, Vote,
};
