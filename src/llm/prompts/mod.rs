// ABOUTME: System prompts for model completions loaded at compile time
// ABOUTME: Provides the default chat assistant instructions
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # System Prompts
//!
//! Prompts are kept as markdown next to this module and embedded at compile time.

/// Default assistant instructions, used when no `CHAT_SYSTEM_PROMPT` is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = include_str!("colloquy_system.md");

/// System prompt to send, preferring a configured override
#[must_use]
pub fn system_prompt(configured: Option<&str>) -> &str {
    configured
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(DEFAULT_SYSTEM_PROMPT)
}
