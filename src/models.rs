// ABOUTME: Data models re-exported from the core crate
// ABOUTME: Conversations, turns, quota counters, identity and timestamp helpers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

pub use colloquy_core::models::*;
pub use colloquy_core::time;
