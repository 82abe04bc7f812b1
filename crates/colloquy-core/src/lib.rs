// ABOUTME: Core types and constants for the Colloquy chat server
// ABOUTME: Foundation crate with error handling, conversation/turn/quota models, and constants
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Colloquy Core
//!
//! Foundation crate providing shared types and constants for the Colloquy chat
//! server. This crate is designed to change infrequently, enabling incremental
//! compilation benefits in the workspace.
//!
//! ## Modules
//!
//! - **errors**: Unified error handling with `AppError`, `ErrorCode`, and the chat domain `ChatError`
//! - **models**: Conversations, turns, content parts, quota counters, and caller identity
//! - **constants**: Application-wide limits and defaults organized by domain

/// Unified error handling system with standard error codes and HTTP responses
pub mod errors;

/// Application constants and configuration defaults organized by domain
pub mod constants;

/// Core data models (conversations, turns, quota counters, identity)
pub mod models;

/// Fixed-width timestamp encoding and per-conversation monotonic stamping
pub mod time;
