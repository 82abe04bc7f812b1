// ABOUTME: Main library entry point for the Colloquy chat server
// ABOUTME: Chat turn orchestration with quota admission, fork-on-write, streaming and commit
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

#![deny(unsafe_code)]

//! # Colloquy Server
//!
//! Backend for a conversational chat product. One inbound user message is
//! turned into a streamed model reply and a durably stored transcript.
//!
//! ## Turn pipeline
//!
//! Every `POST /api/chat` request runs the same five stages:
//!
//! 1. **Admission**: quota pre-flight against the rolling-window counters
//! 2. **Resolution**: create, continue, fork or deny the target conversation
//! 3. **Transcript**: merge stored history with the inbound turn and validate it
//! 4. **Streaming**: drive the model and relay deltas to the client
//! 5. **Commit**: append or regenerate turns and charge the quota
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use colloquy_server::config::environment::ServerConfig;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::from_env()?;
//!     println!("Colloquy configured on port {}", config.http_port);
//!     Ok(())
//! }
//! ```

/// Bearer token identity provider
pub mod auth;

/// Environment-based configuration
pub mod config;

/// Application constants (re-exported from `colloquy-core`)
pub mod constants;

/// Conversation, turn and quota persistence
pub mod database;

/// Unified error handling (re-exported from `colloquy-core`)
pub mod errors;

/// Model client abstraction and the `OpenAI`-compatible streaming client
pub mod llm;

/// Structured logging setup and chat event helpers
pub mod logging;

/// Data models (re-exported from `colloquy-core`)
pub mod models;

/// Shared collaborators injected into every route
pub mod resources;

/// HTTP routes
pub mod routes;

/// Turn pipeline stages
pub mod services;

/// Object storage for file parts
pub mod storage;
