// ABOUTME: Configuration module root
// ABOUTME: Environment-only configuration loaded once at startup
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

/// Environment variable parsing and validation
pub mod environment;

pub use environment::{AuthConfig, ChatConfig, LlmConfig, QuotaConfig, ServerConfig, StorageConfig};
