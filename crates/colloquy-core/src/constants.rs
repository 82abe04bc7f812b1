// ABOUTME: Constants module with domain-separated organization
// ABOUTME: Limits, timeouts, supported media types and defaults for the chat server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Constants module
//!
//! Constants are grouped into logical domains rather than being in a single
//! flat namespace. Runtime-tunable values have a matching environment
//! variable in the server configuration; the values here are the defaults.

/// API routes
pub mod routes {
    /// Health route
    pub const HEALTH: &str = "/health";
    /// Chat turn route
    pub const CHAT: &str = "/api/chat";
    /// Conversation collection route
    pub const CONVERSATIONS: &str = "/api/chat/conversations";
    /// Quota snapshot route
    pub const QUOTA: &str = "/api/chat/quota";
}

/// Network ports
pub mod ports {
    /// Default HTTP port
    pub const DEFAULT_HTTP_PORT: u16 = 8081;
}

/// Chat pipeline defaults
pub mod chat {
    /// Maximum characters in one text part
    pub const MAX_TEXT_LENGTH: usize = 32_000;
    /// Maximum characters in a generated title
    pub const TITLE_MAX_LENGTH: usize = 80;
    /// Title used when the first message carries no text
    pub const DEFAULT_TITLE: &str = "New conversation";
    /// Upper bound on one model stream, in seconds
    pub const STREAM_MAX_DURATION_SECS: u64 = 300;
    /// Persistence attempts after a finished stream
    pub const COMMIT_MAX_ATTEMPTS: u32 = 3;
    /// Base delay between persistence attempts, in milliseconds
    pub const COMMIT_RETRY_BASE_DELAY_MS: u64 = 50;
    /// Characters per token used when the model reports no usage
    pub const CHARS_PER_TOKEN_ESTIMATE: usize = 4;
    /// Buffered stream events between the drain task and the response
    pub const STREAM_CHANNEL_CAPACITY: usize = 64;
    /// Default page size for conversation listing
    pub const DEFAULT_LIST_LIMIT: i64 = 20;
    /// Largest accepted page size for conversation listing
    pub const MAX_LIST_LIMIT: i64 = 100;
}

/// Finish reasons recorded on assistant turns
pub mod finish_reasons {
    /// Model finished normally
    pub const STOP: &str = "stop";
    /// Model stopped at its output limit
    pub const LENGTH: &str = "length";
    /// Model requested tool calls
    pub const TOOL_CALLS: &str = "tool_calls";
    /// Stream failed after partial output
    pub const ERROR: &str = "error";
    /// Stream exceeded its maximum duration
    pub const TIMEOUT: &str = "timeout";
}

/// Quota defaults
pub mod quota {
    /// Rolling window length in seconds (24 hours)
    pub const WINDOW_SECS: i64 = 24 * 60 * 60;
    /// Guest chat requests per window
    pub const GUEST_MESSAGES: u64 = 20;
    /// Guest tokens per window
    pub const GUEST_TOKENS: u64 = 20_000;
    /// Guest attached files per window
    pub const GUEST_FILES: u64 = 5;
    /// Regular chat requests per window
    pub const REGULAR_MESSAGES: u64 = 200;
    /// Regular tokens per window
    pub const REGULAR_TOKENS: u64 = 500_000;
    /// Regular attached files per window
    pub const REGULAR_FILES: u64 = 50;
}

/// Media types accepted in file parts
pub mod media_types {
    /// Every accepted media type
    pub const SUPPORTED: &[&str] = &[
        "image/png",
        "image/jpeg",
        "image/gif",
        "image/webp",
        "application/pdf",
        "text/plain",
        "text/csv",
        "text/markdown",
    ];

    /// Whether `media_type` may be attached to a turn
    #[must_use]
    pub fn is_supported(media_type: &str) -> bool {
        SUPPORTED.contains(&media_type)
    }
}

/// Authentication defaults
pub mod auth {
    /// Bearer token lifetime in hours
    pub const TOKEN_EXPIRY_HOURS: i64 = 24;
    /// Minimum accepted JWT secret length
    pub const SECRET_MIN_LENGTH: usize = 32;
}

/// Timeout configurations
pub mod timeouts {
    /// Model API connect timeout in seconds
    pub const LLM_CONNECT_TIMEOUT_SECS: u64 = 10;
    /// Database connection timeout in seconds
    pub const DATABASE_TIMEOUT_SECS: u64 = 10;
}

/// Service names used in logs and error messages
pub mod service_names {
    /// This server
    pub const COLLOQUY_SERVER: &str = "colloquy-server";
    /// Model API
    pub const MODEL_API: &str = "model-api";
    /// Object storage
    pub const OBJECT_STORAGE: &str = "object-storage";
}

/// Observability signal names
pub mod signals {
    /// Emitted when a finished turn could not be persisted
    pub const COMMIT_FAILED: &str = "chat.commit_failed";
}
