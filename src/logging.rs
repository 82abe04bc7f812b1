// ABOUTME: Logging configuration and structured logging setup for observability and debugging
// ABOUTME: Configures the tracing subscriber and provides structured chat pipeline events
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Production-ready logging configuration with structured output

use std::env;
use std::io;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::constants::{service_names, signals};
use crate::models::{QuotaResource, TokenUsage, TurnRole};

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty, compact)
    pub format: LogFormat,
    /// Include source file and line numbers
    pub include_location: bool,
    /// Include span open/close events
    pub include_spans: bool,
    /// Service name for structured logging
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (development, staging, production)
    pub environment: String,
}

/// Log output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// `JSON` format for production logging
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact format for space-constrained environments
    Compact,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Pretty,
            include_location: false,
            include_spans: false,
            service_name: service_names::COLLOQUY_SERVER.into(),
            service_version: env!("CARGO_PKG_VERSION").to_owned(),
            environment: "development".into(),
        }
    }
}

impl LoggingConfig {
    /// Create logging configuration from environment variables
    #[must_use]
    pub fn from_env() -> Self {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info".into());

        let format = match env::var("LOG_FORMAT").as_deref() {
            Ok("json") => LogFormat::Json,
            Ok("compact") => LogFormat::Compact,
            _ => LogFormat::Pretty,
        };

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into());
        let is_production = environment == "production";

        Self {
            level,
            format,
            include_location: is_production || env::var("LOG_INCLUDE_LOCATION").is_ok(),
            include_spans: env::var("LOG_INCLUDE_SPANS").is_ok(),
            service_name: env::var("SERVICE_NAME")
                .unwrap_or_else(|_| service_names::COLLOQUY_SERVER.into()),
            service_version: env!("CARGO_PKG_VERSION").to_owned(),
            environment,
        }
    }

    /// Filter with noise reduction for dependencies
    fn env_filter(&self) -> EnvFilter {
        let base = env::var("RUST_LOG").unwrap_or_else(|_| self.level.clone());
        let mut filter = EnvFilter::new(base);
        for directive in [
            "hyper=warn",
            "hyper::proto=warn",
            "reqwest=warn",
            "sqlx=warn",
            "sqlx::query=warn",
            "tower_http=info",
        ] {
            if let Ok(parsed) = directive.parse() {
                filter = filter.add_directive(parsed);
            }
        }
        filter.add_directive(
            format!("colloquy_server={}", self.level)
                .parse()
                .unwrap_or_else(|_| LevelFilter::INFO.into()),
        )
    }

    /// Initialize the global tracing subscriber
    ///
    /// # Errors
    ///
    /// Returns an error if a global subscriber is already installed
    pub fn init(&self) -> Result<()> {
        let registry = tracing_subscriber::registry().with(self.env_filter());
        let span_events = if self.include_spans {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        match self.format {
            LogFormat::Json => {
                let layer = fmt::layer()
                    .with_file(self.include_location)
                    .with_line_number(self.include_location)
                    .with_target(true)
                    .with_writer(io::stdout)
                    .with_span_events(span_events)
                    .json();
                registry.with(layer).try_init()?;
            }
            LogFormat::Pretty => {
                let layer = fmt::layer()
                    .with_file(self.include_location)
                    .with_line_number(self.include_location)
                    .with_target(true)
                    .with_writer(io::stdout)
                    .with_span_events(span_events);
                registry.with(layer).try_init()?;
            }
            LogFormat::Compact => {
                let layer = fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(io::stdout)
                    .with_span_events(FmtSpan::NONE);
                registry.with(layer).try_init()?;
            }
        }

        info!(
            service.name = %self.service_name,
            service.version = %self.service_version,
            environment = %self.environment,
            log.level = %self.level,
            log.format = ?self.format,
            "Colloquy server logging initialized"
        );

        Ok(())
    }
}

/// Initialize logging from environment
///
/// # Errors
///
/// Returns an error if logging initialization fails
pub fn init_from_env() -> Result<()> {
    LoggingConfig::from_env().init()
}

/// Structured events emitted by the turn pipeline
pub struct ChatLogger;

impl ChatLogger {
    /// A request was rejected before any side effect
    pub fn log_admission_denied(user_id: &str, resource: QuotaResource, period_end: DateTime<Utc>) {
        info!(
            user.id = %user_id,
            quota.resource = %resource,
            quota.period_end = %period_end.to_rfc3339(),
            "Chat admission denied"
        );
    }

    /// A non-owner write forked a public conversation
    pub fn log_fork(user_id: &str, source_id: &str, target_id: &str, copied_turns: usize) {
        info!(
            user.id = %user_id,
            chat.source_conversation = %source_id,
            chat.conversation = %target_id,
            chat.copied_turns = copied_turns,
            "Conversation forked"
        );
    }

    /// A turn was regenerated in place
    pub fn log_regeneration(
        user_id: &str,
        conversation_id: &str,
        target_turn_id: &str,
        target_role: TurnRole,
        removed_turns: u64,
    ) {
        info!(
            user.id = %user_id,
            chat.conversation = %conversation_id,
            chat.target_turn = %target_turn_id,
            chat.target_role = %target_role,
            chat.removed_turns = removed_turns,
            "Turn regenerated"
        );
    }

    /// A turn finished and its outcome is durable
    pub fn log_commit(
        user_id: &str,
        conversation_id: &str,
        finish_reason: &str,
        usage: TokenUsage,
        persisted: bool,
    ) {
        info!(
            user.id = %user_id,
            chat.conversation = %conversation_id,
            chat.finish_reason = %finish_reason,
            chat.persisted = persisted,
            usage.input_tokens = usage.input_tokens,
            usage.output_tokens = usage.output_tokens,
            "Chat turn committed"
        );
    }

    /// A finished turn could not be persisted
    pub fn log_commit_failed(user_id: &str, conversation_id: &str, attempts: u32, error: &str) {
        error!(
            signal = signals::COMMIT_FAILED,
            user.id = %user_id,
            chat.conversation = %conversation_id,
            commit.attempts = attempts,
            error = %error,
            "Failed to persist chat turn"
        );
    }

    /// The model stream ended with an error
    pub fn log_stream_failure(conversation_id: &str, emitted_any: bool, error: &str) {
        warn!(
            chat.conversation = %conversation_id,
            stream.emitted_any = emitted_any,
            error = %error,
            "Model stream failed"
        );
    }
}
