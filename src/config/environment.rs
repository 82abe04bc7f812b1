// ABOUTME: Environment configuration management for deployment-specific settings
// ABOUTME: Reads ports, database, auth, quota, chat, model and storage settings from env vars
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Environment-based configuration management for production deployment

use std::env;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use url::Url;

use crate::constants::{auth, chat, ports, quota};
use crate::models::{QuotaLimits, UserRole};

/// Bearer token settings
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Lifetime of issued tokens in hours
    pub token_expiry_hours: i64,
}

/// Rolling-window quota settings
#[derive(Debug, Clone)]
pub struct QuotaConfig {
    /// Window length
    pub window: chrono::Duration,
    /// Limits applied to guest callers
    pub guest: QuotaLimits,
    /// Limits applied to regular callers
    pub regular: QuotaLimits,
    /// Charge prompt tokens in addition to completion tokens
    pub charge_input_tokens: bool,
}

impl QuotaConfig {
    /// Limits for a caller role
    #[must_use]
    pub const fn limits_for(&self, role: UserRole) -> QuotaLimits {
        match role {
            UserRole::Guest => self.guest,
            UserRole::Regular => self.regular,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            window: chrono::Duration::seconds(quota::WINDOW_SECS),
            guest: QuotaLimits {
                messages: quota::GUEST_MESSAGES,
                tokens: quota::GUEST_TOKENS,
                files: quota::GUEST_FILES,
            },
            regular: QuotaLimits {
                messages: quota::REGULAR_MESSAGES,
                tokens: quota::REGULAR_TOKENS,
                files: quota::REGULAR_FILES,
            },
            charge_input_tokens: false,
        }
    }
}

/// Turn pipeline settings
#[derive(Debug, Clone)]
pub struct ChatConfig {
    /// Maximum characters in one text part
    pub max_text_length: usize,
    /// Maximum characters in a generated title
    pub title_max_length: usize,
    /// Upper bound on one model stream
    pub stream_max_duration: Duration,
    /// Persistence attempts after a finished stream
    pub commit_max_attempts: u32,
    /// Base delay of the persistence backoff
    pub commit_retry_base_delay: Duration,
    /// System prompt prepended to every transcript
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_text_length: chat::MAX_TEXT_LENGTH,
            title_max_length: chat::TITLE_MAX_LENGTH,
            stream_max_duration: Duration::from_secs(chat::STREAM_MAX_DURATION_SECS),
            commit_max_attempts: chat::COMMIT_MAX_ATTEMPTS,
            commit_retry_base_delay: Duration::from_millis(chat::COMMIT_RETRY_BASE_DELAY_MS),
            system_prompt: None,
        }
    }
}

/// Model API settings
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// Base URL of an `OpenAI`-compatible API (e.g. <http://localhost:11434/v1>)
    pub base_url: String,
    /// API key, omitted for local servers
    pub api_key: Option<String>,
    /// Model used when the request has no preference
    pub default_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_owned(),
            api_key: None,
            default_model: "qwen2.5:14b-instruct".to_owned(),
        }
    }
}

/// Object storage settings
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root directory of the filesystem object store
    pub root: PathBuf,
}

/// Complete server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP API port
    pub http_port: u16,
    /// `SQLite` connection string
    pub database_url: String,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Quota configuration
    pub quota: QuotaConfig,
    /// Turn pipeline configuration
    pub chat: ChatConfig,
    /// Model API configuration
    pub llm: LlmConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable value or a
    /// required variable is missing
    pub fn from_env() -> Result<Self> {
        info!("Loading configuration from environment variables");

        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;

        let config = Self {
            http_port: env_var_or("HTTP_PORT", &ports::DEFAULT_HTTP_PORT.to_string())
                .parse()
                .context("Invalid HTTP_PORT value")?,
            database_url: env_var_or("DATABASE_URL", "sqlite:./data/colloquy.db"),
            auth: AuthConfig {
                jwt_secret,
                token_expiry_hours: env_var_or(
                    "JWT_EXPIRY_HOURS",
                    &auth::TOKEN_EXPIRY_HOURS.to_string(),
                )
                .parse()
                .context("Invalid JWT_EXPIRY_HOURS value")?,
            },
            quota: load_quota_config()?,
            chat: load_chat_config()?,
            llm: LlmConfig {
                base_url: env_var_or("LLM_BASE_URL", &LlmConfig::default().base_url),
                api_key: env::var("LLM_API_KEY").ok().filter(|k| !k.is_empty()),
                default_model: env_var_or("LLM_MODEL", &LlmConfig::default().default_model),
            },
            storage: StorageConfig {
                root: PathBuf::from(env_var_or("STORAGE_ROOT", "./data/objects")),
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be used to start the server
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < auth::SECRET_MIN_LENGTH {
            bail!(
                "JWT_SECRET must be at least {} characters",
                auth::SECRET_MIN_LENGTH
            );
        }

        Url::parse(&self.llm.base_url)
            .with_context(|| format!("Invalid LLM_BASE_URL: {}", self.llm.base_url))?;

        if self.chat.commit_max_attempts == 0 {
            bail!("CHAT_COMMIT_MAX_ATTEMPTS must be at least 1");
        }

        if self.chat.title_max_length < 4 {
            bail!("CHAT_TITLE_MAX_LENGTH must leave room for an ellipsis");
        }

        if self.quota.window <= chrono::Duration::zero() {
            bail!("QUOTA_WINDOW_SECS must be positive");
        }

        if self.quota.charge_input_tokens {
            warn!("Prompt tokens are charged against the token quota");
        }

        Ok(())
    }

    /// Human-readable configuration summary for startup logging
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "Colloquy Server Configuration:\n\
             - HTTP Port: {}\n\
             - Database: {}\n\
             - Model API: {} (default model {})\n\
             - Storage Root: {}\n\
             - Quota Window: {}s (guest {}/{}/{}, regular {}/{}/{})\n\
             - Stream Max Duration: {}s\n\
             - Commit Attempts: {}",
            self.http_port,
            self.database_url,
            self.llm.base_url,
            self.llm.default_model,
            self.storage.root.display(),
            self.quota.window.num_seconds(),
            self.quota.guest.messages,
            self.quota.guest.tokens,
            self.quota.guest.files,
            self.quota.regular.messages,
            self.quota.regular.tokens,
            self.quota.regular.files,
            self.chat.stream_max_duration.as_secs(),
            self.chat.commit_max_attempts,
        )
    }
}

fn load_quota_config() -> Result<QuotaConfig> {
    let defaults = QuotaConfig::default();
    Ok(QuotaConfig {
        window: chrono::Duration::seconds(parse_env(
            "QUOTA_WINDOW_SECS",
            defaults.window.num_seconds(),
        )?),
        guest: QuotaLimits {
            messages: parse_env("QUOTA_GUEST_MESSAGES", defaults.guest.messages)?,
            tokens: parse_env("QUOTA_GUEST_TOKENS", defaults.guest.tokens)?,
            files: parse_env("QUOTA_GUEST_FILES", defaults.guest.files)?,
        },
        regular: QuotaLimits {
            messages: parse_env("QUOTA_REGULAR_MESSAGES", defaults.regular.messages)?,
            tokens: parse_env("QUOTA_REGULAR_TOKENS", defaults.regular.tokens)?,
            files: parse_env("QUOTA_REGULAR_FILES", defaults.regular.files)?,
        },
        charge_input_tokens: parse_env("QUOTA_CHARGE_INPUT_TOKENS", false)?,
    })
}

fn load_chat_config() -> Result<ChatConfig> {
    let defaults = ChatConfig::default();
    Ok(ChatConfig {
        max_text_length: parse_env("CHAT_MAX_TEXT_LENGTH", defaults.max_text_length)?,
        title_max_length: parse_env("CHAT_TITLE_MAX_LENGTH", defaults.title_max_length)?,
        stream_max_duration: Duration::from_secs(parse_env(
            "CHAT_STREAM_MAX_DURATION_SECS",
            defaults.stream_max_duration.as_secs(),
        )?),
        commit_max_attempts: parse_env("CHAT_COMMIT_MAX_ATTEMPTS", defaults.commit_max_attempts)?,
        commit_retry_base_delay: Duration::from_millis(parse_env(
            "CHAT_COMMIT_RETRY_BASE_DELAY_MS",
            chat::COMMIT_RETRY_BASE_DELAY_MS,
        )?),
        system_prompt: env::var("CHAT_SYSTEM_PROMPT").ok().filter(|p| !p.is_empty()),
    })
}

/// Get environment variable or default value
fn env_var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_owned())
}

/// Parse an environment variable, falling back to `default` when unset
fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: StdError + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {key} value: {raw}")),
        Err(_) => Ok(default),
    }
}
