// ABOUTME: Rolling-window usage counters for messages, tokens and files
// ABOUTME: A counter read after its period end counts as zero; reset happens on the next increment
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Metered resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaResource {
    /// Chat requests
    Messages,
    /// Model tokens
    Tokens,
    /// Attached files
    Files,
}

impl QuotaResource {
    /// Every resource, in admission check order
    pub const ALL: [Self; 3] = [Self::Messages, Self::Tokens, Self::Files];

    /// Storage representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Tokens => "tokens",
            Self::Files => "files",
        }
    }
}

impl fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QuotaResource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "messages" => Ok(Self::Messages),
            "tokens" => Ok(Self::Tokens),
            "files" => Ok(Self::Files),
            other => Err(AppError::invalid_input(format!(
                "Unknown quota resource: {other}"
            ))),
        }
    }
}

/// Stored counter for one (user, resource) pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounter {
    /// Owning user
    pub user_id: String,
    /// Metered resource
    pub resource: QuotaResource,
    /// Usage recorded in the current window
    pub counter: u64,
    /// Window start
    pub period_start: DateTime<Utc>,
    /// Window end
    pub period_end: DateTime<Utc>,
}

impl QuotaCounter {
    /// Whether the window has ended at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.period_end
    }

    /// Usage that still counts at `now`
    #[must_use]
    pub fn effective_count(&self, now: DateTime<Utc>) -> u64 {
        if self.is_expired(now) {
            0
        } else {
            self.counter
        }
    }
}

/// Per-window limits for one account role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Chat requests per window
    pub messages: u64,
    /// Tokens per window
    pub tokens: u64,
    /// Attached files per window
    pub files: u64,
}

impl QuotaLimits {
    /// Limit for `resource`
    #[must_use]
    pub const fn limit_for(&self, resource: QuotaResource) -> u64 {
        match resource {
            QuotaResource::Messages => self.messages,
            QuotaResource::Tokens => self.tokens,
            QuotaResource::Files => self.files,
        }
    }
}

/// Usage of one resource as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// Usage in the current window
    pub used: u64,
    /// Window limit
    pub limit: u64,
    /// End of the current window, `None` when nothing was recorded yet
    pub period_end: Option<DateTime<Utc>>,
    /// Whether the limit is reached
    pub is_over_limit: bool,
}

impl QuotaUsage {
    /// Usage derived from an optional stored counter
    #[must_use]
    pub fn from_counter(counter: Option<&QuotaCounter>, limit: u64, now: DateTime<Utc>) -> Self {
        let live = counter.filter(|c| !c.is_expired(now));
        let used = live.map_or(0, |c| c.counter);
        Self {
            used,
            limit,
            period_end: live.map(|c| c.period_end),
            is_over_limit: used >= limit,
        }
    }
}

/// Current usage for every resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaSnapshot {
    /// Chat requests
    pub messages: QuotaUsage,
    /// Model tokens
    pub tokens: QuotaUsage,
    /// Attached files
    pub files: QuotaUsage,
}
