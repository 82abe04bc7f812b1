// ABOUTME: Chat turn pipeline error taxonomy (admission, access, validation, stream, commit)
// ABOUTME: Converts every pipeline failure into the unified AppError for HTTP and SSE rendering
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Chat Error Types
//!
//! One variant per terminal outcome of the turn pipeline. Admission, access
//! and validation failures are raised before anything is written; stream and
//! commit failures happen after the conversation has been resolved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AppError, ErrorCode};
use crate::models::QuotaResource;

/// A single offending element of an inbound turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Index of the offending part, `None` when the issue concerns the whole turn
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
    /// Why the element was rejected
    pub reason: String,
}

impl ValidationIssue {
    /// Issue attached to one content part
    #[must_use]
    pub fn at(index: usize, reason: impl Into<String>) -> Self {
        Self {
            index: Some(index),
            reason: reason.into(),
        }
    }

    /// Issue attached to the turn as a whole
    #[must_use]
    pub fn turn(reason: impl Into<String>) -> Self {
        Self {
            index: None,
            reason: reason.into(),
        }
    }
}

/// Errors raised by the chat turn pipeline
#[derive(Debug, Error)]
pub enum ChatError {
    /// A quota window is spent
    #[error("{reason} quota exceeded until {period_end}")]
    AdmissionDenied {
        /// Resource whose limit was hit
        reason: QuotaResource,
        /// End of the current window
        period_end: DateTime<Utc>,
    },

    /// Caller could not be identified
    #[error("identity could not be established: {reason}")]
    Unauthenticated {
        /// Identity provider failure
        reason: String,
    },

    /// Caller is identified but may not touch the conversation
    #[error("access denied: {reason}")]
    AccessDenied {
        /// Why access was refused
        reason: String,
    },

    /// Referenced conversation or turn does not exist
    #[error("{resource} not found")]
    NotFound {
        /// Human-readable resource name
        resource: String,
    },

    /// Inbound turn failed validation
    #[error("inbound turn is invalid ({} issue(s))", issues.len())]
    Validation {
        /// Every offending part
        issues: Vec<ValidationIssue>,
    },

    /// New conversation could not be inserted
    #[error("failed to create conversation {conversation_id}")]
    CreateFailed {
        /// Requested conversation id
        conversation_id: String,
        /// Store failure
        #[source]
        source: AppError,
    },

    /// Fork of a shared conversation failed
    #[error("failed to fork conversation {source_id} into {target_id}")]
    ForkFailed {
        /// Conversation being forked
        source_id: String,
        /// Requested id of the copy
        target_id: String,
        /// Underlying failure
        #[source]
        source: AppError,
    },

    /// Model invocation failed
    #[error("model stream failed: {message}")]
    Stream {
        /// Upstream error description
        message: String,
    },

    /// Persisting the finished turn failed after every retry
    #[error("failed to commit turn after {attempts} attempt(s)")]
    CommitFailed {
        /// Attempts made
        attempts: u32,
        /// Last store failure
        #[source]
        source: AppError,
    },

    /// Store or storage failure outside the named stages
    #[error(transparent)]
    Store(#[from] AppError),
}

impl ChatError {
    /// Create a "not found" error
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Create an "access denied" error
    #[must_use]
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a validation error holding a single issue
    #[must_use]
    pub fn invalid(issue: ValidationIssue) -> Self {
        Self::Validation {
            issues: vec![issue],
        }
    }

    /// Create a stream error
    #[must_use]
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream {
            message: message.into(),
        }
    }

    /// Error code this failure is reported with
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::AdmissionDenied { .. } => ErrorCode::QuotaExceeded,
            Self::Unauthenticated { .. } => ErrorCode::AuthInvalid,
            Self::AccessDenied { .. } => ErrorCode::PermissionDenied,
            Self::NotFound { .. } => ErrorCode::ResourceNotFound,
            Self::Validation { .. } => ErrorCode::InvalidInput,
            Self::CreateFailed { .. } | Self::ForkFailed { .. } | Self::CommitFailed { .. } => {
                ErrorCode::DatabaseError
            }
            Self::Stream { .. } => ErrorCode::ExternalServiceError,
            Self::Store(error) => error.code,
        }
    }
}

impl From<ChatError> for AppError {
    fn from(error: ChatError) -> Self {
        let code = error.code();
        let message = error.to_string();
        match error {
            ChatError::AdmissionDenied { reason, period_end } => {
                Self::new(code, message).with_details(serde_json::json!({
                    "reason": reason,
                    "period_end": period_end.to_rfc3339(),
                }))
            }
            ChatError::Validation { issues } => {
                Self::new(code, message).with_details(serde_json::json!({ "issues": issues }))
            }
            ChatError::CreateFailed { source, .. }
            | ChatError::ForkFailed { source, .. }
            | ChatError::CommitFailed { source, .. } => {
                Self::new(code, message).with_source(source)
            }
            ChatError::Store(error) => error,
            ChatError::Unauthenticated { .. }
            | ChatError::AccessDenied { .. }
            | ChatError::NotFound { .. }
            | ChatError::Stream { .. } => Self::new(code, message),
        }
    }
}
