// ABOUTME: Authenticated caller identity and account role
// ABOUTME: The role selects which quota limits apply to the caller
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use serde::{Deserialize, Serialize};

/// Account class of a caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Anonymous or trial session
    Guest,
    /// Registered account
    #[default]
    Regular,
}

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Stable user identifier
    pub user_id: String,
    /// Account class
    pub role: UserRole,
}

impl Identity {
    /// Build an identity
    #[must_use]
    pub fn new(user_id: impl Into<String>, role: UserRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }
}
