// ABOUTME: Centralized container for the collaborators shared by every request
// ABOUTME: Holds the store, quota store, model client, object storage and identity provider
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::auth::IdentityProvider;
use crate::config::ServerConfig;
use crate::database::{ChatStore, QuotaStore};
use crate::llm::{ModelClient, ToolRegistry};
use crate::storage::ObjectStorage;

/// Centralized resource container for dependency injection
///
/// Built once at startup and shared as `Arc<ServerResources>`. Requests hold
/// no other state, so every turn is independent apart from the store itself
/// and the commit failure counter.
#[derive(Clone)]
pub struct ServerResources {
    /// Loaded configuration
    pub config: Arc<ServerConfig>,
    /// Conversations and turns
    pub store: Arc<dyn ChatStore>,
    /// Usage counters
    pub quota: Arc<dyn QuotaStore>,
    /// Language model
    pub model: Arc<dyn ModelClient>,
    /// File objects
    pub storage: Arc<dyn ObjectStorage>,
    /// Caller resolution
    pub identity: Arc<dyn IdentityProvider>,
    /// Tools offered on every completion
    pub tools: Arc<ToolRegistry>,
    /// Commits that failed after every retry since startup
    pub commit_failures: Arc<AtomicU64>,
}

impl ServerResources {
    /// Assemble resources with no tools declared
    pub fn new(
        config: Arc<ServerConfig>,
        store: Arc<dyn ChatStore>,
        quota: Arc<dyn QuotaStore>,
        model: Arc<dyn ModelClient>,
        storage: Arc<dyn ObjectStorage>,
        identity: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            config,
            store,
            quota,
            model,
            storage,
            identity,
            tools: Arc::new(ToolRegistry::new()),
            commit_failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Offer `tools` to the model on every turn
    #[must_use]
    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Arc::new(tools);
        self
    }

    /// Current value of the commit failure counter
    #[must_use]
    pub fn commit_failures(&self) -> u64 {
        self.commit_failures.load(Ordering::Relaxed)
    }
}
