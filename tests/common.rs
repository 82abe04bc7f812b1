// ABOUTME: Shared setup for integration tests: in-memory store, scripted model and temp storage
// ABOUTME: Wraps the store to count writes and inject transient commit failures
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence
#![allow(
    dead_code,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions,
    clippy::too_many_lines,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic
)]
//! Shared test utilities for `colloquy_server`
//!
//! Every harness gets its own in-memory SQLite database and its own object
//! storage directory, so tests never see each other's rows.

use std::collections::VecDeque;
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use chrono::{DateTime, Utc};
use colloquy_server::{
    auth::JwtIdentityProvider,
    config::{AuthConfig, ChatConfig, LlmConfig, QuotaConfig, ServerConfig, StorageConfig},
    constants::service_names::MODEL_API,
    database::{ChatStore, QuotaStore, Regeneration, RegenerationOutcome, SqliteDatabase},
    errors::{AppError, AppResult},
    llm::{ChatRequest, ModelClient, ModelEvent, ModelStream, ToolCall},
    models::{
        time, ConversationRecord, ConversationSummary, Identity, QuotaResource, TokenUsage,
        TurnMetadata, TurnPart, TurnRecord, TurnRole, UserRole, Visibility, Vote,
    },
    resources::ServerResources,
    routes,
    services::chat_orchestration::{ChatOrchestrator, TurnEvent},
    storage::FsObjectStorage,
};
use futures_util::stream::{self, StreamExt};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::Level;
use uuid::Uuid;

/// Signing secret for test tokens
pub const TEST_SECRET: &str = "integration-test-secret-0123456789abcdef";

static INIT_LOGGER: Once = Once::new();

/// Initialize quiet logging for tests (call once per test process)
pub fn init_test_logging() {
    INIT_LOGGER.call_once(|| {
        let log_level = match env::var("TEST_LOG").as_deref() {
            Ok("TRACE") => Level::TRACE,
            Ok("DEBUG") => Level::DEBUG,
            Ok("INFO") => Level::INFO,
            _ => Level::WARN,
        };

        tracing_subscriber::fmt()
            .with_max_level(log_level)
            .with_test_writer()
            .init();
    });
}

// ============================================================================
// Scripted Model
// ============================================================================

/// What the scripted model does for one completion
pub enum Script {
    /// Stream `chunks` then finish with `stop`
    Reply {
        chunks: Vec<&'static str>,
        usage: Option<TokenUsage>,
    },
    /// Request a tool call then finish with `tool_calls`
    Tool(ToolCall),
    /// Reject the request before streaming anything
    Reject,
    /// Stream `chunks` then fail mid-stream
    BreakAfter(Vec<&'static str>),
    /// Stream `chunks` then never finish
    Hang(Vec<&'static str>),
}

impl Script {
    pub fn reply(chunks: Vec<&'static str>) -> Self {
        Self::Reply {
            chunks,
            usage: None,
        }
    }
}

/// Model client replaying queued scripts and recording every request
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    /// Queue the behavior of the next completion
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

fn deltas(chunks: Vec<&'static str>) -> Vec<Result<ModelEvent, AppError>> {
    chunks
        .into_iter()
        .map(|chunk| Ok(ModelEvent::Delta(chunk.to_owned())))
        .collect()
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn default_model(&self) -> &str {
        "scripted-model"
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ModelStream, AppError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Script::reply(vec!["Hi", " there!"]));

        let stream: ModelStream = match script {
            Script::Reply { chunks, usage } => {
                let mut events = deltas(chunks);
                events.push(Ok(ModelEvent::Finished {
                    finish_reason: "stop".to_owned(),
                    usage,
                }));
                Box::pin(stream::iter(events))
            }
            Script::Tool(call) => Box::pin(stream::iter(vec![
                Ok(ModelEvent::ToolCall(call)),
                Ok(ModelEvent::Finished {
                    finish_reason: "tool_calls".to_owned(),
                    usage: None,
                }),
            ])),
            Script::Reject => {
                return Err(AppError::external_service(MODEL_API, "upstream rejected"));
            }
            Script::BreakAfter(chunks) => {
                let mut events = deltas(chunks);
                events.push(Err(AppError::external_service(
                    MODEL_API,
                    "connection reset",
                )));
                Box::pin(stream::iter(events))
            }
            Script::Hang(chunks) => Box::pin(stream::iter(deltas(chunks)).chain(stream::pending())),
        };
        Ok(stream)
    }

    async fn health_check(&self) -> Result<bool, AppError> {
        Ok(true)
    }
}

// ============================================================================
// Counting Store
// ============================================================================

/// `ChatStore` wrapper counting writes and failing commits on demand
pub struct CountingStore {
    inner: Arc<SqliteDatabase>,
    writes: AtomicUsize,
    failing_appends: AtomicU32,
    failing_regenerations: AtomicU32,
    failing_stamp_reads: AtomicU32,
}

impl CountingStore {
    pub fn new(inner: Arc<SqliteDatabase>) -> Self {
        Self {
            inner,
            writes: AtomicUsize::new(0),
            failing_appends: AtomicU32::new(0),
            failing_regenerations: AtomicU32::new(0),
            failing_stamp_reads: AtomicU32::new(0),
        }
    }

    /// Writes that reached the database
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Fail the next `count` appends with a transient database error
    pub fn fail_next_appends(&self, count: u32) {
        self.failing_appends.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` regenerations with a transient database error
    pub fn fail_next_regenerations(&self, count: u32) {
        self.failing_regenerations.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` reads of a conversation's last turn stamp
    pub fn fail_next_stamp_reads(&self, count: u32) {
        self.failing_stamp_reads.store(count, Ordering::SeqCst);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Consume one pending failure from `counter`, if any
fn inject(counter: &AtomicU32) -> AppResult<()> {
    let fail = counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if fail {
        Err(AppError::database("database is locked"))
    } else {
        Ok(())
    }
}

#[async_trait]
impl ChatStore for CountingStore {
    async fn get_conversation(&self, conversation_id: &str) -> AppResult<Option<ConversationRecord>> {
        self.inner.get_conversation(conversation_id).await
    }

    async fn create_conversation(&self, conversation: &ConversationRecord) -> AppResult<bool> {
        self.record_write();
        self.inner.create_conversation(conversation).await
    }

    async fn fork_conversation(
        &self,
        conversation: &ConversationRecord,
        turns: &[TurnRecord],
    ) -> AppResult<()> {
        self.record_write();
        self.inner.fork_conversation(conversation, turns).await
    }

    async fn list_conversations(
        &self,
        owner_id: &str,
        limit: i64,
        offset: i64,
    ) -> AppResult<Vec<ConversationSummary>> {
        self.inner.list_conversations(owner_id, limit, offset).await
    }

    async fn update_title(
        &self,
        conversation_id: &str,
        owner_id: &str,
        title: &str,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.record_write();
        self.inner
            .update_title(conversation_id, owner_id, title, now)
            .await
    }

    async fn update_visibility(
        &self,
        conversation_id: &str,
        owner_id: &str,
        visibility: Visibility,
        now: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.record_write();
        self.inner
            .update_visibility(conversation_id, owner_id, visibility, now)
            .await
    }

    async fn delete_conversation(&self, conversation_id: &str, owner_id: &str) -> AppResult<bool> {
        self.record_write();
        self.inner.delete_conversation(conversation_id, owner_id).await
    }

    async fn get_turns(&self, conversation_id: &str) -> AppResult<Vec<TurnRecord>> {
        self.inner.get_turns(conversation_id).await
    }

    async fn get_turn(&self, conversation_id: &str, turn_id: &str) -> AppResult<Option<TurnRecord>> {
        self.inner.get_turn(conversation_id, turn_id).await
    }

    async fn last_turn_at(&self, conversation_id: &str) -> AppResult<Option<DateTime<Utc>>> {
        inject(&self.failing_stamp_reads)?;
        self.inner.last_turn_at(conversation_id).await
    }

    async fn append_turns(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turns: &[TurnRecord],
    ) -> AppResult<()> {
        inject(&self.failing_appends)?;
        self.record_write();
        self.inner
            .append_turns(conversation_id, owner_id, turns)
            .await
    }

    async fn regenerate(&self, regeneration: &Regeneration) -> AppResult<RegenerationOutcome> {
        inject(&self.failing_regenerations)?;
        self.record_write();
        self.inner.regenerate(regeneration).await
    }

    async fn set_vote(
        &self,
        conversation_id: &str,
        owner_id: &str,
        turn_id: &str,
        vote: Option<Vote>,
    ) -> AppResult<bool> {
        self.record_write();
        self.inner
            .set_vote(conversation_id, owner_id, turn_id, vote)
            .await
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Configuration for tests: fast retries, storage under `root`
pub fn test_config(root: &Path) -> ServerConfig {
    ServerConfig {
        http_port: 0,
        database_url: "sqlite::memory:".to_owned(),
        auth: AuthConfig {
            jwt_secret: TEST_SECRET.to_owned(),
            token_expiry_hours: 1,
        },
        quota: QuotaConfig::default(),
        chat: ChatConfig {
            commit_retry_base_delay: Duration::from_millis(1),
            ..ChatConfig::default()
        },
        llm: LlmConfig::default(),
        storage: StorageConfig {
            root: root.to_path_buf(),
        },
    }
}

/// Fully wired server resources over test doubles
pub struct Harness {
    pub resources: Arc<ServerResources>,
    pub database: Arc<SqliteDatabase>,
    pub store: Arc<CountingStore>,
    pub model: Arc<ScriptedModel>,
    pub storage: Arc<FsObjectStorage>,
    pub identity: Arc<JwtIdentityProvider>,
    _objects: TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut ServerConfig)) -> Self {
        init_test_logging();
        let objects = TempDir::new().unwrap();
        let mut config = test_config(objects.path());
        adjust(&mut config);

        let database = Arc::new(SqliteDatabase::new("sqlite::memory:").await.unwrap());
        let store = Arc::new(CountingStore::new(Arc::clone(&database)));
        let model = Arc::new(ScriptedModel::default());
        let storage = Arc::new(FsObjectStorage::new(objects.path()));
        let identity = Arc::new(JwtIdentityProvider::new(
            config.auth.jwt_secret.as_bytes(),
            config.auth.token_expiry_hours,
        ));

        let resources = Arc::new(ServerResources::new(
            Arc::new(config),
            store.clone(),
            database.clone(),
            model.clone(),
            storage.clone(),
            identity.clone(),
        ));

        Self {
            resources,
            database,
            store,
            model,
            storage,
            identity,
            _objects: objects,
        }
    }

    pub fn orchestrator(&self) -> ChatOrchestrator {
        ChatOrchestrator::new(Arc::clone(&self.resources))
    }

    pub fn router(&self) -> Router {
        routes::router(Arc::clone(&self.resources))
    }

    pub fn token(&self, user_id: &str, role: UserRole) -> String {
        self.identity
            .issue_token(&Identity::new(user_id, role))
            .unwrap()
    }

    /// Create a conversation with alternating user/assistant turns, one second apart
    ///
    /// Writes go straight to the database so the write counter stays at zero.
    pub async fn seed_conversation(
        &self,
        conversation_id: &str,
        owner_id: &str,
        visibility: Visibility,
        texts: &[&str],
    ) -> Vec<TurnRecord> {
        let start = time::now() - chrono::Duration::hours(1);
        let conversation = ConversationRecord::new(conversation_id, owner_id, "Seeded", start);
        assert!(self.database.create_conversation(&conversation).await.unwrap());

        let turns: Vec<TurnRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let role = if i % 2 == 0 {
                    TurnRole::User
                } else {
                    TurnRole::Assistant
                };
                TurnRecord {
                    id: Uuid::new_v4().to_string(),
                    conversation_id: conversation_id.to_owned(),
                    author_id: owner_id.to_owned(),
                    role,
                    parts: vec![TurnPart::text(*text)],
                    metadata: TurnMetadata::default(),
                    created_at: start + chrono::Duration::seconds(i as i64 + 1),
                }
            })
            .collect();
        if !turns.is_empty() {
            self.database
                .append_turns(conversation_id, owner_id, &turns)
                .await
                .unwrap();
        }
        if visibility == Visibility::Public {
            assert!(self
                .database
                .update_visibility(conversation_id, owner_id, visibility, start)
                .await
                .unwrap());
        }
        turns
    }

    /// Current window count of `resource`, zero when never charged
    pub async fn quota_used(&self, user_id: &str, resource: QuotaResource) -> u64 {
        self.database
            .get_counter(user_id, resource)
            .await
            .unwrap()
            .map_or(0, |counter| counter.counter)
    }
}

/// Drain a turn's events until the pipeline closes the channel
pub async fn collect_events(mut events: mpsc::Receiver<TurnEvent>) -> Vec<TurnEvent> {
    let mut collected = Vec::new();
    while let Some(event) = timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("turn did not finish in time")
    {
        collected.push(event);
    }
    collected
}

/// Turns carried by the `finish` event, if one was sent
pub fn finished_turns(events: &[TurnEvent]) -> Option<Vec<TurnRecord>> {
    events.iter().find_map(|event| match event {
        TurnEvent::Finish { turns, .. } => Some(turns.clone()),
        _ => None,
    })
}
