// ABOUTME: Chat route handlers for the turn endpoint and conversation management
// ABOUTME: Streams turn events over SSE and exposes owner-only conversation edits
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Chat routes
//!
//! Handlers authenticate the caller from the `Authorization` header and hand
//! off to the service layer. `POST /api/chat` answers with an event stream
//! once every pre-stream check passed; earlier failures are plain JSON errors.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures_util::stream::Stream;
use http::header::AUTHORIZATION;
use http::{HeaderMap, StatusCode};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::info;

use crate::constants::routes;
use crate::errors::{AppError, ErrorCode};
use crate::models::time::now;
use crate::models::{ConversationSummary, Identity, Visibility, Vote};
use crate::resources::ServerResources;
use crate::services::admission::AdmissionController;
use crate::services::chat_orchestration::{ChatOrchestrator, ChatTurnRequest, TurnEvent};
use crate::services::conversations::ConversationService;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for listing conversations
#[derive(Debug, Deserialize, Default)]
pub struct ListConversationsQuery {
    /// Page size, clamped to the server maximum
    #[serde(default)]
    pub limit: Option<i64>,
    /// Rows to skip
    #[serde(default)]
    pub offset: Option<i64>,
}

/// Response for listing conversations
#[derive(Debug, Serialize)]
pub struct ConversationListResponse {
    /// Conversations on this page
    pub conversations: Vec<ConversationSummary>,
    /// Number returned
    pub total: usize,
}

/// Request to rename a conversation
#[derive(Debug, Deserialize)]
pub struct UpdateTitleRequest {
    /// New title
    pub title: String,
}

/// Request to change visibility
#[derive(Debug, Deserialize)]
pub struct UpdateVisibilityRequest {
    /// New visibility
    pub visibility: Visibility,
}

/// Request to vote on an assistant turn
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    /// `up`, `down`, or null to clear
    #[serde(default)]
    pub vote: Option<Vote>,
}

// ============================================================================
// Chat Routes
// ============================================================================

/// Chat routes handler
pub struct ChatRoutes;

impl ChatRoutes {
    /// Create all chat routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            // Turn pipeline
            .route(routes::CHAT, post(Self::send_turn))
            // Conversation management
            .route(routes::CONVERSATIONS, get(Self::list_conversations))
            .route(
                "/api/chat/conversations/:conversation_id",
                get(Self::get_conversation).delete(Self::delete_conversation),
            )
            .route(
                "/api/chat/conversations/:conversation_id/title",
                put(Self::update_title),
            )
            .route(
                "/api/chat/conversations/:conversation_id/visibility",
                put(Self::update_visibility),
            )
            .route(
                "/api/chat/conversations/:conversation_id/turns/:turn_id/vote",
                put(Self::vote),
            )
            .route(routes::QUOTA, get(Self::quota))
            .with_state(resources)
    }

    /// Resolve the caller from the `Authorization` header
    async fn authenticate(
        headers: &HeaderMap,
        resources: &ServerResources,
    ) -> Result<Identity, AppError> {
        let authorization = headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        resources.identity.authenticate(authorization).await
    }

    fn conversations(resources: &ServerResources) -> ConversationService<'_> {
        ConversationService::new(
            resources.store.as_ref(),
            resources.config.chat.title_max_length,
        )
    }

    // ========================================================================
    // Turn Handler
    // ========================================================================

    /// Run a chat turn and stream its events
    async fn send_turn(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Json(request): Json<ChatTurnRequest>,
    ) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        info!(
            user.id = %identity.user_id,
            chat.conversation = %request.conversation_id,
            chat.trigger = ?request.trigger,
            "Chat turn requested"
        );

        let events = ChatOrchestrator::new(Arc::clone(&resources))
            .start_turn(identity, request)
            .await?;

        let stream =
            ReceiverStream::new(events).map(|event| Ok::<_, Infallible>(to_sse_event(&event)));
        Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
    }

    // ========================================================================
    // Conversation Handlers
    // ========================================================================

    /// List the caller's conversations
    async fn list_conversations(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Query(query): Query<ListConversationsQuery>,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        let conversations = Self::conversations(&resources)
            .list(&identity.user_id, query.limit, query.offset)
            .await?;

        let response = ConversationListResponse {
            total: conversations.len(),
            conversations,
        };
        Ok((StatusCode::OK, Json(response)).into_response())
    }

    /// Get a conversation with its turns
    async fn get_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        let detail = Self::conversations(&resources)
            .get(&identity.user_id, &conversation_id)
            .await?;
        Ok((StatusCode::OK, Json(detail)).into_response())
    }

    /// Rename a conversation
    async fn update_title(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
        Json(request): Json<UpdateTitleRequest>,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        let conversation = Self::conversations(&resources)
            .rename(&identity.user_id, &conversation_id, &request.title, now())
            .await?;
        Ok((StatusCode::OK, Json(conversation)).into_response())
    }

    /// Share or unshare a conversation
    async fn update_visibility(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
        Json(request): Json<UpdateVisibilityRequest>,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        let conversation = Self::conversations(&resources)
            .set_visibility(&identity.user_id, &conversation_id, request.visibility, now())
            .await?;
        Ok((StatusCode::OK, Json(conversation)).into_response())
    }

    /// Delete a conversation
    async fn delete_conversation(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path(conversation_id): Path<String>,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        Self::conversations(&resources)
            .delete(&identity.user_id, &conversation_id)
            .await?;
        Ok(StatusCode::NO_CONTENT.into_response())
    }

    /// Vote on an assistant turn
    async fn vote(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
        Path((conversation_id, turn_id)): Path<(String, String)>,
        Json(request): Json<VoteRequest>,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        let turn = Self::conversations(&resources)
            .vote(&identity.user_id, &conversation_id, &turn_id, request.vote)
            .await?;
        Ok((StatusCode::OK, Json(turn)).into_response())
    }

    /// Caller's quota usage
    async fn quota(
        State(resources): State<Arc<ServerResources>>,
        headers: HeaderMap,
    ) -> Result<Response, AppError> {
        let identity = Self::authenticate(&headers, &resources).await?;
        let snapshot = AdmissionController::new(resources.quota.as_ref(), &resources.config.quota)
            .snapshot(&identity, now())
            .await?;
        Ok((StatusCode::OK, Json(snapshot)).into_response())
    }
}

fn to_sse_event(event: &TurnEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            let fallback = TurnEvent::Error {
                code: ErrorCode::SerializationError,
                message: format!("Failed to encode event: {e}"),
            };
            Event::default().data(serde_json::to_string(&fallback).unwrap_or_default())
        }
    }
}
