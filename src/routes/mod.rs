// ABOUTME: Route module organization for the Colloquy HTTP endpoints
// ABOUTME: Assembles chat and health routes behind request-id and tracing middleware
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Route module for Colloquy
//!
//! Each domain module contains route definitions and thin handlers that
//! delegate to the service layer.

/// Chat turn and conversation routes
pub mod chat;
/// Health check and readiness routes
pub mod health;

use std::sync::Arc;

use axum::Router;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::resources::ServerResources;

/// Chat route handlers
pub use chat::ChatRoutes;
/// Health check route handlers
pub use health::HealthRoutes;

/// Every route of the server with its middleware stack
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(HealthRoutes::routes(Arc::clone(&resources)))
        .merge(ChatRoutes::routes(resources))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
}
