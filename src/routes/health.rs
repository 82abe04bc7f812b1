// ABOUTME: Health check route handlers for service monitoring
// ABOUTME: Reports liveness, model reachability and the commit failure counter
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! Health check routes for service monitoring

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;

use crate::constants::{routes, service_names};
use crate::resources::ServerResources;

/// Health routes implementation
pub struct HealthRoutes;

impl HealthRoutes {
    /// Create all health check routes
    pub fn routes(resources: Arc<ServerResources>) -> Router {
        Router::new()
            .route(routes::HEALTH, get(Self::health))
            .route("/ready", get(Self::ready))
            .with_state(resources)
    }

    async fn health(State(resources): State<Arc<ServerResources>>) -> Json<Value> {
        Json(json!({
            "status": "healthy",
            "service": service_names::COLLOQUY_SERVER,
            "version": env!("CARGO_PKG_VERSION"),
            "commit_failures": resources.commit_failures(),
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }

    async fn ready(State(resources): State<Arc<ServerResources>>) -> Json<Value> {
        let model_reachable = match resources.model.health_check().await {
            Ok(reachable) => reachable,
            Err(e) => {
                warn!(model = resources.model.name(), error = %e, "Model health check failed");
                false
            }
        };
        Json(json!({
            "status": if model_reachable { "ready" } else { "degraded" },
            "model": resources.model.name(),
            "model_reachable": model_reachable,
            "timestamp": Utc::now().to_rfc3339(),
        }))
    }
}
