// ABOUTME: Colloquy server binary wiring configuration, storage, model client and routes
// ABOUTME: Serves the chat turn endpoint over HTTP until interrupted
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Pierre Fitness Intelligence

//! # Colloquy Server Binary
//!
//! Loads configuration from the environment, opens the SQLite store and the
//! object storage root, and serves the chat routes.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colloquy_server::{
    auth::JwtIdentityProvider,
    config::environment::ServerConfig,
    database::SqliteDatabase,
    llm::{OpenAiCompatibleClient, OpenAiCompatibleConfig},
    logging,
    resources::ServerResources,
    routes,
    storage::FsObjectStorage,
};
use tokio::fs;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "colloquy-server")]
#[command(about = "Colloquy - chat turn orchestrator with streamed model replies")]
pub struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    logging::init_from_env()?;
    info!("Starting Colloquy server");
    info!("{}", config.summary());

    let database = Arc::new(SqliteDatabase::new(&config.database_url).await?);
    info!("Database initialized: {}", config.database_url);

    fs::create_dir_all(&config.storage.root)
        .await
        .with_context(|| format!("Failed to create {}", config.storage.root.display()))?;
    let storage = Arc::new(FsObjectStorage::new(config.storage.root.clone()));

    let model = Arc::new(OpenAiCompatibleClient::new(OpenAiCompatibleConfig::from(
        &config.llm,
    ))?);
    let identity = Arc::new(JwtIdentityProvider::new(
        config.auth.jwt_secret.as_bytes(),
        config.auth.token_expiry_hours,
    ));

    let port = config.http_port;
    let resources = Arc::new(ServerResources::new(
        Arc::new(config),
        database.clone(),
        database,
        model,
        storage,
        identity,
    ));

    let app = routes::router(resources);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("Failed to bind port {port}"))?;
    info!("Colloquy listening on port {port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Colloquy server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
