// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for consumers.

pub mod ws;

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::coordinator::Coordinator;

/// Pluggable consumer authentication.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, session_id: &str, token: Option<&str>) -> bool;
}

/// Shared-token authenticator. With no token configured, all consumers are
/// accepted.
pub struct TokenAuthenticator {
    token: Option<String>,
}

impl TokenAuthenticator {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl Authenticator for TokenAuthenticator {
    fn authenticate(&self, _session_id: &str, token: Option<&str>) -> bool {
        match &self.token {
            None => true,
            Some(expected) => token == Some(expected.as_str()),
        }
    }
}

/// Shared transport state passed to all handlers via axum `State`.
pub struct TransportState {
    pub coordinator: Arc<Coordinator>,
    pub authenticator: Arc<dyn Authenticator>,
}

impl TransportState {
    pub fn new(coordinator: Arc<Coordinator>) -> Arc<Self> {
        let authenticator =
            Arc::new(TokenAuthenticator::new(coordinator.config().auth_token.clone()));
        Arc::new(Self { coordinator, authenticator })
    }

    pub fn with_authenticator(
        coordinator: Arc<Coordinator>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Arc<Self> {
        Arc::new(Self { coordinator, authenticator })
    }
}

/// Build the axum `Router` with all broker routes.
pub fn build_router(state: Arc<TransportState>) -> Router {
    Router::new()
        // Health (no auth)
        .route("/api/v1/health", get(health))
        // Consumer WebSocket
        .route("/ws/{session_id}", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    sessions: usize,
    uptime_secs: u64,
}

async fn health(State(state): State<Arc<TransportState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        sessions: state.coordinator.bridge().session_count().await,
        uptime_secs: state.coordinator.uptime_secs(),
    })
}
