// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Switchboard: session broker between human-facing consumers and
//! heterogeneous coding-agent backends.

pub mod adapter;
pub mod bridge;
pub mod broadcast;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod message;
pub mod persist;
pub mod policy;
pub mod project;
pub mod ratelimit;
pub mod reconnect;
pub mod registry;
pub mod router;
pub mod runner;
pub mod session;
pub mod trace;
pub mod transport;
pub mod wire;

pub mod test_support;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::transport::{build_router, TransportState};

/// Run the broker server until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let coordinator = Coordinator::builder(config).shutdown(shutdown.clone()).build();
    let restored = coordinator.restore().await?;
    if restored > 0 {
        tracing::info!(restored, "rehydrated persisted sessions");
    }

    let state = TransportState::new(Arc::clone(&coordinator));
    let router = build_router(state);

    tracing::info!("switchboard listening on {addr}");
    let listener = TcpListener::bind(&addr).await?;
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        }
    });
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    coordinator.close().await;
    Ok(())
}
