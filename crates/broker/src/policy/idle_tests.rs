// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::test_support::{bucket, conn, BridgeHarness, RecordingSink};
use crate::wire::ConsumerRole;

fn policy(h: &BridgeHarness, timeout_ms: u64) -> IdlePolicy {
    IdlePolicy::new(
        std::sync::Arc::clone(&h.bridge),
        h.harness.bus.clone(),
        Duration::from_millis(timeout_ms),
        Duration::from_millis(10),
        CancellationToken::new(),
    )
}

#[tokio::test]
async fn sweep_reaps_abandoned_sessions() -> anyhow::Result<()> {
    let h = BridgeHarness::new();
    let _runtime = h.session("s-1").await;

    let policy = policy(&h, 0);
    policy.sweep().await;

    assert!(h.bridge.session("s-1").await.is_none());
    Ok(())
}

#[tokio::test]
async fn sweep_spares_sessions_with_consumers() -> anyhow::Result<()> {
    let h = BridgeHarness::new();
    let runtime = h.session("s-1").await;
    runtime
        .lock()
        .await
        .attach_consumer(conn("c-1", ConsumerRole::Participant, RecordingSink::new()), bucket());

    policy(&h, 0).sweep().await;
    assert!(h.bridge.session("s-1").await.is_some());
    Ok(())
}

#[tokio::test]
async fn sweep_spares_sessions_with_backends() -> anyhow::Result<()> {
    let mut h = BridgeHarness::new();
    let _runtime = h.session("s-1").await;
    let _endpoints = h.connect_backend("s-1").await?;

    policy(&h, 0).sweep().await;
    assert!(h.bridge.session("s-1").await.is_some());
    Ok(())
}

#[tokio::test]
async fn sweep_spares_recently_active_sessions() -> anyhow::Result<()> {
    let h = BridgeHarness::new();
    let _runtime = h.session("s-1").await;

    // Timeout far in the future: last_activity is "now".
    policy(&h, 60_000).sweep().await;
    assert!(h.bridge.session("s-1").await.is_some());
    Ok(())
}

#[tokio::test]
async fn running_policy_reaps_on_its_own() -> anyhow::Result<()> {
    let h = BridgeHarness::new();
    let _runtime = h.session("s-1").await;
    let mut events = h.harness.bus.subscribe();

    let shutdown = CancellationToken::new();
    let policy = IdlePolicy::new(
        std::sync::Arc::clone(&h.bridge),
        h.harness.bus.clone(),
        Duration::from_millis(100),
        Duration::from_millis(10),
        shutdown.clone(),
    );
    let task = tokio::spawn(policy.run());

    // Within ~150 ms the session must be gone and session:closed emitted.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(1500);
    let mut closed = false;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(100), events.recv()).await {
            Ok(Ok(crate::bus::DomainEvent::SessionClosed { ref session_id }))
                if session_id == "s-1" =>
            {
                closed = true;
                break;
            }
            _ => continue,
        }
    }
    assert!(closed);
    assert!(h.bridge.session("s-1").await.is_none());

    shutdown.cancel();
    let _ = task.await;
    Ok(())
}
