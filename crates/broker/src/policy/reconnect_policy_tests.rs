// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::*;
use crate::bus::DomainEvent;
use crate::test_support::BridgeHarness;

fn spawn_policy(
    h: &BridgeHarness,
    grace_ms: u64,
    dedup_ms: u64,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let policy = ReconnectPolicy::new(
        Arc::clone(&h.bridge),
        Arc::clone(&h.lifecycle),
        h.harness.bus.clone(),
        Duration::from_millis(grace_ms),
        Duration::from_millis(dedup_ms),
        shutdown,
    );
    tokio::spawn(policy.run())
}

async fn wait_for_relaunch_needed(
    events: &mut tokio::sync::broadcast::Receiver<DomainEvent>,
    within: Duration,
) -> usize {
    let deadline = tokio::time::Instant::now() + within;
    let mut count = 0;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(50), events.recv()).await {
            Ok(Ok(DomainEvent::RelaunchNeeded { .. })) => count += 1,
            Ok(Ok(_)) => continue,
            Ok(Err(_)) => break,
            Err(_) => continue,
        }
    }
    count
}

#[tokio::test]
async fn disconnect_without_reconnect_requests_relaunch() -> anyhow::Result<()> {
    let h = BridgeHarness::with_style(crate::adapter::ConnectionStyle::Inverted);
    let _runtime = h.session("s-1").await;
    let mut events = h.harness.bus.subscribe();

    let shutdown = CancellationToken::new();
    let task = spawn_policy(&h, 50, 10_000, shutdown.clone());

    h.harness.bus.emit(DomainEvent::BackendDisconnected { session_id: "s-1".to_owned() });

    let relaunches = wait_for_relaunch_needed(&mut events, Duration::from_millis(500)).await;
    assert_eq!(relaunches, 1);

    shutdown.cancel();
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn reconnect_within_grace_cancels_relaunch() -> anyhow::Result<()> {
    let h = BridgeHarness::with_style(crate::adapter::ConnectionStyle::Inverted);
    let _runtime = h.session("s-1").await;
    let mut events = h.harness.bus.subscribe();

    let shutdown = CancellationToken::new();
    let task = spawn_policy(&h, 200, 10_000, shutdown.clone());

    h.harness.bus.emit(DomainEvent::BackendDisconnected { session_id: "s-1".to_owned() });
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.harness.bus.emit(DomainEvent::BackendConnected { session_id: "s-1".to_owned() });

    let relaunches = wait_for_relaunch_needed(&mut events, Duration::from_millis(500)).await;
    assert_eq!(relaunches, 0);

    shutdown.cancel();
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn rapid_disconnects_dedup_relaunches() -> anyhow::Result<()> {
    let h = BridgeHarness::with_style(crate::adapter::ConnectionStyle::Inverted);
    let _runtime = h.session("s-1").await;
    let mut events = h.harness.bus.subscribe();

    let shutdown = CancellationToken::new();
    let task = spawn_policy(&h, 30, 60_000, shutdown.clone());

    for _ in 0..3 {
        h.harness.bus.emit(DomainEvent::BackendDisconnected { session_id: "s-1".to_owned() });
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    let relaunches = wait_for_relaunch_needed(&mut events, Duration::from_millis(300)).await;
    assert_eq!(relaunches, 1);

    shutdown.cancel();
    let _ = task.await;
    Ok(())
}

#[tokio::test]
async fn direct_adapters_are_ignored() -> anyhow::Result<()> {
    let h = BridgeHarness::with_style(crate::adapter::ConnectionStyle::Direct);
    let _runtime = h.session("s-1").await;
    let mut events = h.harness.bus.subscribe();

    let shutdown = CancellationToken::new();
    let task = spawn_policy(&h, 30, 10_000, shutdown.clone());

    h.harness.bus.emit(DomainEvent::BackendDisconnected { session_id: "s-1".to_owned() });

    let relaunches = wait_for_relaunch_needed(&mut events, Duration::from_millis(300)).await;
    assert_eq!(relaunches, 0);

    shutdown.cancel();
    let _ = task.await;
    Ok(())
}
