// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use super::*;

#[tokio::test]
async fn scrapes_command_output() -> anyhow::Result<()> {
    let runner = PtyRunner::new("echo", Duration::from_secs(5), Duration::from_millis(300));
    let output = runner.run("/hello-from-pty", None).await?;
    assert!(output.contains("/hello-from-pty"), "got: {output:?}");
    Ok(())
}

#[tokio::test]
async fn overall_timeout_fails_the_command() {
    let runner = PtyRunner::new("sleep", Duration::from_millis(200), Duration::from_millis(50));
    let result = runner.run("10", None).await;
    let message = result.err().map(|e| e.to_string()).unwrap_or_default();
    assert!(message.contains("timed out"), "got: {message:?}");
}

#[tokio::test]
async fn silence_threshold_ends_collection_early() -> anyhow::Result<()> {
    // `echo` prints immediately and exits; collection should end well
    // before the overall timeout.
    let runner = PtyRunner::new("echo", Duration::from_secs(30), Duration::from_millis(200));
    let started = std::time::Instant::now();
    let _ = runner.run("quick", None).await?;
    assert!(started.elapsed() < Duration::from_secs(5));
    Ok(())
}
