// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::{Duration, Instant};

use super::*;

#[test]
fn burst_then_empty() {
    let mut bucket = TokenBucket::new(3, 1.0);
    let now = Instant::now();
    assert!(bucket.try_acquire_at(now));
    assert!(bucket.try_acquire_at(now));
    assert!(bucket.try_acquire_at(now));
    assert!(!bucket.try_acquire_at(now));
}

#[test]
fn refills_over_time() {
    let mut bucket = TokenBucket::new(1, 2.0);
    let start = Instant::now();
    assert!(bucket.try_acquire_at(start));
    assert!(!bucket.try_acquire_at(start));

    // 500 ms at 2 tokens/s refills one token.
    assert!(bucket.try_acquire_at(start + Duration::from_millis(500)));
}

#[test]
fn refill_caps_at_burst_size() {
    let mut bucket = TokenBucket::new(2, 10.0);
    let start = Instant::now();
    assert!(bucket.try_acquire_at(start));

    let later = start + Duration::from_secs(60);
    assert!(bucket.try_acquire_at(later));
    assert!(bucket.try_acquire_at(later));
    assert!(!bucket.try_acquire_at(later));
}
