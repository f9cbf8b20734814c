// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reconnection support: per-session sequencing and bounded replay history.
//!
//! Every broadcast is wrapped with a monotonic per-session sequence number
//! and recorded in a ring. A reconnecting consumer reports its last seen
//! sequence and receives everything newer that has not fallen off the ring,
//! in insertion order. Consumers presenting an unknown id are brand new and
//! get a short initial window instead.

use std::collections::{HashMap, HashSet, VecDeque};

use tokio::sync::RwLock;

use crate::session::epoch_ms;
use crate::wire::{ConsumerMessage, SequencedMessage};

struct SessionReplay {
    next_seq: u64,
    ring: VecDeque<SequencedMessage>,
    cap: usize,
    last_seen: HashMap<String, u64>,
    known_consumers: HashSet<String>,
}

impl SessionReplay {
    fn new(cap: usize) -> Self {
        Self {
            next_seq: 1,
            ring: VecDeque::new(),
            cap,
            last_seen: HashMap::new(),
            known_consumers: HashSet::new(),
        }
    }
}

/// Owner of all replay state. One per broker process.
pub struct ReconnectionHandler {
    ring_cap: usize,
    sessions: RwLock<HashMap<String, SessionReplay>>,
}

impl ReconnectionHandler {
    pub fn new(ring_cap: usize) -> Self {
        Self { ring_cap, sessions: RwLock::new(HashMap::new()) }
    }

    /// Assign the next sequence number to `payload` and record the wrapper
    /// in the session's ring, dropping the oldest entry on overflow.
    pub async fn assign(&self, session_id: &str, payload: ConsumerMessage) -> SequencedMessage {
        let mut sessions = self.sessions.write().await;
        let replay = sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionReplay::new(self.ring_cap));
        let seq = replay.next_seq;
        replay.next_seq += 1;
        let wrapped = SequencedMessage {
            seq,
            message_id: uuid::Uuid::new_v4().to_string(),
            timestamp_ms: epoch_ms(),
            payload,
        };
        replay.ring.push_back(wrapped.clone());
        while replay.ring.len() > replay.cap {
            replay.ring.pop_front();
        }
        wrapped
    }

    /// Sequenced messages with `seq > last_seen` still on the ring,
    /// insertion-ordered.
    pub async fn replay_after(&self, session_id: &str, last_seen: u64) -> Vec<SequencedMessage> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(replay) => {
                replay.ring.iter().filter(|m| m.seq > last_seen).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// The newest `window` messages, for consumers with no replay cursor.
    pub async fn initial_window(&self, session_id: &str, window: usize) -> Vec<SequencedMessage> {
        let sessions = self.sessions.read().await;
        match sessions.get(session_id) {
            Some(replay) => {
                let skip = replay.ring.len().saturating_sub(window);
                replay.ring.iter().skip(skip).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Highest sequence assigned so far (0 before the first broadcast).
    pub async fn latest_seq(&self, session_id: &str) -> u64 {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).map(|r| r.next_seq - 1).unwrap_or(0)
    }

    /// Record the last sequence a consumer has seen (on disconnect).
    pub async fn record_last_seen(&self, session_id: &str, consumer_id: &str, seq: u64) {
        let mut sessions = self.sessions.write().await;
        let replay = sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionReplay::new(self.ring_cap));
        replay.last_seen.insert(consumer_id.to_owned(), seq);
    }

    pub async fn last_seen(&self, session_id: &str, consumer_id: &str) -> Option<u64> {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).and_then(|r| r.last_seen.get(consumer_id).copied())
    }

    /// Whether the session has seen this consumer id before.
    pub async fn is_known(&self, session_id: &str, consumer_id: &str) -> bool {
        let sessions = self.sessions.read().await;
        sessions.get(session_id).is_some_and(|r| r.known_consumers.contains(consumer_id))
    }

    /// Register a consumer id with the session. Returns true if the id was
    /// already known (a reconnect).
    pub async fn register_consumer(&self, session_id: &str, consumer_id: &str) -> bool {
        let mut sessions = self.sessions.write().await;
        let replay = sessions
            .entry(session_id.to_owned())
            .or_insert_with(|| SessionReplay::new(self.ring_cap));
        !replay.known_consumers.insert(consumer_id.to_owned())
    }

    /// Forget a closed session entirely.
    pub async fn drop_session(&self, session_id: &str) {
        self.sessions.write().await.remove(session_id);
    }
}

#[cfg(test)]
#[path = "reconnect_tests.rs"]
mod tests;
