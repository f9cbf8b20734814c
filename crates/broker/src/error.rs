// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::wire::ConsumerMessage;

/// Unified error codes shared across the WebSocket and HTTP transports.
///
/// Consumers only ever see these codes plus a human-readable string; raw
/// internal errors never cross the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    BadRequest,
    MessageTooLarge,
    RateLimited,
    UnknownSession,
    SessionActive,
    BackendUnavailable,
    CommandFailed,
    Internal,
}

impl ErrorCode {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::BadRequest => 400,
            Self::MessageTooLarge => 413,
            Self::RateLimited => 429,
            Self::UnknownSession => 404,
            Self::SessionActive => 409,
            Self::BackendUnavailable => 503,
            Self::CommandFailed => 502,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::BadRequest => "BAD_REQUEST",
            Self::MessageTooLarge => "MESSAGE_TOO_LARGE",
            Self::RateLimited => "RATE_LIMITED",
            Self::UnknownSession => "UNKNOWN_SESSION",
            Self::SessionActive => "SESSION_ACTIVE",
            Self::BackendUnavailable => "BACKEND_UNAVAILABLE",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::Internal => "INTERNAL",
        }
    }

    /// Build the structured error message a consumer sees for this code.
    pub fn to_consumer(self, message: impl Into<String>) -> ConsumerMessage {
        ConsumerMessage::Error { code: self.as_str().to_owned(), message: message.into() }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
