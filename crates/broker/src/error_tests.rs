// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    unauthorized = { ErrorCode::Unauthorized, 401, "UNAUTHORIZED" },
    bad_request = { ErrorCode::BadRequest, 400, "BAD_REQUEST" },
    too_large = { ErrorCode::MessageTooLarge, 413, "MESSAGE_TOO_LARGE" },
    rate_limited = { ErrorCode::RateLimited, 429, "RATE_LIMITED" },
    unknown_session = { ErrorCode::UnknownSession, 404, "UNKNOWN_SESSION" },
    session_active = { ErrorCode::SessionActive, 409, "SESSION_ACTIVE" },
    backend_unavailable = { ErrorCode::BackendUnavailable, 503, "BACKEND_UNAVAILABLE" },
    command_failed = { ErrorCode::CommandFailed, 502, "COMMAND_FAILED" },
    internal = { ErrorCode::Internal, 500, "INTERNAL" },
)]
fn code_mappings(code: ErrorCode, status: u16, name: &str) {
    assert_eq!(code.http_status(), status);
    assert_eq!(code.as_str(), name);
    assert_eq!(code.to_string(), name);
}

#[test]
fn to_consumer_builds_structured_error() -> anyhow::Result<()> {
    let msg = ErrorCode::RateLimited.to_consumer("slow down");
    let json = serde_json::to_value(&msg)?;
    assert_eq!(json["type"], "error");
    assert_eq!(json["code"], "RATE_LIMITED");
    assert_eq!(json["message"], "slow down");
    Ok(())
}
