// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Session broker for AI coding agents.
#[derive(Debug, Clone, clap::Parser)]
#[command(name = "switchboard", version, about)]
pub struct Config {
    /// Host address to bind to.
    #[arg(long, env = "SWITCHBOARD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, env = "SWITCHBOARD_PORT", default_value_t = 9700)]
    pub port: u16,

    /// Bearer token for consumer authentication. If unset, auth is disabled.
    #[arg(long, env = "SWITCHBOARD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Max consumer-visible messages retained per session.
    #[arg(long = "max-history", env = "SWITCHBOARD_MAX_HISTORY", default_value_t = 2000)]
    pub max_message_history_length: usize,

    /// Max concurrent sessions.
    #[arg(long, env = "SWITCHBOARD_MAX_SESSIONS", default_value_t = 64)]
    pub max_concurrent_sessions: usize,

    /// Max pending permission requests per session.
    #[arg(long, env = "SWITCHBOARD_MAX_PENDING_PERMISSIONS", default_value_t = 64)]
    pub max_pending_permissions: usize,

    /// Max inbound consumer message size in bytes.
    #[arg(long, env = "SWITCHBOARD_MAX_CONSUMER_MESSAGE_SIZE", default_value_t = 1_048_576)]
    pub max_consumer_message_size: usize,

    /// Outbound buffered-byte threshold above which broadcasts to a consumer
    /// are dropped instead of queued.
    #[arg(long, env = "SWITCHBOARD_BACKPRESSURE_THRESHOLD", default_value_t = 1_048_576)]
    pub backpressure_threshold: usize,

    /// Replay ring capacity (sequenced messages) per session.
    #[arg(long, env = "SWITCHBOARD_REPLAY_RING_SIZE", default_value_t = 4096)]
    pub replay_ring_size: usize,

    /// Initial replay window for consumers connecting without a sequence.
    #[arg(long, env = "SWITCHBOARD_INITIAL_REPLAY_WINDOW", default_value_t = 20)]
    pub initial_replay_window: usize,

    /// Consumer rate limit: tokens refilled per second.
    #[arg(long, env = "SWITCHBOARD_RATE_TOKENS_PER_SECOND", default_value_t = 10.0)]
    pub rate_limit_tokens_per_second: f64,

    /// Consumer rate limit: token bucket burst size.
    #[arg(long, env = "SWITCHBOARD_RATE_BURST_SIZE", default_value_t = 20)]
    pub rate_limit_burst_size: u32,

    /// Idle session timeout in milliseconds (0 = disabled).
    #[arg(long = "idle-timeout-ms", env = "SWITCHBOARD_IDLE_TIMEOUT_MS", default_value_t = 1_800_000)]
    pub idle_session_timeout_ms: u64,

    /// Idle sweep interval in milliseconds.
    #[arg(long, env = "SWITCHBOARD_IDLE_CHECK_INTERVAL_MS", default_value_t = 60_000)]
    pub idle_check_interval_ms: u64,

    /// Grace period before a disconnected callback-style backend is relaunched.
    #[arg(long, env = "SWITCHBOARD_RECONNECT_GRACE_MS", default_value_t = 5_000)]
    pub reconnect_grace_period_ms: u64,

    /// Dedup window: skip a relaunch if another started this recently.
    #[arg(long, env = "SWITCHBOARD_RELAUNCH_DEDUP_MS", default_value_t = 10_000)]
    pub relaunch_dedup_ms: u64,

    /// How long a launched backend may take to call back before relaunch.
    #[arg(long, env = "SWITCHBOARD_RELAUNCH_GRACE_MS", default_value_t = 30_000)]
    pub relaunch_grace_period_ms: u64,

    /// Timeout for the capabilities initialize round-trip.
    #[arg(long, env = "SWITCHBOARD_INITIALIZE_TIMEOUT_MS", default_value_t = 10_000)]
    pub initialize_timeout_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on backend shutdown.
    #[arg(long, env = "SWITCHBOARD_KILL_GRACE_MS", default_value_t = 5_000)]
    pub kill_grace_period_ms: u64,

    /// A resumed backend exiting within this window counts as a resume failure.
    #[arg(long, env = "SWITCHBOARD_RESUME_FAILURE_THRESHOLD_MS", default_value_t = 5_000)]
    pub resume_failure_threshold_ms: u64,

    /// Comma-separated environment variables stripped from spawned backends.
    #[arg(
        long,
        env = "SWITCHBOARD_ENV_DENY_LIST",
        value_delimiter = ',',
        default_value = "SWITCHBOARD_AUTH_TOKEN"
    )]
    pub env_deny_list: Vec<String>,

    /// URL template callback-style backends connect back to.
    /// `{session_id}` is substituted.
    #[arg(
        long = "cli-ws-url-template",
        env = "SWITCHBOARD_CLI_WS_URL_TEMPLATE",
        default_value = "ws://127.0.0.1:9700/ws/backend/{session_id}"
    )]
    pub cli_websocket_url_template: String,

    /// Default backend binary for spawn-style adapters.
    #[arg(long, env = "SWITCHBOARD_DEFAULT_BACKEND_BINARY", default_value = "claude")]
    pub default_backend_binary: String,

    /// Circuit breaker: failures within the window before opening.
    #[arg(long, env = "SWITCHBOARD_BREAKER_FAILURE_THRESHOLD", default_value_t = 5)]
    pub breaker_failure_threshold: usize,

    /// Circuit breaker: sliding window in milliseconds.
    #[arg(long, env = "SWITCHBOARD_BREAKER_WINDOW_MS", default_value_t = 60_000)]
    pub breaker_window_ms: u64,

    /// Circuit breaker: recovery time before probing in milliseconds.
    #[arg(long, env = "SWITCHBOARD_BREAKER_RECOVERY_MS", default_value_t = 30_000)]
    pub breaker_recovery_time_ms: u64,

    /// Circuit breaker: consecutive successes to close from half-open.
    #[arg(long, env = "SWITCHBOARD_BREAKER_SUCCESS_THRESHOLD", default_value_t = 2)]
    pub breaker_success_threshold: usize,

    /// Run slash commands unknown to the backend in a managed PTY.
    #[arg(long, env = "SWITCHBOARD_SLASH_PTY_ENABLED", default_value_t = false)]
    pub slash_command_pty_enabled: bool,

    /// Overall PTY slash-command timeout in milliseconds.
    #[arg(long, env = "SWITCHBOARD_SLASH_PTY_TIMEOUT_MS", default_value_t = 30_000)]
    pub slash_command_pty_timeout_ms: u64,

    /// Output-silence threshold ending a PTY slash command, in milliseconds.
    #[arg(long, env = "SWITCHBOARD_SLASH_PTY_SILENCE_MS", default_value_t = 1_000)]
    pub slash_command_pty_silence_threshold_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "SWITCHBOARD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "SWITCHBOARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_message_history_length == 0 {
            anyhow::bail!("--max-history must be positive");
        }
        if self.replay_ring_size == 0 {
            anyhow::bail!("--replay-ring-size must be positive");
        }
        if self.rate_limit_tokens_per_second <= 0.0 {
            anyhow::bail!("--rate-tokens-per-second must be positive");
        }
        if self.rate_limit_burst_size == 0 {
            anyhow::bail!("--rate-burst-size must be positive");
        }
        if self.breaker_failure_threshold == 0 {
            anyhow::bail!("--breaker-failure-threshold must be positive");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn idle_session_timeout(&self) -> Option<Duration> {
        if self.idle_session_timeout_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.idle_session_timeout_ms))
        }
    }

    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_millis(self.initialize_timeout_ms)
    }

    pub fn kill_grace_period(&self) -> Duration {
        Duration::from_millis(self.kill_grace_period_ms)
    }

    /// Substitute `{session_id}` into the callback URL template.
    pub fn backend_callback_url(&self, session_id: &str) -> String {
        self.cli_websocket_url_template.replace("{session_id}", session_id)
    }
}

impl Default for Config {
    fn default() -> Self {
        use clap::Parser;
        // Parse from an empty argv so defaults and env fall out of the
        // declarations above rather than being duplicated here.
        match Self::try_parse_from(["switchboard"]) {
            Ok(c) => c,
            Err(_) => unreachable_config_default(),
        }
    }
}

// try_parse_from over a fixed argv cannot fail; keep the diverging arm
// out of line so the clippy::panic lint stays scoped.
#[allow(clippy::panic)]
fn unreachable_config_default() -> ! {
    panic!("default config failed to parse")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
