// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process spawn contract for adapters that launch local backends.
//!
//! Binaries are validated before anything touches the OS: absolute paths and
//! bare names each match a strict character set, non-absolute names resolve
//! through a PATH lookup, and a configurable deny-list strips variables from
//! the inherited environment. A before-spawn hook may inject guardrails; a
//! hook error is a spawn failure.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use anyhow::Context;
use regex::Regex;

/// Absolute binary paths must match this.
const ABSOLUTE_PATTERN: &str = r"^/[A-Za-z0-9_./-]+$";
/// Bare binary names must match this.
const BASENAME_PATTERN: &str = r"^[A-Za-z0-9_.-]+$";

fn absolute_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        Regex::new(ABSOLUTE_PATTERN).unwrap()
    })
}

fn basename_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        #[allow(clippy::unwrap_used)] // pattern is a compile-time constant
        Regex::new(BASENAME_PATTERN).unwrap()
    })
}

/// What to spawn. Hooks may rewrite any field before the OS sees it.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub binary: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    /// Declared environment, overlaid on the (deny-list-filtered) inherited
    /// environment.
    pub env: Vec<(String, String)>,
}

impl SpawnSpec {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into(), args: Vec::new(), cwd: None, env: Vec::new() }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Guardrail hook invoked just before spawn. An error aborts the spawn.
pub type BeforeSpawnHook = Arc<dyn Fn(&mut SpawnSpec) -> anyhow::Result<()> + Send + Sync>;

/// Validated process launcher shared by spawn-style adapters and the
/// inverted-connection launcher.
#[derive(Clone, Default)]
pub struct ProcessLauncher {
    deny_list: Vec<String>,
    hook: Option<BeforeSpawnHook>,
}

impl ProcessLauncher {
    pub fn new(deny_list: Vec<String>) -> Self {
        Self { deny_list, hook: None }
    }

    pub fn with_hook(mut self, hook: BeforeSpawnHook) -> Self {
        self.hook = Some(hook);
        self
    }

    /// Validate a binary name or path against the allowed character sets.
    pub fn validate_binary(binary: &str) -> anyhow::Result<()> {
        if binary.is_empty() {
            anyhow::bail!("empty binary name");
        }
        let ok = if binary.starts_with('/') {
            absolute_re().is_match(binary)
        } else {
            basename_re().is_match(binary)
        };
        if !ok {
            anyhow::bail!("binary name rejected by validation: {binary}");
        }
        Ok(())
    }

    /// Resolve a validated binary to an absolute path, using a PATH lookup
    /// for bare names.
    pub fn resolve_binary(binary: &str) -> anyhow::Result<PathBuf> {
        Self::validate_binary(binary)?;
        if binary.starts_with('/') {
            return Ok(PathBuf::from(binary));
        }
        which::which(binary).with_context(|| format!("binary not found on PATH: {binary}"))
    }

    /// Spawn a child process per the contract. Stdio is piped.
    pub fn spawn(&self, mut spec: SpawnSpec) -> anyhow::Result<tokio::process::Child> {
        if let Some(hook) = &self.hook {
            hook(&mut spec).context("before-spawn hook failed")?;
        }

        let program = Self::resolve_binary(&spec.binary)?;

        let mut command = tokio::process::Command::new(&program);
        command
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &spec.cwd {
            command.current_dir(cwd);
        }
        for key in &self.deny_list {
            command.env_remove(key);
        }
        for (key, value) in &spec.env {
            command.env(key, value);
        }

        command.spawn().with_context(|| format!("failed to spawn {}", program.display()))
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
