// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Managed PTY fallback for slash commands the backend does not know.
//!
//! A command known to be executable in the tool's own TUI runs in a managed
//! PTY session; output is scraped until the stream goes silent (or an
//! overall timeout fires) and returned as the command result. Entirely
//! optional — the broker works without a runner, reporting unknown commands
//! as structured errors instead.

use std::ffi::CString;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::pin::Pin;
use std::time::Duration;

use anyhow::Context;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag};
use nix::unistd::Pid;
use tokio::io::unix::AsyncFd;

/// Narrow seam the bridge talks to. One implementation per execution
/// strategy; `None` disables the fallback entirely.
pub trait CommandRunner: Send + Sync {
    fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>>;
}

/// PTY-backed runner: spawns the configured tool binary with the command,
/// scrapes output until silence.
pub struct PtyRunner {
    binary: String,
    timeout: Duration,
    silence_threshold: Duration,
}

impl PtyRunner {
    pub fn new(binary: impl Into<String>, timeout: Duration, silence_threshold: Duration) -> Self {
        Self { binary: binary.into(), timeout, silence_threshold }
    }
}

impl CommandRunner for PtyRunner {
    fn run(
        &self,
        command: &str,
        cwd: Option<&str>,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<String>> + Send + '_>> {
        let command = command.to_owned();
        let cwd = cwd.map(str::to_owned);
        Box::pin(async move {
            let overall = tokio::time::timeout(
                self.timeout,
                scrape_pty(&self.binary, &command, cwd.as_deref(), self.silence_threshold),
            )
            .await;
            match overall {
                Ok(result) => result,
                Err(_) => anyhow::bail!("command timed out: {command}"),
            }
        })
    }
}

/// Newtype wrapper around `OwnedFd` for use with `AsyncFd`.
#[derive(Debug)]
struct PtyFd(std::os::fd::OwnedFd);

impl AsRawFd for PtyFd {
    fn as_raw_fd(&self) -> std::os::fd::RawFd {
        self.0.as_raw_fd()
    }
}

fn set_nonblocking(fd: &impl std::os::fd::AsFd) -> std::io::Result<()> {
    let flags = fcntl(fd, FcntlArg::F_GETFL).map_err(io_err)?;
    let flags = OFlag::from_bits_truncate(flags);
    fcntl(fd, FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io_err)?;
    Ok(())
}

fn io_err(e: nix::errno::Errno) -> std::io::Error {
    std::io::Error::from_raw_os_error(e as i32)
}

/// Spawn `binary command` on a fresh PTY and collect output until the
/// stream stays silent for `silence_threshold`.
// forkpty requires unsafe: post-fork child is partially initialized
#[allow(unsafe_code)]
async fn scrape_pty(
    binary: &str,
    command: &str,
    cwd: Option<&str>,
    silence_threshold: Duration,
) -> anyhow::Result<String> {
    let winsize = Winsize { ws_col: 120, ws_row: 40, ws_xpixel: 0, ws_ypixel: 0 };

    // SAFETY: forkpty is unsafe because the child is in a
    // partially-initialized state after fork. We immediately exec.
    let result = unsafe { forkpty(&winsize, None) }.context("forkpty failed")?;

    match result {
        ForkptyResult::Child => {
            if let Some(dir) = cwd {
                let _ = std::env::set_current_dir(dir);
            }
            std::env::set_var("TERM", "dumb");
            let argv: Vec<CString> = [binary, command]
                .iter()
                .map(|s| CString::new(s.as_bytes()))
                .collect::<Result<_, _>>()
                .context("invalid command argument")?;
            nix::unistd::execvp(&argv[0], &argv).context("execvp failed")?;
            unreachable!();
        }
        ForkptyResult::Parent { child, master } => {
            set_nonblocking(&master)?;
            let afd = AsyncFd::new(PtyFd(master)).context("AsyncFd::new failed")?;
            let output = collect_until_silent(&afd, silence_threshold).await;
            reap(child);
            Ok(output)
        }
    }
}

/// Read until EOF or until no output arrives within the silence threshold.
async fn collect_until_silent(afd: &AsyncFd<PtyFd>, silence_threshold: Duration) -> String {
    let mut collected: Vec<u8> = Vec::new();
    let mut buf = vec![0u8; 8192];
    loop {
        let read = tokio::time::timeout(silence_threshold, read_chunk(afd, &mut buf)).await;
        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => collected.extend_from_slice(&buf[..n]),
            Ok(Err(_)) => break,
            Err(_) => break, // silence threshold reached
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

async fn read_chunk(afd: &AsyncFd<PtyFd>, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            let n = nix::unistd::read(inner, buf).map_err(io_err)?;
            Ok(n)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

/// Terminate and reap the child without blocking the runtime.
fn reap(child: Pid) {
    let _ = kill(child, Signal::SIGTERM);
    std::thread::spawn(move || {
        for _ in 0..50 {
            match waitpid(child, Some(WaitPidFlag::WNOHANG)) {
                Ok(nix::sys::wait::WaitStatus::StillAlive) => {
                    std::thread::sleep(Duration::from_millis(100));
                }
                _ => return,
            }
        }
        let _ = kill(child, Signal::SIGKILL);
        let _ = waitpid(child, None);
    });
}

#[cfg(test)]
#[path = "runner_tests.rs"]
mod tests;
