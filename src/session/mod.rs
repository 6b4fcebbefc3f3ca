//! JDI-011: Execution sessions. One long-lived shell fed statement by statement.
//!
//! The controller only sees [`ExecSession`]. [`process::ProcessSession`]
//! backs it with a local `bash` or a container started through the
//! `docker` CLI, so the isolation mechanism can change without touching
//! orchestration.

pub mod builder;
pub mod process;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A single-writer command channel into a running shell.
#[async_trait]
pub trait ExecSession: Send {
    /// Send one statement and wait for its exit status.
    async fn send(&mut self, statement: &str) -> std::io::Result<i32>;

    /// Ask the shell to exit and close the write channel.
    async fn terminate(&mut self) -> std::io::Result<()>;

    /// Wait until the session is no longer running, stopping it once
    /// `grace` has elapsed.
    async fn wait(&mut self, grace: Duration) -> std::io::Result<()>;

    /// Stop the session without waiting.
    async fn stop(&mut self) -> std::io::Result<()>;

    /// Wait (at most `grace`) for buffered output to reach the caller.
    async fn drain(&mut self, grace: Duration);
}

/// Where the shell runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// `bash` on this machine
    Local,
    /// `bash` inside a privileged container with the workdir bind-mounted
    Container { image: String },
}

/// How to launch a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub workdir: PathBuf,
    pub backend: Backend,
    /// `uid:gid` the container shell runs as
    pub identity: Option<(u32, u32)>,
    pub privileged: bool,
}

impl SessionConfig {
    pub fn new(workdir: PathBuf, backend: Backend) -> Self {
        let identity = workdir_owner(&workdir);
        Self {
            workdir,
            backend,
            identity,
            privileged: true,
        }
    }
}

/// Owner of the working directory, so files created through the bind
/// mount keep the caller's ownership.
#[cfg(unix)]
pub fn workdir_owner(path: &Path) -> Option<(u32, u32)> {
    use std::os::unix::fs::MetadataExt;
    std::fs::metadata(path).ok().map(|m| (m.uid(), m.gid()))
}

#[cfg(not(unix))]
pub fn workdir_owner(_path: &Path) -> Option<(u32, u32)> {
    None
}
