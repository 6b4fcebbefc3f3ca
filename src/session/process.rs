//! JDI-012: Process-backed session (local `bash` or `docker run -i`).
//!
//! Statements are piped to the shell's stdin, never passed as arguments.
//! After each statement the shell prints a status marker; the stdout pump
//! routes marker lines to the controller and everything else to the
//! caller's stdout. Stderr is copied through untouched.

use super::{Backend, ExecSession, SessionConfig};
use crate::error::{JdiError, Result};
use async_trait::async_trait;
use std::io;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub struct ProcessSession {
    child: Child,
    stdin: Option<ChildStdin>,
    statuses: mpsc::UnboundedReceiver<i32>,
    pumps: Vec<JoinHandle<()>>,
    marker: String,
    container: Option<String>,
}

impl ProcessSession {
    /// Launch the shell and start pumping its output.
    pub fn start(config: &SessionConfig) -> Result<Self> {
        let container = match config.backend {
            Backend::Local => None,
            Backend::Container { .. } => Some(format!("jdi-{}", std::process::id())),
        };
        let mut cmd = shell_command(config, container.as_deref());
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let program = match config.backend {
            Backend::Local => "bash",
            Backend::Container { .. } => "docker",
        };
        let mut child = cmd
            .spawn()
            .map_err(|e| JdiError::SessionStart(format!("failed to spawn {}: {}", program, e)))?;

        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| JdiError::SessionStart("stdout not captured".to_string()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| JdiError::SessionStart("stderr not captured".to_string()))?;

        let marker = format!("__jdi_status_{}__", std::process::id());
        let (tx, statuses) = mpsc::unbounded_channel();
        let pumps = vec![
            tokio::spawn(pump_stdout(stdout, marker.clone(), tx)),
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut stderr, &mut tokio::io::stderr()).await;
            }),
        ];
        debug!(
            backend = ?config.backend,
            workdir = %config.workdir.display(),
            "session started"
        );

        Ok(Self {
            child,
            stdin,
            statuses,
            pumps,
            marker,
            container,
        })
    }
}

/// Build the shell invocation for a backend.
fn shell_command(config: &SessionConfig, container: Option<&str>) -> Command {
    match &config.backend {
        Backend::Local => {
            let mut cmd = Command::new("bash");
            cmd.current_dir(&config.workdir);
            cmd
        }
        Backend::Container { image } => {
            let mut cmd = Command::new("docker");
            cmd.args(container_args(config, image, container));
            cmd
        }
    }
}

fn container_args(config: &SessionConfig, image: &str, name: Option<&str>) -> Vec<String> {
    let workdir = config.workdir.display().to_string();
    let mut args = vec!["run".to_string(), "-i".to_string(), "--rm".to_string()];
    if let Some(name) = name {
        args.extend(["--name".to_string(), name.to_string()]);
    }
    if config.privileged {
        args.push("--privileged".to_string());
    }
    args.extend([
        "-v".to_string(),
        format!("{}:{}", workdir, workdir),
        "-w".to_string(),
        workdir,
    ]);
    if let Some((uid, gid)) = config.identity {
        args.extend(["-u".to_string(), format!("{}:{}", uid, gid)]);
    }
    args.extend([image.to_string(), "bash".to_string()]);
    args
}

/// Wrap a statement so the shell reports its status on stdout. The
/// statement travels as one single-quoted `eval` argument, so a syntax
/// error in it is a status of 2 and never swallows the marker line. The
/// group runs in the session shell itself, so exports persist; its stdin
/// is detached so a command cannot swallow the statements that follow.
fn wrap_statement(statement: &str, marker: &str) -> String {
    format!(
        "{{ eval {}; }} </dev/null\nprintf '%s%d\\n' {} \"$?\"\n",
        single_quote(statement),
        single_quote(marker)
    )
}

fn single_quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Find a status marker in a line, returning the text before it.
fn split_marker<'a>(line: &'a str, marker: &str) -> Option<(&'a str, i32)> {
    let at = line.find(marker)?;
    let status = line[at + marker.len()..].trim().parse().ok()?;
    Some((&line[..at], status))
}

async fn pump_stdout(stdout: ChildStdout, marker: String, statuses: mpsc::UnboundedSender<i32>) {
    let mut reader = BufReader::new(stdout);
    let mut out = tokio::io::stdout();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf);
        let written = match split_marker(line.trim_end_matches(['\n', '\r']), &marker) {
            Some((prefix, status)) => {
                let _ = statuses.send(status);
                if prefix.is_empty() {
                    Ok(())
                } else {
                    out.write_all(format!("{}\n", prefix).as_bytes()).await
                }
            }
            None => out.write_all(&buf).await,
        };
        if written.is_err() {
            break;
        }
        let _ = out.flush().await;
    }
}

#[async_trait]
impl ExecSession for ProcessSession {
    async fn send(&mut self, statement: &str) -> io::Result<i32> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "session input closed"))?;
        stdin
            .write_all(wrap_statement(statement, &self.marker).as_bytes())
            .await?;
        stdin.flush().await?;
        self.statuses.recv().await.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "session exited before reporting a status",
            )
        })
    }

    async fn terminate(&mut self) -> io::Result<()> {
        let Some(mut stdin) = self.stdin.take() else {
            return Ok(());
        };
        stdin.write_all(b"exit\n").await?;
        stdin.flush().await
        // stdin drops here, closing the channel
    }

    async fn wait(&mut self, grace: Duration) -> io::Result<()> {
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(status) => {
                let status = status?;
                debug!(?status, "session exited");
                Ok(())
            }
            Err(_) => {
                warn!(grace = ?grace, "session still running after grace period, stopping");
                self.stop().await
            }
        }
    }

    async fn stop(&mut self) -> io::Result<()> {
        self.stdin.take();
        if let Some(name) = &self.container {
            let stopped = Command::new("docker")
                .args(["stop", "--time", "0", name])
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await;
            if let Err(e) = stopped {
                warn!(container = %name, error = %e, "docker stop failed");
            }
        }
        match self.child.try_wait()? {
            Some(_) => Ok(()),
            None => self.child.kill().await,
        }
    }

    async fn drain(&mut self, grace: Duration) {
        for pump in self.pumps.drain(..) {
            if tokio::time::timeout(grace, pump).await.is_err() {
                warn!("output still open after grace period");
            }
        }
    }
}
