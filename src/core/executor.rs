//! JDI-007: Session controller, the dispatch loop for compiled jobs.
//!
//! Created → Started → Running → Draining → Terminated.
//!
//! For each job in plan order the run statement is sent, then the defer
//! statement whatever the run outcome. A failed run aborts the rest of the
//! plan after its defer. Defer failures are logged and counted but never
//! fail the invocation. The session is always drained and terminated, and
//! a cancellation signal stops any wait promptly.

use super::types::CompiledJob;
use crate::error::{JdiError, Result};
use crate::session::ExecSession;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lifecycle of the controlled session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Started,
    Running,
    Draining,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Started => write!(f, "started"),
            Self::Running => write!(f, "running"),
            Self::Draining => write!(f, "draining"),
            Self::Terminated => write!(f, "terminated"),
        }
    }
}

/// Outcome counts for a completed dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub jobs_completed: u32,
    pub defers_failed: u32,
    pub total_duration: Duration,
}

/// Sole writer to one execution session.
pub struct Controller<S: ExecSession> {
    session: S,
    state: SessionState,
    grace: Duration,
    summary: RunSummary,
}

impl<S: ExecSession> Controller<S> {
    /// Take ownership of a launched session.
    pub fn new(session: S, grace: Duration) -> Self {
        let mut controller = Self {
            session,
            state: SessionState::Created,
            grace,
            summary: RunSummary::default(),
        };
        controller.transition(SessionState::Started);
        controller
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Dispatch every job, then drain and terminate the session.
    pub async fn run(
        mut self,
        jobs: &[CompiledJob],
        mut cancel: watch::Receiver<bool>,
    ) -> Result<RunSummary> {
        let start = Instant::now();

        let dispatched = tokio::select! {
            result = self.dispatch(jobs) => result,
            _ = cancelled(&mut cancel) => Err(JdiError::Cancelled),
        };
        if matches!(dispatched, Err(JdiError::Cancelled)) {
            self.abort().await;
            return Err(JdiError::Cancelled);
        }

        let finished = tokio::select! {
            result = self.finish() => result,
            _ = cancelled(&mut cancel) => Err(JdiError::Cancelled),
        };
        if matches!(finished, Err(JdiError::Cancelled)) {
            self.abort().await;
        }

        dispatched.and(finished)?;
        self.summary.total_duration = start.elapsed();
        Ok(self.summary)
    }

    async fn dispatch(&mut self, jobs: &[CompiledJob]) -> Result<()> {
        self.transition(SessionState::Running);
        for job in jobs {
            info!(job = %job.name, "running");
            let outcome = match &job.run {
                Some(statement) => self.send(statement).await,
                None => Ok(()),
            };
            self.send_defer(job).await;
            if let Err(reason) = outcome {
                return Err(JdiError::CommandDispatch {
                    job: job.name.clone(),
                    reason,
                });
            }
            self.summary.jobs_completed += 1;
        }
        Ok(())
    }

    async fn send_defer(&mut self, job: &CompiledJob) {
        let Some(statement) = &job.defer else {
            return;
        };
        debug!(job = %job.name, "running defer");
        if let Err(reason) = self.send(statement).await {
            warn!(job = %job.name, %reason, "defer failed");
            self.summary.defers_failed += 1;
        }
    }

    async fn send(&mut self, statement: &str) -> std::result::Result<(), String> {
        match self.session.send(statement).await {
            Ok(0) => Ok(()),
            Ok(code) => Err(format!("exit status {}", code)),
            Err(e) => Err(format!("dispatch error: {}", e)),
        }
    }

    /// Ask the shell to exit, wait for it within the grace period, then
    /// flush remaining output.
    async fn finish(&mut self) -> Result<()> {
        self.transition(SessionState::Draining);
        if let Err(e) = self.session.terminate().await {
            // The shell may already be gone after a failed job.
            debug!(error = %e, "terminate command not delivered");
        }
        self.session
            .wait(self.grace)
            .await
            .map_err(|e| JdiError::Session(format!("wait failed: {}", e)))?;
        self.session.drain(self.grace).await;
        self.transition(SessionState::Terminated);
        Ok(())
    }

    /// Best-effort shutdown after cancellation; never waits on the shell.
    async fn abort(&mut self) {
        self.transition(SessionState::Draining);
        if let Err(e) = self.session.terminate().await {
            debug!(error = %e, "terminate command not delivered");
        }
        if let Err(e) = self.session.stop().await {
            warn!(error = %e, "failed to stop session");
        }
        self.transition(SessionState::Terminated);
    }

    fn transition(&mut self, next: SessionState) {
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
    }
}

/// Resolve once the cancel flag is raised. Pends forever if the sender is
/// dropped without cancelling.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|flag| *flag).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{compiler, recipe, resolver, types::Overrides};
    use crate::session::process::ProcessSession;
    use crate::session::{Backend, SessionConfig};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    /// Records every statement; statements containing `fail_on` report
    /// exit status 1, and `close_on` simulates a broken channel.
    #[derive(Clone, Default)]
    struct Recording {
        log: Arc<Mutex<Vec<String>>>,
        fail_on: Option<String>,
        close_on: Option<String>,
        hang: bool,
        terminate_fails: bool,
    }

    impl Recording {
        fn sent(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExecSession for Recording {
        async fn send(&mut self, statement: &str) -> std::io::Result<i32> {
            self.log.lock().unwrap().push(statement.to_string());
            if self.hang {
                std::future::pending::<()>().await;
            }
            if let Some(marker) = &self.close_on {
                if statement.contains(marker.as_str()) {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "channel closed",
                    ));
                }
            }
            match &self.fail_on {
                Some(marker) if statement.contains(marker.as_str()) => Ok(1),
                _ => Ok(0),
            }
        }

        async fn terminate(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push("exit".to_string());
            if self.terminate_fails {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::BrokenPipe,
                    "input closed",
                ));
            }
            Ok(())
        }

        async fn wait(&mut self, _grace: Duration) -> std::io::Result<()> {
            Ok(())
        }

        async fn stop(&mut self) -> std::io::Result<()> {
            self.log.lock().unwrap().push("stop".to_string());
            Ok(())
        }

        async fn drain(&mut self, _grace: Duration) {}
    }

    const SCENARIO: &str = "env:\n  A: \"1\"\n\n\nb:\n  depends: [a]\n  run: echo b\na:\n  run: echo a\n  defer: echo cleanup-a\n";

    fn scenario_jobs() -> Vec<CompiledJob> {
        let args = Overrides::default();
        let recipe = recipe::parse_recipe(SCENARIO, &args, Path::new(".jdi")).unwrap();
        let plan = resolver::resolve(&recipe, &["b".to_string()]).unwrap();
        assert_eq!(plan.order, vec!["a", "b"]);
        compiler::compile_plan(&recipe, &plan, &args).unwrap()
    }

    fn never_cancel() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_executor_dispatch_order() {
        let session = Recording::default();
        let controller = Controller::new(session.clone(), Duration::from_secs(1));
        assert_eq!(controller.state(), SessionState::Started);

        let summary = controller.run(&scenario_jobs(), never_cancel()).await.unwrap();
        assert_eq!(
            session.sent(),
            vec![
                "export A=1\necho a",
                "export A=1\necho cleanup-a",
                "export A=1\necho b",
                "exit",
            ]
        );
        assert_eq!(summary.jobs_completed, 2);
        assert_eq!(summary.defers_failed, 0);
    }

    #[tokio::test]
    async fn test_executor_failed_run_sends_defer_then_stops() {
        let session = Recording {
            fail_on: Some("echo a".to_string()),
            ..Recording::default()
        };
        let controller = Controller::new(session.clone(), Duration::from_secs(1));
        let err = controller
            .run(&scenario_jobs(), never_cancel())
            .await
            .unwrap_err();

        match err {
            JdiError::CommandDispatch { job, reason } => {
                assert_eq!(job, "a");
                assert_eq!(reason, "exit status 1");
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            session.sent(),
            vec!["export A=1\necho a", "export A=1\necho cleanup-a", "exit"]
        );
    }

    #[tokio::test]
    async fn test_executor_broken_channel_still_tries_defer() {
        let session = Recording {
            close_on: Some("echo a".to_string()),
            ..Recording::default()
        };
        let controller = Controller::new(session.clone(), Duration::from_secs(1));
        let err = controller
            .run(&scenario_jobs(), never_cancel())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("dispatch error"));
        assert_eq!(session.sent()[1], "export A=1\necho cleanup-a");
    }

    #[tokio::test]
    async fn test_executor_defer_failure_not_escalated() {
        let session = Recording {
            fail_on: Some("cleanup".to_string()),
            ..Recording::default()
        };
        let controller = Controller::new(session.clone(), Duration::from_secs(1));
        let summary = controller.run(&scenario_jobs(), never_cancel()).await.unwrap();
        assert_eq!(summary.jobs_completed, 2);
        assert_eq!(summary.defers_failed, 1);
        assert_eq!(session.sent().len(), 4);
    }

    #[tokio::test]
    async fn test_executor_skips_absent_statements() {
        let jobs = vec![CompiledJob {
            name: "noop".to_string(),
            run: None,
            defer: None,
        }];
        let session = Recording::default();
        let summary = Controller::new(session.clone(), Duration::from_secs(1))
            .run(&jobs, never_cancel())
            .await
            .unwrap();
        assert_eq!(session.sent(), vec!["exit"]);
        assert_eq!(summary.jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_executor_cancel_stops_waiting() {
        let session = Recording {
            hang: true,
            ..Recording::default()
        };
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new(session.clone(), Duration::from_secs(1));
        let jobs = scenario_jobs();
        let run = tokio::spawn(async move { controller.run(&jobs, rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .expect("controller did not return after cancel")
            .unwrap();
        assert!(matches!(result, Err(JdiError::Cancelled)));
        assert_eq!(
            session.sent(),
            vec!["export A=1\necho a", "exit", "stop"]
        );
    }

    #[tokio::test]
    async fn test_executor_cancel_stops_even_if_terminate_fails() {
        let session = Recording {
            hang: true,
            terminate_fails: true,
            ..Recording::default()
        };
        let (tx, rx) = watch::channel(false);
        let controller = Controller::new(session.clone(), Duration::from_secs(1));
        let jobs = scenario_jobs();
        let run = tokio::spawn(async move { controller.run(&jobs, rx).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(JdiError::Cancelled)));
        assert_eq!(session.sent().last().map(String::as_str), Some("stop"));
    }

    #[tokio::test]
    async fn test_executor_local_bash_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let text = "env:\n  MARK: done\n\n\nfirst:\n  run: touch \"$MARK-first\"\n  defer: touch cleaned\nsecond:\n  depends: [first]\n  run: test -f \"$MARK-first\" && touch second\n";
        let args = Overrides::default();
        let recipe = recipe::parse_recipe(text, &args, Path::new(".jdi")).unwrap();
        let plan = resolver::resolve(&recipe, &["second".to_string()]).unwrap();
        let jobs = compiler::compile_plan(&recipe, &plan, &args).unwrap();

        let config = SessionConfig::new(dir.path().to_path_buf(), Backend::Local);
        let session = ProcessSession::start(&config).unwrap();
        let summary = Controller::new(session, Duration::from_secs(5))
            .run(&jobs, never_cancel())
            .await
            .unwrap();

        assert_eq!(summary.jobs_completed, 2);
        assert!(dir.path().join("done-first").exists());
        assert!(dir.path().join("cleaned").exists());
        assert!(dir.path().join("second").exists());
    }

    #[tokio::test]
    async fn test_executor_local_bash_failure_runs_defer_and_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\n\n\na:\n  run: \"false\"\n  defer: touch cleanup-a\nb:\n  depends: [a]\n  run: touch ran-b\n";
        let args = Overrides::default();
        let recipe = recipe::parse_recipe(text, &args, Path::new(".jdi")).unwrap();
        let plan = resolver::resolve(&recipe, &["b".to_string()]).unwrap();
        let jobs = compiler::compile_plan(&recipe, &plan, &args).unwrap();

        let config = SessionConfig::new(dir.path().to_path_buf(), Backend::Local);
        let session = ProcessSession::start(&config).unwrap();
        let err = Controller::new(session, Duration::from_secs(5))
            .run(&jobs, never_cancel())
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "job 'a' failed: exit status 1");
        assert!(dir.path().join("cleanup-a").exists());
        assert!(!dir.path().join("ran-b").exists());
    }

    #[tokio::test]
    async fn test_executor_local_bash_syntax_error_fails_job() {
        let dir = tempfile::tempdir().unwrap();
        let text = "\n\n\na:\n  run: echo \"unterminated\n  defer: touch cleanup-a\nb:\n  depends: [a]\n  run: touch ran-b\n";
        let args = Overrides::default();
        let recipe = recipe::parse_recipe(text, &args, Path::new(".jdi")).unwrap();
        let plan = resolver::resolve(&recipe, &["b".to_string()]).unwrap();
        let jobs = compiler::compile_plan(&recipe, &plan, &args).unwrap();

        let config = SessionConfig::new(dir.path().to_path_buf(), Backend::Local);
        let session = ProcessSession::start(&config).unwrap();
        let run = Controller::new(session, Duration::from_secs(5)).run(&jobs, never_cancel());
        let err = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .unwrap()
            .unwrap_err();

        assert_eq!(err.to_string(), "job 'a' failed: exit status 2");
        assert!(dir.path().join("cleanup-a").exists());
        assert!(!dir.path().join("ran-b").exists());
    }
}
