use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::monitor::run_monitor_case;
use super::CaseReport;
use super::CommandExpectation;
use super::SuiteReport;
use super::Verdict;
use crate::protocol::Command;
use crate::protocol::Reply;
use crate::ClusterHandle;
use crate::ConnectError;
use crate::Error;
use crate::ProtocolSessionFactory;
use crate::Result;

/// Lifecycle of one conformance case
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CaseState {
    Pending,
    Executing,
    Passed,
    Failed,
    Skipped,
}

impl CaseState {
    /// `Pending -> Executing -> {Passed, Failed, Skipped}`; anything else is rejected
    pub fn transition(
        self,
        next: CaseState,
    ) -> Result<CaseState> {
        use CaseState::*;
        match (self, next) {
            (Pending, Executing) | (Executing, Passed) | (Executing, Failed) | (Executing, Skipped) => {
                Ok(next)
            }
            (from, to) => Err(Error::CaseTransition { from, to }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, CaseState::Passed | CaseState::Failed | CaseState::Skipped)
    }
}

impl fmt::Display for CaseState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let name = match self {
            CaseState::Pending => "PENDING",
            CaseState::Executing => "EXECUTING",
            CaseState::Passed => "PASSED",
            CaseState::Failed => "FAILED",
            CaseState::Skipped => "SKIPPED",
        };
        f.write_str(name)
    }
}

/// Something that can issue key-value commands: a live session or a test double
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandExecutor: Send {
    /// Issue `command` and wait for its reply. Error replies come back as
    /// [`crate::CommandError::Server`].
    async fn execute(
        &mut self,
        command: &Command,
    ) -> Result<Reply>;

    /// Next reply pushed by the server without a request (MONITOR feed)
    async fn next_reply(
        &mut self,
        timeout: Duration,
    ) -> Result<Reply>;

    async fn shutdown(&mut self) -> Result<()>;

    /// Server this executor is connected to, if any
    fn peer(&self) -> Option<SocketAddr>;
}

/// Source of fresh key-value sessions
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionOpener: Send + Sync {
    /// Session on whichever endpoint the opener picks next
    async fn open(&self) -> std::result::Result<Box<dyn CommandExecutor>, ConnectError>;

    /// Session on one specific endpoint
    async fn open_to(
        &self,
        endpoint: SocketAddr,
    ) -> std::result::Result<Box<dyn CommandExecutor>, ConnectError>;
}

/// Opens configured key-value sessions against a running cluster
pub struct KvSessionOpener<'a> {
    factory: &'a ProtocolSessionFactory,
    handle: &'a ClusterHandle,
}

impl<'a> KvSessionOpener<'a> {
    pub fn new(
        factory: &'a ProtocolSessionFactory,
        handle: &'a ClusterHandle,
    ) -> Self {
        Self { factory, handle }
    }
}

#[async_trait]
impl SessionOpener for KvSessionOpener<'_> {
    async fn open(&self) -> std::result::Result<Box<dyn CommandExecutor>, ConnectError> {
        let session = self.factory.open_configured_key_value(self.handle).await?;
        Ok(Box::new(session))
    }

    async fn open_to(
        &self,
        endpoint: SocketAddr,
    ) -> std::result::Result<Box<dyn CommandExecutor>, ConnectError> {
        let session = self.factory.open_key_value_to(endpoint).await?;
        Ok(Box::new(session))
    }
}

/// Runs command expectations and records one report entry per case
pub struct ConformanceSuiteRunner<'a> {
    name: String,
    opener: &'a dyn SessionOpener,
}

impl<'a> ConformanceSuiteRunner<'a> {
    /// `opener` supplies the extra sessions monitor cases need and the per-case
    /// sessions of [`run_with_fresh_sessions`](Self::run_with_fresh_sessions)
    pub fn new(
        name: impl Into<String>,
        opener: &'a dyn SessionOpener,
    ) -> Self {
        Self {
            name: name.into(),
            opener,
        }
    }

    /// Every case on one session, in order
    pub async fn run_on_session(
        &self,
        executor: &mut dyn CommandExecutor,
        cases: &[CommandExpectation],
    ) -> SuiteReport {
        info!(suite = %self.name, cases = cases.len(), "running suite on a shared session");
        let mut report = SuiteReport::new(&self.name);
        for case in cases {
            report.push(self.run_case(executor, case).await);
        }
        self.finish(report)
    }

    /// A new session per case, closed before the next case starts. A failed open fails
    /// only that case; skipped cases open nothing.
    pub async fn run_with_fresh_sessions(
        &self,
        cases: &[CommandExpectation],
    ) -> SuiteReport {
        info!(suite = %self.name, cases = cases.len(), "running suite with a session per case");
        let mut report = SuiteReport::new(&self.name);
        for case in cases {
            if case.skip_reason().is_some() || case.monitor.is_some() {
                // monitor cases open their own sessions
                report.push(self.run_case(&mut Unopened, case).await);
                continue;
            }

            let started = Instant::now();
            let mut executor = match self.opener.open().await {
                Ok(executor) => executor,
                Err(e) => {
                    warn!(case = %case.name, "session open failed: {e}");
                    report.push(CaseReport::new(
                        case,
                        CaseState::Failed,
                        Some(format!("connect: {e}")),
                        started.elapsed(),
                    ));
                    continue;
                }
            };
            report.push(self.run_case(executor.as_mut(), case).await);
            if let Err(e) = executor.shutdown().await {
                warn!(case = %case.name, "session close failed: {e}");
            }
        }
        self.finish(report)
    }

    async fn run_case(
        &self,
        executor: &mut dyn CommandExecutor,
        case: &CommandExpectation,
    ) -> CaseReport {
        let started = Instant::now();
        let (state, observed) = match self.drive(executor, case).await {
            Ok(done) => done,
            Err(e) => (CaseState::Failed, Some(e.to_string())),
        };

        match state {
            CaseState::Failed => warn!(
                case = %case.name,
                command = %case.command,
                observed = observed.as_deref().unwrap_or_default(),
                expected = %case.describe_accepted(),
                "conformance violation"
            ),
            _ => debug!(case = %case.name, %state, "case finished"),
        }
        CaseReport::new(case, state, observed, started.elapsed())
    }

    /// Walk the case through its states; errors here are illegal transitions only
    async fn drive(
        &self,
        executor: &mut dyn CommandExecutor,
        case: &CommandExpectation,
    ) -> Result<(CaseState, Option<String>)> {
        let state = CaseState::Pending.transition(CaseState::Executing)?;

        if let Some(reason) = case.skip_reason() {
            return Ok((state.transition(CaseState::Skipped)?, Some(reason.to_string())));
        }

        if let Some(plan) = &case.monitor {
            let (verdict, observed) = run_monitor_case(self.opener, case, plan).await;
            return Ok((state.transition(verdict.into())?, Some(observed)));
        }

        let saved = match capture_config(executor, &case.restores).await {
            Ok(saved) => saved,
            Err(observed) => return Ok((state.transition(CaseState::Failed)?, Some(observed))),
        };

        let (mut verdict, mut observed) = match run_setup(executor, &case.setup).await {
            Ok(()) => execute_judged(executor, case).await,
            Err(observed) => (Verdict::Fail, observed),
        };

        if let Err(e) = restore_config(executor, &case.name, &saved).await {
            verdict = Verdict::Fail;
            observed = format!("{observed}; {e}");
        }
        Ok((state.transition(verdict.into())?, Some(observed)))
    }

    fn finish(
        &self,
        report: SuiteReport,
    ) -> SuiteReport {
        info!(
            suite = %self.name,
            passed = report.passed(),
            failed = report.failed(),
            skipped = report.skipped(),
            "suite finished"
        );
        report
    }
}

impl From<Verdict> for CaseState {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => CaseState::Passed,
            Verdict::Fail => CaseState::Failed,
        }
    }
}

async fn run_setup(
    executor: &mut dyn CommandExecutor,
    setup: &[Command],
) -> std::result::Result<(), String> {
    for command in setup {
        executor
            .execute(command)
            .await
            .map_err(|e| format!("setup {command}: {e}"))?;
    }
    Ok(())
}

/// Current value of each parameter; `CONFIG GET` answers `[name, value]`
async fn capture_config(
    executor: &mut dyn CommandExecutor,
    params: &[String],
) -> std::result::Result<Vec<(String, String)>, String> {
    let mut saved = Vec::with_capacity(params.len());
    for param in params {
        let command = Command::from_args(["CONFIG", "GET", param.as_str()]);
        let reply = executor
            .execute(&command)
            .await
            .map_err(|e| format!("capture {param}: {e}"))?;
        let value = reply
            .as_array()
            .and_then(|items| items.get(1))
            .and_then(Reply::as_text)
            .map(|value| value.into_owned())
            .ok_or_else(|| format!("capture {param}: unexpected reply {reply}"))?;
        saved.push((param.clone(), value));
    }
    Ok(saved)
}

/// Write every saved value back, even after an earlier restore failed
async fn restore_config(
    executor: &mut dyn CommandExecutor,
    case: &str,
    saved: &[(String, String)],
) -> std::result::Result<(), String> {
    let mut failures = Vec::new();
    for (param, value) in saved {
        debug!(case, param = %param, value = %value, "restoring config");
        let command = Command::from_args(["CONFIG", "SET", param.as_str(), value.as_str()]);
        match executor.execute(&command).await {
            Ok(_) => {}
            Err(e) => {
                warn!(case, param = %param, "config restore failed: {e}");
                failures.push(format!("restore {param}: {e}"));
            }
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(failures.join("; "))
    }
}

/// Execute once, then keep re-issuing under the case's poll policy until it passes
async fn execute_judged(
    executor: &mut dyn CommandExecutor,
    case: &CommandExpectation,
) -> (Verdict, String) {
    let mut result = executor.execute(&case.command).await;
    let mut verdict = case.judge(&result);

    if let Some(poll) = case.poll {
        let deadline = Instant::now() + poll.timeout;
        while verdict == Verdict::Fail && is_retryable(&result) && Instant::now() < deadline {
            tokio::time::sleep(poll.interval).await;
            debug!(case = %case.name, "polling");
            result = executor.execute(&case.command).await;
            verdict = case.judge(&result);
        }
    }

    (verdict, describe(&result))
}

/// Replies and server errors may change over time; transport failures end polling
fn is_retryable(result: &Result<Reply>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => e.server_message().is_some(),
    }
}

pub(crate) fn describe(result: &Result<Reply>) -> String {
    match result {
        Ok(reply) => reply.to_string(),
        Err(e) => match e.server_message() {
            Some(message) => format!("(error) {message}"),
            None => format!("transport: {e}"),
        },
    }
}

/// Stand-in executor for cases that never touch the shared session
struct Unopened;

#[async_trait]
impl CommandExecutor for Unopened {
    async fn execute(
        &mut self,
        command: &Command,
    ) -> Result<Reply> {
        Err(Error::Fatal(format!("no session opened for {command}")))
    }

    async fn next_reply(
        &mut self,
        _timeout: Duration,
    ) -> Result<Reply> {
        Err(Error::Fatal("no session opened".to_string()))
    }

    async fn shutdown(&mut self) -> Result<()> {
        Ok(())
    }

    fn peer(&self) -> Option<SocketAddr> {
        None
    }
}
