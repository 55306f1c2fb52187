use diag_errors::{ErrorKind, ErrorRecord, Severity};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::capability::CapabilitySource;
use crate::interpret::{OutputInterpreter, SmartctlInterpreter, TestStatus};
use crate::kind::TestKind;
use crate::runner::CommandRunner;

pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(15);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelfTestError {
    #[error("{0} is not supported by this device")]
    Unsupported(String),
    #[error("{0} cannot be aborted on this device")]
    NotAbortable(String),
    #[error("a self-test is already running")]
    AlreadyActive,
    #[error("no self-test is running")]
    NotActive,
    #[error("{0}")]
    Tool(String),
    #[error("unexpected smartctl response: {0}")]
    UnexpectedResponse(String),
}

impl SelfTestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SelfTestError::Unsupported(_) | SelfTestError::NotAbortable(_) => {
                ErrorKind::Unsupported
            }
            SelfTestError::AlreadyActive => ErrorKind::AlreadyRunning,
            SelfTestError::NotActive => ErrorKind::NotRunning,
            SelfTestError::Tool(_) => ErrorKind::Custom("tool".to_string()),
            SelfTestError::UnexpectedResponse(_) => ErrorKind::Custom("response".to_string()),
        }
    }

    /// Incapability is expected on many devices and stays informational.
    pub fn to_record(&self) -> ErrorRecord {
        let severity = match self {
            SelfTestError::Unsupported(_) | SelfTestError::NotAbortable(_) => Severity::Info,
            SelfTestError::AlreadyActive | SelfTestError::NotActive => Severity::Warn,
            SelfTestError::Tool(_) | SelfTestError::UnexpectedResponse(_) => Severity::Error,
        };
        ErrorRecord::new(self.kind(), severity, self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "status", rename_all = "snake_case")]
pub enum TestState {
    Inactive,
    Running,
    Finished(TestStatus),
}

/// Polls a few times per tenth of the expected duration, and more often
/// during the last tenth of a long test.
pub fn poll_interval_for(kind: TestKind, total: Option<Duration>, remaining_percent: i8) -> Duration {
    let Some(total) = total.filter(|total| !total.is_zero()) else {
        return DEFAULT_POLL_INTERVAL;
    };
    let decile = total / 9;
    let interval = if kind == TestKind::Long && (0..=10).contains(&remaining_percent) {
        decile / 10
    } else {
        decile / 3
    };
    interval.max(MIN_POLL_INTERVAL)
}

/// One device self-test, driven through a [`CommandRunner`].
pub struct SelfTest {
    kind: TestKind,
    runner: Arc<dyn CommandRunner>,
    capabilities: Arc<dyn CapabilitySource>,
    interpreter: Box<dyn OutputInterpreter>,
    state: TestState,
    remaining_percent: i8,
    last_seen_percent: i8,
    changed_at: Instant,
    poll_interval: Duration,
}

impl SelfTest {
    pub fn new(
        kind: TestKind,
        runner: Arc<dyn CommandRunner>,
        capabilities: Arc<dyn CapabilitySource>,
    ) -> Self {
        Self {
            kind,
            runner,
            capabilities,
            interpreter: Box::new(SmartctlInterpreter),
            state: TestState::Inactive,
            remaining_percent: -1,
            last_seen_percent: -1,
            changed_at: Instant::now(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_interpreter(mut self, interpreter: Box<dyn OutputInterpreter>) -> Self {
        self.interpreter = interpreter;
        self
    }

    pub fn kind(&self) -> TestKind {
        self.kind
    }

    pub fn state(&self) -> &TestState {
        &self.state
    }

    pub fn status(&self) -> TestStatus {
        match &self.state {
            TestState::Inactive => TestStatus::Unknown,
            TestState::Running => TestStatus::InProgress,
            TestState::Finished(status) => status.clone(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == TestState::Running
    }

    /// -1 when unknown.
    pub fn remaining_percent(&self) -> i8 {
        self.remaining_percent
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn total_duration(&self) -> Option<Duration> {
        let key = self.kind.duration_key()?;
        self.capabilities
            .duration(key)
            .filter(|total| !total.is_zero())
    }

    pub fn is_supported(&self) -> bool {
        self.kind
            .support_key()
            .and_then(|key| self.capabilities.flag(key))
            .unwrap_or(false)
    }

    pub async fn start(&mut self) -> Result<(), SelfTestError> {
        if self.is_active() {
            return Err(SelfTestError::AlreadyActive);
        }
        if !self.is_supported() {
            tracing::debug!(event = "selftest.unsupported", kind = %self.kind, "test kind not supported");
            return Err(SelfTestError::Unsupported(self.kind.to_string()));
        }
        self.clear();

        let output = self
            .runner
            .run(&format!("-t {}", self.kind.smartctl_name()))
            .await
            .map_err(SelfTestError::Tool)?;
        if !self.interpreter.start_acknowledged(&output) {
            return Err(SelfTestError::UnexpectedResponse(summarize(&output)));
        }

        self.state = TestState::Running;
        self.remaining_percent = 100;
        self.last_seen_percent = 90;
        self.changed_at = Instant::now();
        self.poll_interval =
            poll_interval_for(self.kind, self.total_duration(), self.remaining_percent);
        tracing::info!(
            event = "selftest.start",
            kind = %self.kind,
            poll_secs = self.poll_interval.as_secs(),
            "self-test started"
        );
        Ok(())
    }

    /// Queries the device once and returns how long to wait before the next
    /// query.
    pub async fn update(&mut self) -> Result<Duration, SelfTestError> {
        if !self.is_active() {
            return Err(SelfTestError::NotActive);
        }
        let output = self
            .runner
            .run("-c")
            .await
            .map_err(SelfTestError::Tool)?;
        let report = self
            .interpreter
            .parse_status(&output)
            .ok_or_else(|| SelfTestError::UnexpectedResponse(summarize(&output)))?;

        match report.status {
            TestStatus::InProgress | TestStatus::Unknown => {
                let remaining = report.remaining_percent.unwrap_or(-1);
                if remaining != self.last_seen_percent {
                    self.last_seen_percent = remaining;
                    self.changed_at = Instant::now();
                }
                self.remaining_percent = remaining;
                tracing::debug!(event = "selftest.progress", kind = %self.kind, remaining, "self-test progress");
            }
            status => self.finish(status),
        }

        self.poll_interval =
            poll_interval_for(self.kind, self.total_duration(), self.remaining_percent);
        Ok(self.poll_interval)
    }

    pub async fn force_stop(&mut self) -> Result<(), SelfTestError> {
        if !self.is_active() {
            return Err(SelfTestError::NotActive);
        }
        let blocked = self
            .capabilities
            .flag(self.kind.abort_unsupported_key())
            .unwrap_or(false);
        if blocked {
            tracing::debug!(event = "selftest.abort_unsupported", kind = %self.kind, "test cannot be aborted");
            return Err(SelfTestError::NotAbortable(self.kind.to_string()));
        }

        let output = self
            .runner
            .run("-X")
            .await
            .map_err(SelfTestError::Tool)?;
        if !self.interpreter.abort_acknowledged(&output) {
            tracing::debug!(event = "selftest.abort_unacknowledged", output = %summarize(&output), "abort not acknowledged");
        }
        if let Err(err) = self.update().await {
            tracing::debug!(event = "selftest.abort_status", error = %err, "status after abort unavailable");
        }
        // Some devices keep reporting the old state for a while after abort.
        if self.is_active() {
            self.finish(TestStatus::AbortedByHost);
        }
        Ok(())
    }

    /// Estimated time left, counted in tenths of the expected duration.
    pub fn remaining_time(&self) -> Option<Duration> {
        if !self.is_active() || self.remaining_percent < 0 {
            return None;
        }
        let total = self.total_duration()?;
        let deciles = u32::try_from(self.remaining_percent.min(90))
            .ok()?
            .div_ceil(10);
        Some((total / 9 * deciles).saturating_sub(self.changed_at.elapsed()))
    }

    pub fn clear(&mut self) {
        self.state = TestState::Inactive;
        self.remaining_percent = -1;
        self.last_seen_percent = -1;
        self.changed_at = Instant::now();
        self.poll_interval = DEFAULT_POLL_INTERVAL;
    }

    fn finish(&mut self, status: TestStatus) {
        tracing::info!(event = "selftest.finish", kind = %self.kind, status = ?status, "self-test finished");
        self.state = TestState::Finished(status);
        self.remaining_percent = -1;
    }
}

fn summarize(output: &str) -> String {
    output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("empty output")
        .to_string()
}
