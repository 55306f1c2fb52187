use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;

use diag_errors::{ErrorKind, ErrorRecord, ExecError, ExitCode, Severity};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::command::CommandSpec;
use crate::executor::{ExecutionOutcome, ProcessExecutor};
use crate::limits::{ExecLimits, SessionConfig};
use crate::process::{wait_exited, Signal};
use crate::stream::StreamKind;
use crate::translate::ExitCodeTranslator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("a command is already running")]
    AlreadyRunning,
    #[error("execution was cancelled before the command started")]
    Vetoed,
    #[error(transparent)]
    Exec(#[from] ExecError),
}

struct SessionState {
    executor: ProcessExecutor,
    last_error: Option<ErrorRecord>,
}

struct ActiveGuard<'a>(&'a AtomicBool);

impl<'a> ActiveGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs one command to completion per call while the runtime keeps serving
/// other tasks. The tick passed to [`SyncExecutor::execute_with`] sees every
/// phase change; returning `false` from it while `Starting` or `Running`
/// cancels the run.
pub struct SyncExecutor {
    state: Mutex<SessionState>,
    active: AtomicBool,
    abort: StdMutex<CancellationToken>,
    phase: watch::Sender<ExecutionPhase>,
    config: SessionConfig,
    translator: Option<ExitCodeTranslator>,
    error_header: Option<String>,
}

impl SyncExecutor {
    pub fn new(limits: ExecLimits, config: SessionConfig) -> Self {
        let (phase, _) = watch::channel(ExecutionPhase::Idle);
        Self {
            state: Mutex::new(SessionState {
                executor: ProcessExecutor::new(limits),
                last_error: None,
            }),
            active: AtomicBool::new(false),
            abort: StdMutex::new(CancellationToken::new()),
            phase,
            config,
            translator: None,
            error_header: None,
        }
    }

    pub fn with_exit_code_translator(mut self, translator: ExitCodeTranslator) -> Self {
        self.translator = Some(translator);
        self
    }

    pub fn with_error_header(mut self, header: impl Into<String>) -> Self {
        self.error_header = Some(header.into());
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub async fn set_command(&self, command: CommandSpec) -> Result<(), SessionError> {
        if self.is_active() {
            return Err(SessionError::AlreadyRunning);
        }
        let mut state = self.state.lock().await;
        state.executor.configure(command)?;
        Ok(())
    }

    /// Configures `command` and runs it.
    pub async fn run(&self, command: CommandSpec) -> Result<(), SessionError> {
        self.set_command(command).await?;
        self.execute().await
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn phase(&self) -> ExecutionPhase {
        *self.phase.borrow()
    }

    pub fn subscribe_phase(&self) -> watch::Receiver<ExecutionPhase> {
        self.phase.subscribe()
    }

    /// Token for the current (or next) session. Cancelling it requests a
    /// terminate, escalating to kill after `kill_after`.
    pub fn abort_handle(&self) -> CancellationToken {
        self.lock_abort().clone()
    }

    pub fn abort(&self) {
        self.lock_abort().cancel();
    }

    pub async fn execute(&self) -> Result<(), SessionError> {
        self.execute_with(|_| true).await
    }

    pub async fn execute_with<F>(&self, mut tick: F) -> Result<(), SessionError>
    where
        F: FnMut(ExecutionPhase) -> bool,
    {
        let Some(_guard) = ActiveGuard::acquire(&self.active) else {
            return Err(SessionError::AlreadyRunning);
        };
        let abort = self.abort_handle();
        let span = tracing::info_span!("exec_session", session = %Uuid::new_v4());
        let result = self.run_session(&mut tick, &abort).instrument(span).await;
        *self.lock_abort() = CancellationToken::new();
        result
    }

    async fn run_session<F>(
        &self,
        tick: &mut F,
        abort: &CancellationToken,
    ) -> Result<(), SessionError>
    where
        F: FnMut(ExecutionPhase) -> bool,
    {
        let mut state = self.state.lock().await;
        state.last_error = None;
        state.executor.errors_mut().clear_errors();

        self.set_phase(ExecutionPhase::Starting);
        if abort.is_cancelled() || !tick(ExecutionPhase::Starting) {
            tracing::info!(event = "exec.session.vetoed", "execution vetoed before start");
            self.set_phase(ExecutionPhase::Idle);
            return Err(SessionError::Vetoed);
        }

        if let Err(err) = state.executor.execute() {
            self.set_phase(ExecutionPhase::Failed);
            let _ = tick(ExecutionPhase::Failed);
            let imported = state.executor.errors_mut().take_most_relevant();
            state.last_error = imported.or_else(|| Some(err.to_record()));
            return Err(err.into());
        }

        self.set_phase(ExecutionPhase::Running);
        let Some(mut exit_rx) = state.executor.exit_watch() else {
            return Err(SessionError::Exec(ExecError::NotRunning));
        };
        let interval = self.config.tick_interval();
        let timeout = self.config.timeout();
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut timed_out = false;

        while !state.executor.cleanup_needed() {
            tokio::select! {
                _ = wait_exited(&mut exit_rx) => {}
                _ = abort.cancelled() => {}
                _ = tokio::time::sleep(interval) => {}
            }
            if state.executor.cleanup_needed() {
                break;
            }
            timed_out = deadline.is_some_and(|deadline| Instant::now() >= deadline);
            let keep_going = tick(ExecutionPhase::Running);
            if keep_going && !abort.is_cancelled() && !timed_out {
                continue;
            }

            tracing::info!(
                event = "exec.session.stop",
                pid = ?state.executor.pid(),
                timed_out = timed_out,
                "stopping command"
            );
            self.set_phase(ExecutionPhase::Stopping);
            if let Err(err) = state.executor.try_signal(Signal::Terminate) {
                tracing::debug!(error = %err, "terminate not sent");
            }
            if let Err(err) = state
                .executor
                .arm_escalation_timers(None, Some(self.config.kill_after()))
            {
                tracing::debug!(error = %err, "kill timer not armed");
            }
            while !state.executor.cleanup_needed() {
                tokio::select! {
                    _ = wait_exited(&mut exit_rx) => {}
                    _ = tokio::time::sleep(interval) => {}
                }
                if !state.executor.cleanup_needed() {
                    let _ = tick(ExecutionPhase::Stopping);
                }
            }
            break;
        }

        state.executor.cleanup().await;
        self.set_phase(ExecutionPhase::Stopped);
        let succeeded = state
            .executor
            .outcome()
            .is_some_and(|outcome| outcome.status.success());
        let relevant = state.executor.errors_mut().take_most_relevant();
        // Pipe noise alone does not make a clean exit a failure.
        state.last_error = relevant.filter(|record| !(succeeded && record.is_io_channel()));
        if timed_out {
            let seconds = timeout.map(|timeout| timeout.as_secs()).unwrap_or_default();
            state.last_error = Some(ErrorRecord::new(
                ErrorKind::Custom("timeout".to_string()),
                Severity::Error,
                format!("command timed out after {seconds}s"),
            ));
        }
        let _ = tick(ExecutionPhase::Stopped);
        Ok(())
    }

    pub async fn stdout(&self) -> Vec<u8> {
        let mut state = self.state.lock().await;
        state
            .executor
            .read_captured_output(StreamKind::Stdout, false)
    }

    pub async fn stderr(&self) -> Vec<u8> {
        let mut state = self.state.lock().await;
        state
            .executor
            .read_captured_output(StreamKind::Stderr, false)
    }

    pub async fn outcome(&self) -> Option<ExecutionOutcome> {
        self.state.lock().await.executor.outcome().cloned()
    }

    pub async fn last_error(&self) -> Option<ErrorRecord> {
        self.state.lock().await.last_error.clone()
    }

    /// Human-readable message for the last run; empty when it succeeded.
    pub async fn error_message(&self, with_header: bool) -> String {
        let record = self.last_error().await;
        let Some(record) = record else {
            return String::new();
        };
        let message = self.describe(&record);
        match (&self.error_header, with_header) {
            (Some(header), true) => format!("{header}{message}"),
            _ => message,
        }
    }

    fn describe(&self, record: &ErrorRecord) -> String {
        if record.kind != ErrorKind::Exit {
            return record.message.clone();
        }
        let Some(ExitCode(code)) = record.try_code::<ExitCode>() else {
            return record.message.clone();
        };
        let translated = self
            .translator
            .as_ref()
            .map(|translate| translate(code))
            .filter(|message| !message.trim().is_empty());
        translated.unwrap_or_else(|| format!("exited with exit code {code}"))
    }

    fn set_phase(&self, phase: ExecutionPhase) {
        tracing::debug!(event = "exec.session.phase", phase = ?phase, "phase changed");
        self.phase.send_replace(phase);
    }

    fn lock_abort(&self) -> std::sync::MutexGuard<'_, CancellationToken> {
        self.abort
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SyncExecutor {
    fn default() -> Self {
        Self::new(ExecLimits::default(), SessionConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("/bin/sh", format!("-c {}", shell_words::quote(script)))
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            tick_interval_ms: 10,
            kill_after_ms: 300,
            timeout_secs: 0,
        }
    }

    #[tokio::test]
    async fn successful_run_has_empty_error_and_exact_stdout() {
        let executor = SyncExecutor::default();
        executor
            .run(sh("printf 'a b\\nc'"))
            .await
            .expect("run");
        assert_eq!(executor.stdout().await, b"a b\nc".to_vec());
        assert!(executor.error_message(true).await.is_empty());
        assert!(executor.last_error().await.is_none());
        assert_eq!(executor.phase(), ExecutionPhase::Stopped);
    }

    #[tokio::test]
    async fn exit_code_goes_through_translator() {
        let executor = SyncExecutor::default().with_exit_code_translator(Arc::new(|code| {
            if code == 1 {
                "boom".to_string()
            } else {
                String::new()
            }
        }));
        executor.run(sh("exit 1")).await.expect("run");
        assert!(executor.error_message(false).await.contains("boom"));
    }

    #[tokio::test]
    async fn exit_code_without_translator_is_generic() {
        let executor = SyncExecutor::default().with_error_header("smartctl: ");
        executor.run(sh("exit 2")).await.expect("run");
        assert_eq!(executor.error_message(false).await, "exited with exit code 2");
        assert_eq!(
            executor.error_message(true).await,
            "smartctl: exited with exit code 2"
        );
    }

    #[tokio::test]
    async fn tick_sees_phases_in_order() {
        let executor = SyncExecutor::new(ExecLimits::default(), fast_config());
        executor.set_command(sh("sleep 0.1")).await.expect("configure");
        let mut phases = Vec::new();
        executor
            .execute_with(|phase| {
                phases.push(phase);
                true
            })
            .await
            .expect("execute");
        assert_eq!(phases.first(), Some(&ExecutionPhase::Starting));
        assert_eq!(phases.last(), Some(&ExecutionPhase::Stopped));
        assert!(phases.contains(&ExecutionPhase::Running));
        assert!(!phases.contains(&ExecutionPhase::Stopping));
    }

    #[tokio::test]
    async fn veto_at_start_spawns_nothing() {
        let executor = SyncExecutor::default();
        executor
            .set_command(sh("echo should-not-run"))
            .await
            .expect("configure");
        let result = executor
            .execute_with(|phase| phase != ExecutionPhase::Starting)
            .await;
        assert_eq!(result, Err(SessionError::Vetoed));
        assert_eq!(executor.phase(), ExecutionPhase::Idle);
        assert!(executor.outcome().await.is_none());
        assert!(executor.stdout().await.is_empty());
    }

    #[tokio::test]
    async fn tick_cancellation_terminates_process() {
        let executor = SyncExecutor::new(ExecLimits::default(), fast_config());
        executor.set_command(sh("sleep 30")).await.expect("configure");
        let started = std::time::Instant::now();
        let mut running_ticks = 0;
        executor
            .execute_with(|phase| {
                if phase == ExecutionPhase::Running {
                    running_ticks += 1;
                }
                running_ticks < 3
            })
            .await
            .expect("execute");
        assert!(started.elapsed() < Duration::from_secs(5));
        let record = executor.last_error().await.expect("record");
        assert_eq!(record.kind, ErrorKind::Signal);
        assert_eq!(record.severity, Severity::Warn);
    }

    #[tokio::test]
    async fn ignored_terminate_is_killed_after_grace() {
        let executor = SyncExecutor::new(ExecLimits::default(), fast_config());
        executor
            .set_command(sh("trap '' TERM; sleep 30"))
            .await
            .expect("configure");
        let abort = executor.abort_handle();
        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            abort.cancel();
        });
        let started = std::time::Instant::now();
        executor.execute().await.expect("execute");
        canceller.await.expect("canceller");
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "{elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
        let outcome = executor.outcome().await.expect("outcome");
        assert_eq!(
            outcome.status,
            crate::executor::TerminalStatus::Signaled(libc::SIGKILL)
        );
        assert_eq!(
            executor.last_error().await.expect("record").severity,
            Severity::Warn
        );
    }

    #[tokio::test]
    async fn concurrent_execute_is_rejected() {
        let executor = Arc::new(SyncExecutor::new(ExecLimits::default(), fast_config()));
        executor.set_command(sh("sleep 30")).await.expect("configure");
        let mut phase_rx = executor.subscribe_phase();
        let first = {
            let executor = Arc::clone(&executor);
            tokio::spawn(async move { executor.execute().await })
        };
        phase_rx
            .wait_for(|phase| *phase == ExecutionPhase::Running)
            .await
            .expect("running");
        assert_eq!(
            executor.execute().await,
            Err(SessionError::AlreadyRunning)
        );
        assert_eq!(
            executor.set_command(sh("true")).await,
            Err(SessionError::AlreadyRunning)
        );
        executor.abort();
        first.await.expect("join").expect("first run");
        assert!(!executor.is_active());
    }

    #[tokio::test]
    async fn spawn_failure_reports_failed_phase() {
        let executor = SyncExecutor::default();
        executor
            .set_command(CommandSpec::new("/nonexistent/diskvalve-tool", "-a"))
            .await
            .expect("configure");
        let mut phases = Vec::new();
        let result = executor
            .execute_with(|phase| {
                phases.push(phase);
                true
            })
            .await;
        assert!(matches!(
            result,
            Err(SessionError::Exec(ExecError::Spawn { .. }))
        ));
        assert_eq!(
            phases,
            vec![ExecutionPhase::Starting, ExecutionPhase::Failed]
        );
        assert_eq!(executor.phase(), ExecutionPhase::Failed);
        let message = executor.error_message(false).await;
        assert!(message.contains("/nonexistent/diskvalve-tool"));
    }

    #[tokio::test]
    async fn timeout_stops_the_run() {
        let config = SessionConfig {
            timeout_secs: 1,
            ..fast_config()
        };
        let executor = SyncExecutor::new(ExecLimits::default(), config);
        executor.run(sh("sleep 30")).await.expect("run");
        let record = executor.last_error().await.expect("record");
        assert_eq!(record.kind, ErrorKind::Custom("timeout".to_string()));
        assert!(executor.error_message(false).await.contains("timed out"));
    }

    #[tokio::test]
    async fn background_child_holding_pipes_is_not_an_error() {
        let limits = ExecLimits {
            drain_grace_ms: 100,
            ..ExecLimits::default()
        };
        let executor = SyncExecutor::new(limits, fast_config());
        executor.run(sh("echo hi; sleep 2 &")).await.expect("run");
        let outcome = executor.outcome().await.expect("outcome");
        assert_eq!(outcome.status, crate::executor::TerminalStatus::Exited(0));
        assert_eq!(executor.stdout().await, b"hi\n".to_vec());
        assert!(executor.last_error().await.is_none());
        assert!(executor.error_message(true).await.is_empty());
    }

    #[tokio::test]
    async fn failed_run_with_held_pipes_reports_exit() {
        let limits = ExecLimits {
            drain_grace_ms: 100,
            ..ExecLimits::default()
        };
        let executor = SyncExecutor::new(limits, fast_config());
        executor.run(sh("sleep 2 & exit 3")).await.expect("run");
        let record = executor.last_error().await.expect("record");
        assert_eq!(record.kind, ErrorKind::Exit);
    }

    #[tokio::test]
    async fn abort_token_is_fresh_for_next_session() {
        let executor = SyncExecutor::new(ExecLimits::default(), fast_config());
        executor.abort();
        assert_eq!(
            executor.run(sh("true")).await,
            Err(SessionError::Vetoed)
        );
        executor.run(sh("true")).await.expect("second run");
        assert!(executor.error_message(false).await.is_empty());
    }
}
