use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use diag_errors::{ErrorHolder, ErrorKind, ErrorRecord, ExecError, ExitCode, Severity, SignalNumber};
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::CommandSpec;
use crate::escalation::EscalationTimers;
use crate::limits::ExecLimits;
use crate::process::{
    apply_process_group, signal_name, wait_exited, ChildExit, ExitSlot, SentSignal, Signal,
    SignalHandle,
};
use crate::stream::{drain_stream, lock_capture, shared_capture, SharedCapture, StreamKind, StreamWatch};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum TerminalStatus {
    Exited(i32),
    Signaled(i32),
}

impl TerminalStatus {
    pub fn success(self) -> bool {
        self == TerminalStatus::Exited(0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub status: TerminalStatus,
    pub elapsed: Duration,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: bool,
    pub stderr_truncated: bool,
}

/// Everything acquired by one `execute()`. Dropping it aborts the reader and
/// exit tasks; the exit task owns the child, which is killed on drop.
struct RunningChild {
    pid: Option<u32>,
    started_at: Instant,
    exit_rx: watch::Receiver<ExitSlot>,
    exit_task: JoinHandle<()>,
    readers: Vec<(StreamKind, JoinHandle<()>)>,
    read_failures: mpsc::UnboundedReceiver<ErrorRecord>,
    escalation: Option<EscalationTimers>,
}

impl RunningChild {
    fn exited(&self) -> bool {
        self.exit_rx.borrow().is_some()
    }
}

impl Drop for RunningChild {
    fn drop(&mut self) {
        self.escalation = None;
        for (_, reader) in &self.readers {
            reader.abort();
        }
        self.exit_task.abort();
    }
}

/// Owns the lifetime of one external process invocation at a time.
///
/// `execute()` must be called from inside a tokio runtime: the pipes, the exit
/// watch and the escalation timers all run as tasks on it.
pub struct ProcessExecutor {
    limits: ExecLimits,
    command: Option<CommandSpec>,
    running: Option<RunningChild>,
    signals: Option<SignalHandle>,
    outcome: Option<ExecutionOutcome>,
    stdout: SharedCapture,
    stderr: SharedCapture,
    errors: ErrorHolder,
}

impl ProcessExecutor {
    pub fn new(limits: ExecLimits) -> Self {
        let stdout = shared_capture(limits.stdout_buffer_bytes);
        let stderr = shared_capture(limits.stderr_buffer_bytes);
        Self {
            limits,
            command: None,
            running: None,
            signals: None,
            outcome: None,
            stdout,
            stderr,
            errors: ErrorHolder::new(),
        }
    }

    pub fn configure(&mut self, command: CommandSpec) -> Result<(), ExecError> {
        if self.running.is_some() {
            return Err(ExecError::AlreadyRunning);
        }
        command.validate()?;
        self.command = Some(command);
        Ok(())
    }

    pub fn command(&self) -> Option<&CommandSpec> {
        self.command.as_ref()
    }

    pub fn execute(&mut self) -> Result<(), ExecError> {
        if self.running.is_some() {
            return Err(ExecError::AlreadyRunning);
        }
        let command = self.command.clone().ok_or(ExecError::NotConfigured)?;
        let argv = command.argv()?;

        self.outcome = None;
        self.signals = None;
        self.stdout = shared_capture(self.limits.stdout_buffer_bytes);
        self.stderr = shared_capture(self.limits.stderr_buffer_bytes);

        let mut cmd = Command::new(command.program());
        cmd.args(&argv);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        apply_process_group(&mut cmd);

        let started_at = Instant::now();
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let error = ExecError::Spawn {
                    program: command.program().to_string(),
                    message: err.to_string(),
                    errno: err.raw_os_error(),
                };
                self.errors.push_error(error.to_record());
                return Err(error);
            }
        };
        let pid = child.id();
        tracing::info!(
            event = "exec.spawn",
            pid = ?pid,
            command = %command,
            "process started"
        );

        let (failure_tx, read_failures) = mpsc::unbounded_channel();
        let chunk = self.limits.read_chunk_bytes;
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            let watch = StreamWatch::new(
                StreamKind::Stdout,
                self.stdout.clone(),
                failure_tx.clone(),
                pid,
            );
            readers.push((StreamKind::Stdout, tokio::spawn(drain_stream(stdout, watch, chunk))));
        }
        if let Some(stderr) = child.stderr.take() {
            let watch = StreamWatch::new(StreamKind::Stderr, self.stderr.clone(), failure_tx, pid);
            readers.push((StreamKind::Stderr, tokio::spawn(drain_stream(stderr, watch, chunk))));
        }

        let (exit_tx, exit_rx) = watch::channel::<ExitSlot>(None);
        let exit_task = tokio::spawn(async move {
            let result = child.wait().await.map_err(|err| err.to_string());
            exit_tx.send_replace(Some(ChildExit {
                result,
                at: Instant::now(),
            }));
        });

        self.signals = Some(SignalHandle::new(pid, exit_rx.clone()));
        self.running = Some(RunningChild {
            pid,
            started_at,
            exit_rx,
            exit_task,
            readers,
            read_failures,
            escalation: None,
        });
        Ok(())
    }

    pub fn try_signal(&mut self, signal: Signal) -> Result<(), ExecError> {
        let running = self.running.as_ref().ok_or(ExecError::NotRunning)?;
        if running.exited() {
            return Err(ExecError::NotRunning);
        }
        self.signals
            .as_ref()
            .ok_or(ExecError::NotRunning)?
            .send(signal)
    }

    /// Arms the terminate/kill timers, replacing any armed earlier.
    pub fn arm_escalation_timers(
        &mut self,
        terminate_after: Option<Duration>,
        kill_after: Option<Duration>,
    ) -> Result<(), ExecError> {
        let handle = self.signals.clone().ok_or(ExecError::NotRunning)?;
        let running = self.running.as_mut().ok_or(ExecError::NotRunning)?;
        if running.exited() {
            return Err(ExecError::NotRunning);
        }
        running.escalation = Some(EscalationTimers::arm(
            handle,
            running.exit_rx.clone(),
            terminate_after,
            kill_after,
        ));
        Ok(())
    }

    pub fn disarm_escalation_timers(&mut self) {
        if let Some(running) = self.running.as_mut() {
            running.escalation = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .map(|running| !running.exited())
            .unwrap_or(false)
    }

    pub fn cleanup_needed(&self) -> bool {
        self.running
            .as_ref()
            .map(RunningChild::exited)
            .unwrap_or(false)
    }

    pub fn pid(&self) -> Option<u32> {
        self.running.as_ref().and_then(|running| running.pid)
    }

    /// Receiver that flips once the child has been reaped.
    pub(crate) fn exit_watch(&self) -> Option<watch::Receiver<ExitSlot>> {
        self.running.as_ref().map(|running| running.exit_rx.clone())
    }

    /// Waits until the child has exited. Returns immediately when nothing runs.
    pub async fn wait(&self) {
        if let Some(mut rx) = self.exit_watch() {
            wait_exited(&mut rx).await;
        }
    }

    /// Drains the pipes one last time, classifies the terminal status and
    /// releases the run's resources. Returns false when there was nothing to
    /// release. A child that is still alive is killed first.
    pub async fn cleanup(&mut self) -> bool {
        let Some(mut running) = self.running.take() else {
            return false;
        };
        running.escalation = None;

        if !running.exited() {
            tracing::warn!(
                event = "exec.cleanup.kill",
                pid = ?running.pid,
                "cleanup requested while child still running"
            );
            if let Some(handle) = self.signals.as_ref() {
                let _ = handle.send(Signal::Kill);
            }
            let mut rx = running.exit_rx.clone();
            wait_exited(&mut rx).await;
        }

        let grace = self.limits.drain_grace();
        for (kind, reader) in std::mem::take(&mut running.readers) {
            let abort = reader.abort_handle();
            match tokio::time::timeout(grace, reader).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => self.errors.push_error(ErrorRecord::new(
                    ErrorKind::IoChannel,
                    Severity::Warn,
                    format!("{} reader failed: {err}", kind.as_str()),
                )),
                Err(_) => {
                    abort.abort();
                    self.errors.push_error(ErrorRecord::new(
                        ErrorKind::IoChannel,
                        Severity::Info,
                        format!(
                            "{} still open {}ms after exit; output may be incomplete",
                            kind.as_str(),
                            grace.as_millis()
                        ),
                    ));
                }
            }
        }
        while let Ok(record) = running.read_failures.try_recv() {
            self.errors.push_error(record);
        }

        let exit = running.exit_rx.borrow().clone();
        let Some(exit) = exit else {
            return true;
        };
        let elapsed = exit.at.saturating_duration_since(running.started_at);
        match exit.result {
            Ok(status) => {
                let status = terminal_status(status);
                self.classify(status);
                let mut stdout = lock_capture(&self.stdout);
                let mut stderr = lock_capture(&self.stderr);
                let outcome = ExecutionOutcome {
                    status,
                    elapsed,
                    stdout_truncated: stdout.truncated(),
                    stderr_truncated: stderr.truncated(),
                    stdout: stdout.take(),
                    stderr: stderr.take(),
                };
                drop(stdout);
                drop(stderr);
                tracing::info!(
                    event = "exec.finished",
                    pid = ?running.pid,
                    status = ?outcome.status,
                    elapsed_ms = elapsed.as_millis(),
                    stdout_bytes = outcome.stdout.len(),
                    stderr_bytes = outcome.stderr.len(),
                    "process finished"
                );
                self.outcome = Some(outcome);
            }
            Err(message) => self.errors.push_error(ErrorRecord::new(
                ErrorKind::Custom("wait".to_string()),
                Severity::Error,
                format!("failed to wait for child: {message}"),
            )),
        }
        true
    }

    fn classify(&mut self, status: TerminalStatus) {
        match status {
            TerminalStatus::Exited(0) => {}
            TerminalStatus::Exited(code) => self.errors.push_error(
                ErrorRecord::new(
                    ErrorKind::Exit,
                    Severity::Warn,
                    format!("exited with exit code {code}"),
                )
                .with_code(ExitCode(code)),
            ),
            TerminalStatus::Signaled(number) => {
                let expected = self
                    .signals
                    .as_ref()
                    .and_then(SignalHandle::last_sent)
                    .map(|sent| sent.number() == number)
                    .unwrap_or(false);
                let record = if expected {
                    ErrorRecord::new(
                        ErrorKind::Signal,
                        Severity::Warn,
                        format!("terminated by {} ({number}) as requested", signal_name(number)),
                    )
                } else {
                    ErrorRecord::new(
                        ErrorKind::Signal,
                        Severity::Error,
                        format!("died unexpectedly from {} ({number})", signal_name(number)),
                    )
                };
                self.errors.push_error(record.with_code(SignalNumber(number)));
            }
        }
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    pub fn take_outcome(&mut self) -> Option<ExecutionOutcome> {
        self.outcome.take()
    }

    /// Bytes captured so far. Safe mid-run; complete only after `cleanup()`.
    pub fn read_captured_output(&mut self, stream: StreamKind, clear_existing: bool) -> Vec<u8> {
        if let Some(outcome) = self.outcome.as_mut() {
            let bytes = match stream {
                StreamKind::Stdout => &mut outcome.stdout,
                StreamKind::Stderr => &mut outcome.stderr,
            };
            return if clear_existing {
                std::mem::take(bytes)
            } else {
                bytes.clone()
            };
        }
        let capture = match stream {
            StreamKind::Stdout => &self.stdout,
            StreamKind::Stderr => &self.stderr,
        };
        let mut guard = lock_capture(capture);
        if clear_existing {
            guard.take()
        } else {
            guard.snapshot()
        }
    }

    /// Signals sent to the current (or last) child, oldest first.
    pub fn signal_history(&self) -> Vec<SentSignal> {
        self.signals
            .as_ref()
            .map(SignalHandle::history)
            .unwrap_or_default()
    }

    pub fn errors(&self) -> &ErrorHolder {
        &self.errors
    }

    pub fn errors_mut(&mut self) -> &mut ErrorHolder {
        &mut self.errors
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(ExecLimits::default())
    }
}

#[cfg(unix)]
fn terminal_status(status: ExitStatus) -> TerminalStatus {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => TerminalStatus::Exited(code),
        (None, Some(signal)) => TerminalStatus::Signaled(signal),
        (None, None) => TerminalStatus::Exited(-1),
    }
}

#[cfg(not(unix))]
fn terminal_status(status: ExitStatus) -> TerminalStatus {
    TerminalStatus::Exited(status.code().unwrap_or(-1))
}
