use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use diag_errors::ExecError;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Terminate,
    Kill,
}

impl Signal {
    pub fn number(self) -> i32 {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

pub(crate) fn signal_name(number: i32) -> &'static str {
    match number {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        _ => "signal",
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SentSignal {
    pub signal: Signal,
    pub at: Instant,
}

/// What the exit-watch task observed.
#[derive(Debug, Clone)]
pub(crate) struct ChildExit {
    pub(crate) result: Result<ExitStatus, String>,
    pub(crate) at: Instant,
}

pub(crate) type ExitSlot = Option<ChildExit>;

pub(crate) async fn wait_exited(rx: &mut watch::Receiver<ExitSlot>) {
    // A dropped sender means the exit task is gone; nothing left to wait for.
    let _ = rx.wait_for(Option::is_some).await;
}

#[cfg(unix)]
pub(crate) fn apply_process_group(cmd: &mut Command) {
    unsafe {
        cmd.pre_exec(|| {
            if libc::setsid() == -1 {
                return Err(io::Error::last_os_error());
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
pub(crate) fn apply_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: i32) -> io::Result<()> {
    let rc = unsafe { libc::kill(-(pid as i32), signal) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: i32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signals are not supported on this platform",
    ))
}

/// Sends signals to one child's process group and remembers what was sent.
#[derive(Debug, Clone)]
pub(crate) struct SignalHandle {
    pid: Option<u32>,
    exit_rx: watch::Receiver<ExitSlot>,
    sent: Arc<Mutex<Vec<SentSignal>>>,
}

impl SignalHandle {
    pub(crate) fn new(pid: Option<u32>, exit_rx: watch::Receiver<ExitSlot>) -> Self {
        Self {
            pid,
            exit_rx,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn send(&self, signal: Signal) -> Result<(), ExecError> {
        if self.exit_rx.borrow().is_some() {
            return Err(ExecError::NotRunning);
        }
        let pid = self.pid.ok_or(ExecError::NotRunning)?;
        match signal_group(pid, signal.number()) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(libc::ESRCH) => {
                return Err(ExecError::NotRunning);
            }
            Err(err) => {
                return Err(ExecError::Signal {
                    signal: signal.number(),
                    message: err.to_string(),
                });
            }
        }
        self.lock_sent().push(SentSignal {
            signal,
            at: Instant::now(),
        });
        tracing::info!(
            event = "exec.signal",
            pid = pid,
            signal = signal_name(signal.number()),
            "signal sent"
        );
        Ok(())
    }

    pub(crate) fn last_sent(&self) -> Option<Signal> {
        self.lock_sent().last().map(|sent| sent.signal)
    }

    pub(crate) fn history(&self) -> Vec<SentSignal> {
        self.lock_sent().clone()
    }

    fn lock_sent(&self) -> MutexGuard<'_, Vec<SentSignal>> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
