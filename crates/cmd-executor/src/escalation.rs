use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::process::{wait_exited, ExitSlot, Signal, SignalHandle};

/// Timer task that escalates terminate -> kill. Both delays are measured from
/// arm time. Dropping the value disarms it.
pub(crate) struct EscalationTimers {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl EscalationTimers {
    pub(crate) fn arm(
        handle: SignalHandle,
        mut exit_rx: watch::Receiver<ExitSlot>,
        terminate_after: Option<Duration>,
        kill_after: Option<Duration>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let armed_at = Instant::now();
        let mut stages: Vec<(Duration, Signal)> = Vec::new();
        if let Some(after) = terminate_after {
            stages.push((after, Signal::Terminate));
        }
        if let Some(after) = kill_after {
            stages.push((after, Signal::Kill));
        }
        stages.sort_by_key(|(after, _)| *after);

        let task = tokio::spawn(async move {
            for (after, signal) in stages {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = wait_exited(&mut exit_rx) => return,
                    _ = tokio::time::sleep_until(armed_at + after) => {}
                }
                if let Err(err) = handle.send(signal) {
                    tracing::debug!(
                        event = "exec.escalation.skipped",
                        error = %err,
                        "escalation signal not sent"
                    );
                    return;
                }
            }
        });
        Self { cancel, task }
    }
}

impl Drop for EscalationTimers {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}
