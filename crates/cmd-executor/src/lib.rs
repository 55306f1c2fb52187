//! Runs external diagnostic commands: [`ProcessExecutor`] owns one child
//! process with non-blocking capture and signal escalation, [`SyncExecutor`]
//! wraps it into a call that returns once the child is gone.

mod command;
mod escalation;
mod executor;
mod limits;
mod process;
mod stream;
mod sync;
mod translate;

pub use command::CommandSpec;
pub use executor::{ExecutionOutcome, ProcessExecutor, TerminalStatus};
pub use limits::{ExecLimits, SessionConfig};
pub use process::{SentSignal, Signal};
pub use stream::{StreamKind, WatchControl};
pub use sync::{ExecutionPhase, SessionError, SyncExecutor};
pub use translate::{smartctl_exit_status_message, smartctl_translator, ExitCodeTranslator};
