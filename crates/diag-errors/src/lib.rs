mod error;
mod holder;
mod record;
mod severity;

pub use error::{ExecError, TaxonomyError};
pub use holder::{log_record, select_relevant, ErrorHolder, ErrorHook};
pub use record::{
    CodeType, CustomCode, Errno, ErrorCode, ErrorKind, ErrorRecord, ExitCode, SignalNumber,
};
pub use severity::Severity;
