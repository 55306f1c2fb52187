use thiserror::Error;

use crate::record::{Errno, ErrorKind, ErrorRecord};
use crate::severity::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaxonomyError {
    #[error("error code type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },
}

/// Contract and spawn failures returned by the executor layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("executor is not configured")]
    NotConfigured,
    #[error("a command is already running")]
    AlreadyRunning,
    #[error("no command is running")]
    NotRunning,
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        program: String,
        message: String,
        errno: Option<i32>,
    },
    #[error("failed to send signal {signal}: {message}")]
    Signal { signal: i32, message: String },
}

impl ExecError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ExecError::NotConfigured => ErrorKind::InvalidArgument,
            ExecError::AlreadyRunning => ErrorKind::AlreadyRunning,
            ExecError::NotRunning => ErrorKind::NotRunning,
            ExecError::Spawn { .. } => ErrorKind::Spawn,
            ExecError::Signal { .. } => ErrorKind::Signal,
        }
    }

    pub fn to_record(&self) -> ErrorRecord {
        let record = ErrorRecord::new(self.kind(), Severity::Error, self.to_string());
        match self {
            ExecError::Spawn {
                errno: Some(errno), ..
            } => record.with_code(Errno(*errno)),
            _ => record,
        }
    }
}
