use serde::Serialize;
use std::fmt;

use crate::error::TaxonomyError;
use crate::severity::Severity;

/// What failed. `IoChannel` records are symptoms and lose to every other kind
/// when a holder picks the most relevant error.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Spawn,
    IoChannel,
    Exit,
    Signal,
    Unsupported,
    AlreadyRunning,
    NotRunning,
    TypeMismatch,
    InvalidArgument,
    Custom(String),
}

impl ErrorKind {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorKind::Spawn => "spawn",
            ErrorKind::IoChannel => "io_channel",
            ErrorKind::Exit => "exit",
            ErrorKind::Signal => "signal",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::AlreadyRunning => "already_running",
            ErrorKind::NotRunning => "not_running",
            ErrorKind::TypeMismatch => "type_mismatch",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Errno(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SignalNumber(pub i32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ExitCode(pub i32);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CustomCode(pub String);

/// Typed code carried by a record. Exactly one concrete type per record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ErrorCode {
    Errno(Errno),
    Signal(SignalNumber),
    ExitCode(ExitCode),
    Custom(CustomCode),
}

impl ErrorCode {
    pub fn type_name(&self) -> &'static str {
        match self {
            ErrorCode::Errno(_) => Errno::NAME,
            ErrorCode::Signal(_) => SignalNumber::NAME,
            ErrorCode::ExitCode(_) => ExitCode::NAME,
            ErrorCode::Custom(_) => CustomCode::NAME,
        }
    }
}

/// A concrete code type that can be stored in and read back from [`ErrorCode`].
pub trait CodeType: Sized + Clone {
    const NAME: &'static str;

    fn wrap(self) -> ErrorCode;

    fn extract(code: &ErrorCode) -> Option<Self>;
}

macro_rules! code_type {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl CodeType for $ty {
            const NAME: &'static str = $name;

            fn wrap(self) -> ErrorCode {
                ErrorCode::$variant(self)
            }

            fn extract(code: &ErrorCode) -> Option<Self> {
                match code {
                    ErrorCode::$variant(value) => Some(value.clone()),
                    _ => None,
                }
            }
        }
    };
}

code_type!(Errno, Errno, "errno");
code_type!(SignalNumber, Signal, "signal");
code_type!(ExitCode, ExitCode, "exit_code");
code_type!(CustomCode, Custom, "custom");

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub severity: Severity,
    pub message: String,
    pub code: Option<ErrorCode>,
}

impl ErrorRecord {
    pub fn new(kind: ErrorKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code<T: CodeType>(mut self, code: T) -> Self {
        self.code = Some(code.wrap());
        self
    }

    pub fn raise_severity(&mut self) {
        self.severity = self.severity.raise();
    }

    pub fn lower_severity(&mut self) {
        self.severity = self.severity.lower();
    }

    /// Returns the stored code as `T`, or `TypeMismatch` when the record holds
    /// a different code type or none at all.
    pub fn code<T: CodeType>(&self) -> Result<T, TaxonomyError> {
        let found = self.code.as_ref().map(ErrorCode::type_name).unwrap_or("none");
        self.try_code::<T>().ok_or(TaxonomyError::TypeMismatch {
            expected: T::NAME,
            found,
        })
    }

    pub fn try_code<T: CodeType>(&self) -> Option<T> {
        self.code.as_ref().and_then(T::extract)
    }

    pub fn has_code<T: CodeType>(&self) -> bool {
        self.try_code::<T>().is_some()
    }

    pub fn is_io_channel(&self) -> bool {
        self.kind == ErrorKind::IoChannel
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.kind, self.severity, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_returns_matching_type() {
        let record = ErrorRecord::new(ErrorKind::Exit, Severity::Warn, "exit 2")
            .with_code(ExitCode(2));
        assert_eq!(record.code::<ExitCode>().expect("exit code"), ExitCode(2));
        assert!(record.has_code::<ExitCode>());
    }

    #[test]
    fn wrong_code_type_is_type_mismatch() {
        let record = ErrorRecord::new(ErrorKind::Signal, Severity::Error, "killed")
            .with_code(SignalNumber(9));
        let err = record.code::<Errno>().expect_err("mismatch");
        assert_eq!(
            err,
            TaxonomyError::TypeMismatch {
                expected: "errno",
                found: "signal",
            }
        );
        assert!(record.try_code::<Errno>().is_none());
        assert!(!record.has_code::<ExitCode>());
    }

    #[test]
    fn record_without_code_reports_none() {
        let record = ErrorRecord::new(ErrorKind::Unsupported, Severity::Info, "nope");
        match record.code::<CustomCode>() {
            Err(TaxonomyError::TypeMismatch { found, .. }) => assert_eq!(found, "none"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn severity_adjusts_in_place() {
        let mut record = ErrorRecord::new(ErrorKind::Exit, Severity::Warn, "exit 1");
        record.raise_severity();
        assert_eq!(record.severity, Severity::Error);
        record.lower_severity();
        record.lower_severity();
        assert_eq!(record.severity, Severity::Info);
    }

    #[test]
    fn custom_kind_uses_its_name() {
        let kind = ErrorKind::Custom("parse".to_string());
        assert_eq!(kind.to_string(), "parse");
    }
}
