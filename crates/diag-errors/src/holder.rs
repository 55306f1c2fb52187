use std::fmt;
use std::sync::Arc;

use crate::record::ErrorRecord;
use crate::severity::Severity;

pub type ErrorHook = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

/// Ordered, append-only list of error records (oldest first).
#[derive(Default, Clone)]
pub struct ErrorHolder {
    errors: Vec<ErrorRecord>,
    hook: Option<ErrorHook>,
}

impl ErrorHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the default logging notification.
    pub fn with_hook(hook: ErrorHook) -> Self {
        Self {
            errors: Vec::new(),
            hook: Some(hook),
        }
    }

    pub fn set_hook(&mut self, hook: Option<ErrorHook>) {
        self.hook = hook;
    }

    pub fn push_error(&mut self, record: ErrorRecord) {
        match &self.hook {
            Some(hook) => hook(&record),
            None => log_record(&record),
        }
        self.errors.push(record);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ErrorRecord] {
        &self.errors
    }

    pub fn clear_errors(&mut self) {
        self.errors.clear();
    }

    pub fn take_errors(&mut self) -> Vec<ErrorRecord> {
        std::mem::take(&mut self.errors)
    }

    pub fn most_relevant(&self) -> Option<&ErrorRecord> {
        select_relevant(&self.errors)
    }

    /// Clones the most relevant record out and clears the list.
    pub fn take_most_relevant(&mut self) -> Option<ErrorRecord> {
        let selected = self.most_relevant().cloned();
        self.clear_errors();
        selected
    }
}

impl fmt::Debug for ErrorHolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorHolder")
            .field("errors", &self.errors)
            .field("hook", &self.hook.is_some())
            .finish()
    }
}

/// Newest non io-channel record; falls back to the newest io-channel record
/// when nothing else explains the failure.
pub fn select_relevant(errors: &[ErrorRecord]) -> Option<&ErrorRecord> {
    errors
        .iter()
        .rev()
        .find(|record| !record.is_io_channel())
        .or_else(|| errors.last())
}

pub fn log_record(record: &ErrorRecord) {
    let kind = record.kind.as_str();
    let code = record.code.as_ref().map(|code| format!("{code:?}"));
    match record.severity {
        Severity::None => {
            tracing::trace!(kind = %kind, code = ?code, "{}", record.message)
        }
        Severity::Dump => {
            tracing::debug!(kind = %kind, code = ?code, "{}", record.message)
        }
        Severity::Info => {
            tracing::info!(kind = %kind, code = ?code, "{}", record.message)
        }
        Severity::Warn => {
            tracing::warn!(kind = %kind, code = ?code, "{}", record.message)
        }
        Severity::Error | Severity::Fatal => {
            tracing::error!(
                kind = %kind,
                code = ?code,
                fatal = record.severity == Severity::Fatal,
                "{}",
                record.message
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{ErrorKind, ExitCode};
    use std::sync::Mutex;

    fn io_record(message: &str) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::IoChannel, Severity::Warn, message)
    }

    #[test]
    fn push_keeps_order_and_notifies_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut holder = ErrorHolder::with_hook(Arc::new(move |record: &ErrorRecord| {
            sink.lock().expect("lock").push(record.message.clone());
        }));
        holder.push_error(io_record("first"));
        holder.push_error(io_record("second"));
        assert!(holder.has_errors());
        assert_eq!(holder.errors()[0].message, "first");
        assert_eq!(holder.errors()[1].message, "second");
        assert_eq!(*seen.lock().expect("lock"), vec!["first", "second"]);
        holder.clear_errors();
        assert!(!holder.has_errors());
    }

    #[test]
    fn relevant_error_skips_io_channel_noise() {
        let mut holder = ErrorHolder::new();
        holder.push_error(io_record("early read failure"));
        holder.push_error(
            ErrorRecord::new(ErrorKind::Exit, Severity::Warn, "exit 4").with_code(ExitCode(4)),
        );
        holder.push_error(io_record("late read failure"));
        let selected = holder.take_most_relevant().expect("selected");
        assert_eq!(selected.kind, ErrorKind::Exit);
        assert!(!holder.has_errors());
    }

    #[test]
    fn relevant_error_falls_back_to_io_channel() {
        let mut holder = ErrorHolder::new();
        holder.push_error(io_record("old"));
        holder.push_error(io_record("new"));
        assert_eq!(holder.most_relevant().expect("selected").message, "new");
    }

    #[test]
    fn empty_holder_has_no_relevant_error() {
        let mut holder = ErrorHolder::new();
        assert!(holder.take_most_relevant().is_none());
    }
}
