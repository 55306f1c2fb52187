use regex::Regex;
use serde::Serialize;
use std::fmt;
use std::sync::LazyLock;

/// Status of a device self-test as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum TestStatus {
    Unknown,
    InProgress,
    CompletedOk,
    CompletedFailed(String),
    AbortedByHost,
    Interrupted,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Unknown | TestStatus::InProgress)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Unknown => f.write_str("unknown"),
            TestStatus::InProgress => f.write_str("in progress"),
            TestStatus::CompletedOk => f.write_str("completed without error"),
            TestStatus::CompletedFailed(reason) => write!(f, "completed with failure: {reason}"),
            TestStatus::AbortedByHost => f.write_str("aborted by host"),
            TestStatus::Interrupted => f.write_str("interrupted by host reset"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub status: TestStatus,
    /// Only meaningful while the test is in progress.
    pub remaining_percent: Option<i8>,
}

/// Turns raw tool output into self-test facts.
pub trait OutputInterpreter: Send + Sync {
    fn start_acknowledged(&self, output: &str) -> bool;
    fn abort_acknowledged(&self, output: &str) -> bool;
    fn parse_status(&self, output: &str) -> Option<StatusReport>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SmartctlInterpreter;

static STATUS_VALUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*Self-test execution status:\s*\(\s*(\d+)\s*\)")
        .expect("constant regex pattern is valid")
});

static START_ACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^Testing has begun|Drive command "[^"]*" successful"#)
        .expect("constant regex pattern is valid")
});

static ABORT_ACK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^Self-testing aborted|Drive command "[^"]*" successful"#)
        .expect("constant regex pattern is valid")
});

impl SmartctlInterpreter {
    /// Decodes the self-test execution status byte: the high nibble is the
    /// status, the low nibble the remaining work in tens of percent.
    pub fn decode_status_byte(value: u8) -> StatusReport {
        let status = match value >> 4 {
            0x0 => TestStatus::CompletedOk,
            0x1 => TestStatus::AbortedByHost,
            0x2 => TestStatus::Interrupted,
            0x3 => TestStatus::CompletedFailed("fatal or unknown error".to_string()),
            0x4 => TestStatus::CompletedFailed("unknown test element failed".to_string()),
            0x5 => TestStatus::CompletedFailed("electrical element failed".to_string()),
            0x6 => TestStatus::CompletedFailed("servo (or seek) element failed".to_string()),
            0x7 => TestStatus::CompletedFailed("read element failed".to_string()),
            0x8 => TestStatus::CompletedFailed("handling damage suspected".to_string()),
            0xf => TestStatus::InProgress,
            _ => TestStatus::Unknown,
        };
        let remaining_percent = (status == TestStatus::InProgress)
            .then(|| ((value & 0x0f) as i8).min(10) * 10);
        StatusReport {
            status,
            remaining_percent,
        }
    }
}

impl OutputInterpreter for SmartctlInterpreter {
    fn start_acknowledged(&self, output: &str) -> bool {
        START_ACK.is_match(output)
    }

    fn abort_acknowledged(&self, output: &str) -> bool {
        ABORT_ACK.is_match(output)
    }

    fn parse_status(&self, output: &str) -> Option<StatusReport> {
        let captures = STATUS_VALUE.captures(output)?;
        let value = captures.get(1)?.as_str().parse::<u8>().ok()?;
        Some(Self::decode_status_byte(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IN_PROGRESS: &str = "\
General SMART Values:
Offline data collection status:  (0x00)\tOffline data collection activity
\t\t\t\t\twas never started.
Self-test execution status:      ( 249)\tSelf-test routine in progress...
\t\t\t\t\t90% of test remaining.
Total time to complete Offline
data collection: \t\t(  120) seconds.
";

    #[test]
    fn parses_in_progress_with_remaining() {
        let report = SmartctlInterpreter.parse_status(IN_PROGRESS).expect("status");
        assert_eq!(report.status, TestStatus::InProgress);
        assert_eq!(report.remaining_percent, Some(90));
    }

    #[test]
    fn decodes_terminal_states() {
        assert_eq!(
            SmartctlInterpreter::decode_status_byte(0).status,
            TestStatus::CompletedOk
        );
        assert_eq!(
            SmartctlInterpreter::decode_status_byte(0x10).status,
            TestStatus::AbortedByHost
        );
        assert_eq!(
            SmartctlInterpreter::decode_status_byte(0x21).status,
            TestStatus::Interrupted
        );
        let failed = SmartctlInterpreter::decode_status_byte(0x73);
        assert!(matches!(&failed.status, TestStatus::CompletedFailed(reason) if reason.contains("read")));
        assert_eq!(failed.remaining_percent, None);
    }

    #[test]
    fn missing_status_line_is_none() {
        assert!(SmartctlInterpreter.parse_status("smartctl 7.4\n").is_none());
    }

    #[test]
    fn recognizes_acknowledgements() {
        let start = "=== START OF OFFLINE IMMEDIATE AND SELF-TEST SECTION ===\n\
Sending command: \"Execute SMART Short self-test routine immediately in off-line mode\".\n\
Drive command \"Execute SMART Short self-test routine immediately in off-line mode\" successful.\n\
Testing has begun.\n";
        assert!(SmartctlInterpreter.start_acknowledged(start));
        assert!(SmartctlInterpreter.abort_acknowledged("Self-testing aborted!\n"));
        assert!(!SmartctlInterpreter.start_acknowledged("Can't start self-test without aborting current test\n"));
    }
}
