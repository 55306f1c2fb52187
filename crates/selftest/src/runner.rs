use async_trait::async_trait;
use cmd_executor::{smartctl_translator, CommandSpec, SyncExecutor, TerminalStatus};
use std::sync::Arc;

/// smartctl exit bits that mean the command itself did not get through.
const SMARTCTL_FATAL_BITS: i32 = 0b0000_0111;

/// Issues one device command and returns its stdout, or a human-readable
/// failure message.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, args: &str) -> Result<String, String>;
}

#[derive(Debug, Clone)]
pub struct SmartctlTarget {
    pub binary: String,
    pub device: String,
    pub extra_args: Vec<String>,
}

impl SmartctlTarget {
    pub fn new(binary: impl Into<String>, device: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            device: device.into(),
            extra_args: Vec::new(),
        }
    }

    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    fn command_for(&self, args: &str) -> CommandSpec {
        let mut line: Vec<String> = self
            .extra_args
            .iter()
            .map(|arg| shell_words::quote(arg).into_owned())
            .collect();
        if !args.trim().is_empty() {
            line.push(args.trim().to_string());
        }
        line.push(shell_words::quote(&self.device).into_owned());
        CommandSpec::new(self.binary.clone(), line.join(" "))
    }
}

/// Runs smartctl through a shared [`SyncExecutor`]; aborting that executor
/// cancels whichever command is in flight.
pub struct SmartctlRunner {
    executor: Arc<SyncExecutor>,
    target: SmartctlTarget,
}

impl SmartctlRunner {
    pub fn new(executor: SyncExecutor, target: SmartctlTarget) -> Self {
        let executor = executor
            .with_exit_code_translator(smartctl_translator())
            .with_error_header("Smartctl exited with error:\n\n");
        Self {
            executor: Arc::new(executor),
            target,
        }
    }

    pub fn executor(&self) -> Arc<SyncExecutor> {
        self.executor.clone()
    }

    pub fn target(&self) -> &SmartctlTarget {
        &self.target
    }
}

#[async_trait]
impl CommandRunner for SmartctlRunner {
    async fn run(&self, args: &str) -> Result<String, String> {
        let command = self.target.command_for(args);
        tracing::debug!(
            event = "selftest.smartctl.run",
            device = %self.target.device,
            command = %command,
            "running smartctl"
        );
        if let Err(err) = self.executor.run(command).await {
            let message = self.executor.error_message(true).await;
            return Err(if message.is_empty() {
                err.to_string()
            } else {
                message
            });
        }
        let Some(outcome) = self.executor.outcome().await else {
            return Err(self.executor.error_message(true).await);
        };
        let failed = match outcome.status {
            TerminalStatus::Exited(code) => code & SMARTCTL_FATAL_BITS != 0,
            TerminalStatus::Signaled(_) => true,
        };
        if failed {
            return Err(self.executor.error_message(true).await);
        }
        Ok(String::from_utf8_lossy(&outcome.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cmd_executor::{ExecLimits, SessionConfig};

    #[test]
    fn builds_device_command_line() {
        let target = SmartctlTarget::new("smartctl", "/dev/disk by-id/ata-1")
            .with_extra_args(vec!["-d".to_string(), "sat".to_string()]);
        let command = target.command_for("-t short");
        assert_eq!(command.program(), "smartctl");
        assert_eq!(command.args(), "-d sat -t short '/dev/disk by-id/ata-1'");
    }

    #[tokio::test]
    async fn returns_stdout_on_success() {
        let runner = SmartctlRunner::new(
            SyncExecutor::new(ExecLimits::default(), SessionConfig::default()),
            SmartctlTarget::new("/bin/echo", "/dev/sda"),
        );
        let output = runner.run("-c").await.expect("run");
        assert_eq!(output.trim(), "-c /dev/sda");
    }

    #[tokio::test]
    async fn fatal_exit_bits_become_translated_error() {
        let runner = SmartctlRunner::new(
            SyncExecutor::new(ExecLimits::default(), SessionConfig::default()),
            SmartctlTarget::new("/bin/sh", "/dev/sda")
                .with_extra_args(vec!["-c".to_string(), "exit 2".to_string()]),
        );
        let err = runner.run("").await.expect_err("should fail");
        assert!(err.starts_with("Smartctl exited with error:"));
        assert!(err.contains("Device open failed"));
    }

    #[tokio::test]
    async fn informational_exit_bits_still_return_output() {
        let runner = SmartctlRunner::new(
            SyncExecutor::new(ExecLimits::default(), SessionConfig::default()),
            SmartctlTarget::new("/bin/sh", "/dev/sda")
                .with_extra_args(vec!["-c".to_string(), "echo ok; exit 64".to_string()]),
        );
        let output = runner.run("").await.expect("run");
        assert_eq!(output.trim(), "ok");
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_failure() {
        let runner = SmartctlRunner::new(
            SyncExecutor::default(),
            SmartctlTarget::new("/nonexistent/smartctl", "/dev/sda"),
        );
        let err = runner.run("-c").await.expect_err("should fail");
        assert!(!err.is_empty());
    }
}
