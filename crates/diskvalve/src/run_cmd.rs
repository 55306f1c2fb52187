use anyhow::Context;
use cmd_executor::{
    CommandSpec, ExecutionOutcome, ExecutionPhase, SessionError, SyncExecutor, TerminalStatus,
};
use serde::Serialize;
use std::io::{IsTerminal, Write};
use tracing::info;

use crate::cli::RunArgs;
use crate::config::Config;

const SPAWN_FAILED_EXIT: i32 = 127;

#[derive(Debug, Serialize)]
struct RunSummary {
    command: String,
    status: Option<TerminalStatus>,
    elapsed_secs: Option<f64>,
    stdout: String,
    stderr: String,
    stdout_truncated: bool,
    stderr_truncated: bool,
    error: Option<String>,
}

impl RunSummary {
    fn new(command: &CommandSpec, outcome: Option<&ExecutionOutcome>, error: String) -> Self {
        Self {
            command: command.to_string(),
            status: outcome.map(|outcome| outcome.status),
            elapsed_secs: outcome.map(|outcome| outcome.elapsed.as_secs_f64()),
            stdout: outcome
                .map(|outcome| String::from_utf8_lossy(&outcome.stdout).into_owned())
                .unwrap_or_default(),
            stderr: outcome
                .map(|outcome| String::from_utf8_lossy(&outcome.stderr).into_owned())
                .unwrap_or_default(),
            stdout_truncated: outcome.is_some_and(|outcome| outcome.stdout_truncated),
            stderr_truncated: outcome.is_some_and(|outcome| outcome.stderr_truncated),
            error: (!error.is_empty()).then_some(error),
        }
    }
}

struct Spinner {
    enabled: bool,
    frame: usize,
}

impl Spinner {
    const FRAMES: [char; 4] = ['|', '/', '-', '\\'];

    fn new(enabled: bool) -> Self {
        Self { enabled, frame: 0 }
    }

    fn tick(&mut self, phase: ExecutionPhase) {
        if !self.enabled {
            return;
        }
        let label = match phase {
            ExecutionPhase::Running => "running",
            ExecutionPhase::Stopping => "stopping",
            _ => return,
        };
        let frame = Self::FRAMES[self.frame % Self::FRAMES.len()];
        self.frame = self.frame.wrapping_add(1);
        let mut stderr = std::io::stderr().lock();
        let _ = write!(stderr, "\r{frame} {label}");
        let _ = stderr.flush();
    }

    fn finish(&self) {
        if self.enabled && self.frame > 0 {
            let mut stderr = std::io::stderr().lock();
            let _ = write!(stderr, "\r\x1b[2K");
            let _ = stderr.flush();
        }
    }
}

pub(crate) fn command_from_argv(argv: &[String]) -> anyhow::Result<CommandSpec> {
    let (program, rest) = argv.split_first().context("missing program")?;
    let args = rest
        .iter()
        .map(|arg| shell_words::quote(arg).into_owned())
        .collect::<Vec<_>>()
        .join(" ");
    Ok(CommandSpec::new(program.clone(), args))
}

/// Maps the child's terminal status onto our own exit code.
pub(crate) fn exit_code_for(status: TerminalStatus) -> i32 {
    match status {
        TerminalStatus::Exited(code) => code,
        TerminalStatus::Signaled(signal) => 128 + signal,
    }
}

pub(crate) async fn run(config: &Config, args: RunArgs) -> anyhow::Result<i32> {
    let mut session = config.session.clone();
    if let Some(timeout) = args.timeout {
        session.timeout_secs = timeout.as_secs();
    }
    let executor = SyncExecutor::new(config.executor.clone(), session);
    let command = command_from_argv(&args.command)?;
    executor
        .set_command(command.clone())
        .await
        .with_context(|| format!("invalid command {command}"))?;

    let abort = executor.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!(event = "run.interrupt", "interrupt received, stopping command");
            abort.cancel();
        }
    });

    let mut spinner = Spinner::new(!args.json && std::io::stderr().is_terminal());
    let result = executor
        .execute_with(|phase| {
            spinner.tick(phase);
            true
        })
        .await;
    spinner.finish();
    interrupt.abort();

    let outcome = executor.outcome().await;
    let error = executor.error_message(true).await;
    let exit_code = match (&result, &outcome) {
        (_, Some(outcome)) => exit_code_for(outcome.status),
        (Err(SessionError::Vetoed), None) => 130,
        _ => SPAWN_FAILED_EXIT,
    };

    if args.json {
        let mut summary = RunSummary::new(&command, outcome.as_ref(), error);
        if summary.error.is_none() {
            summary.error = result.as_ref().err().map(ToString::to_string);
        }
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(exit_code);
    }

    if let Some(outcome) = &outcome {
        std::io::stdout().write_all(&outcome.stdout)?;
        std::io::stderr().write_all(&outcome.stderr)?;
    }
    if !error.is_empty() {
        eprintln!("{error}");
    } else if let Err(err) = &result {
        eprintln!("{err}");
    }
    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_is_quoted_back_into_one_line() {
        let argv = vec![
            "smartctl".to_string(),
            "-a".to_string(),
            "/dev/disk/by-id/ata-WDC WD40".to_string(),
        ];
        let command = command_from_argv(&argv).expect("command");
        assert_eq!(command.program(), "smartctl");
        assert_eq!(command.args(), "-a '/dev/disk/by-id/ata-WDC WD40'");
    }

    #[test]
    fn empty_argv_is_an_error() {
        assert!(command_from_argv(&[]).is_err());
    }

    #[test]
    fn signal_exit_codes_follow_shell_convention() {
        assert_eq!(exit_code_for(TerminalStatus::Exited(4)), 4);
        assert_eq!(exit_code_for(TerminalStatus::Signaled(15)), 143);
    }

    #[test]
    fn summary_omits_empty_error() {
        let command = CommandSpec::new("/bin/true", "");
        let summary = RunSummary::new(&command, None, String::new());
        let json = serde_json::to_value(&summary).expect("json");
        assert!(json["error"].is_null());
        assert!(json["status"].is_null());
    }
}
