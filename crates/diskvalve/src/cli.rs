use clap::{Args as ClapArgs, Parser, Subcommand};
use selftest::TestKind;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "diskvalve",
    version,
    about = "Run storage diagnostic commands and device self-tests"
)]
pub(crate) struct Args {
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
    #[arg(long)]
    pub(crate) log_dir: Option<PathBuf>,
    #[arg(long, default_value_t = false)]
    pub(crate) log_to_stderr: bool,
    #[command(subcommand)]
    pub(crate) command: Command,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Run one command and report its output and exit status.
    Run(RunArgs),
    /// Start a device self-test and follow it to completion.
    Selftest(SelftestArgs),
}

#[derive(ClapArgs, Debug)]
pub(crate) struct RunArgs {
    #[arg(long, value_parser = parse_whole_seconds)]
    pub(crate) timeout: Option<Duration>,
    #[arg(long, default_value_t = false)]
    pub(crate) json: bool,
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub(crate) command: Vec<String>,
}

#[derive(ClapArgs, Debug)]
pub(crate) struct SelftestArgs {
    #[arg(long)]
    pub(crate) device: String,
    #[arg(long, default_value = "short")]
    pub(crate) kind: TestKind,
    #[arg(long, value_parser = humantime::parse_duration)]
    pub(crate) abort_after: Option<Duration>,
    #[arg(long, default_value_t = false)]
    pub(crate) json: bool,
}

/// Run timeouts are enforced at second granularity.
pub(crate) fn parse_whole_seconds(value: &str) -> Result<Duration, String> {
    let duration = humantime::parse_duration(value).map_err(|err| err.to_string())?;
    if duration.is_zero() || duration.subsec_nanos() != 0 {
        return Err(format!("expected a whole number of seconds, got {value}"));
    }
    Ok(duration)
}
