mod cli;
mod config;
mod logging;
mod run_cmd;
mod selftest_cmd;

use crate::cli::{Args, Command};
use crate::config::Config;
use crate::logging::init_tracing;
use anyhow::Context;
use clap::Parser;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let file_guard = init_tracing(args.log_dir.as_deref(), args.log_to_stderr)?;

    let config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    let code = match args.command {
        Command::Run(run) => run_cmd::run(&config, run).await?,
        Command::Selftest(selftest) => selftest_cmd::run(&config, selftest).await?,
    };

    drop(file_guard);
    std::process::exit(code);
}
