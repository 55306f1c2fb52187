use cmd_executor::SyncExecutor;
use selftest::{
    SelfTest, SelfTestError, SmartctlRunner, SmartctlTarget, TestState, TestStatus,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::SelftestArgs;
use crate::config::Config;

/// Exit code when the device cannot run or abort the requested test.
const INCAPABLE_EXIT: i32 = 2;

#[derive(Debug, Serialize)]
struct ProgressLine<'a> {
    device: &'a str,
    kind: &'a str,
    state: &'a TestState,
    remaining_percent: Option<i8>,
    eta_secs: Option<u64>,
}

fn report(test: &SelfTest, device: &str, json: bool) -> anyhow::Result<()> {
    let remaining = (test.remaining_percent() >= 0).then(|| test.remaining_percent());
    let eta = test.remaining_time();
    if json {
        let line = ProgressLine {
            device,
            kind: test.kind().smartctl_name(),
            state: test.state(),
            remaining_percent: remaining,
            eta_secs: eta.map(|eta| eta.as_secs()),
        };
        println!("{}", serde_json::to_string(&line)?);
        return Ok(());
    }
    match (test.state(), remaining, eta) {
        (TestState::Running, Some(remaining), Some(eta)) => println!(
            "{}: {remaining}% remaining, about {} left",
            test.kind(),
            humantime::format_duration(Duration::from_secs(eta.as_secs()))
        ),
        (TestState::Running, Some(remaining), None) => {
            println!("{}: {remaining}% remaining", test.kind())
        }
        (TestState::Running, None, _) => println!("{}: in progress", test.kind()),
        _ => println!("{}: {}", test.kind(), test.status()),
    }
    Ok(())
}

fn incapable(err: &SelfTestError) -> bool {
    matches!(
        err,
        SelfTestError::Unsupported(_) | SelfTestError::NotAbortable(_)
    )
}

pub(crate) async fn run(config: &Config, args: SelftestArgs) -> anyhow::Result<i32> {
    let executor = SyncExecutor::new(config.executor.clone(), config.session.clone());
    let target = SmartctlTarget::new(config.smartctl.binary.clone(), args.device.clone())
        .with_extra_args(config.smartctl.extra_args.clone());
    let runner = Arc::new(SmartctlRunner::new(executor, target));
    let mut test = SelfTest::new(args.kind, runner, Arc::new(config.capabilities.clone()));

    if let Err(err) = test.start().await {
        eprintln!("{err}");
        return Ok(if incapable(&err) { INCAPABLE_EXIT } else { 1 });
    }

    let interrupted = CancellationToken::new();
    let interrupt = {
        let interrupted = interrupted.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!(event = "selftest.interrupt", "interrupt received, aborting self-test");
                interrupted.cancel();
            }
        })
    };
    let deadline = args.abort_after.map(|after| Instant::now() + after);
    let mut interval = test.poll_interval();

    while test.is_active() {
        report(&test, &args.device, args.json)?;
        let wait = match deadline {
            Some(deadline) => interval.min(deadline.saturating_duration_since(Instant::now())),
            None => interval,
        };
        tokio::select! {
            _ = interrupted.cancelled() => {}
            _ = tokio::time::sleep(wait) => {}
        }
        let expired = deadline.is_some_and(|deadline| Instant::now() >= deadline);
        if interrupted.is_cancelled() || expired {
            if let Err(err) = test.force_stop().await {
                eprintln!("{err}");
                interrupt.abort();
                return Ok(if incapable(&err) { INCAPABLE_EXIT } else { 1 });
            }
            break;
        }
        match test.update().await {
            Ok(next) => interval = next,
            Err(SelfTestError::Tool(message)) => {
                warn!(event = "selftest.poll_failed", error = %message, "status query failed, retrying");
            }
            Err(err) => {
                interrupt.abort();
                return Err(err.into());
            }
        }
    }
    interrupt.abort();

    report(&test, &args.device, args.json)?;
    Ok(match test.status() {
        TestStatus::CompletedOk => 0,
        _ => 1,
    })
}
