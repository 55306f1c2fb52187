use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::capability::{keys, CapabilityValue, StaticCapabilities};
use crate::runner::CommandRunner;

/// Replays queued responses and records every argument string it was given.
#[derive(Default)]
pub struct FakeRunner {
    responses: Mutex<VecDeque<Result<String, String>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, response: Result<&str, &str>) -> &Self {
        let response = response.map(str::to_string).map_err(str::to_string);
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(response);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("calls lock").len()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, args: &str) -> Result<String, String> {
        self.calls.lock().expect("calls lock").push(args.to_string());
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(format!("no response queued for {args}")))
    }
}

pub const START_ACK: &str = "Drive command \"Execute SMART Short self-test routine immediately in off-line mode\" successful.\nTesting has begun.\n";
pub const ABORT_ACK: &str = "Self-testing aborted!\n";

pub fn status_output(value: u8) -> String {
    format!("General SMART Values:\nSelf-test execution status:      ({value:>4})\tstatus\n")
}

pub fn ata_capabilities() -> StaticCapabilities {
    StaticCapabilities::new()
        .with(keys::SELF_TESTS_SUPPORTED, CapabilityValue::Flag(true))
        .with(keys::CONVEYANCE_SUPPORTED, CapabilityValue::Flag(false))
        .with(keys::SHORT_DURATION, CapabilityValue::Seconds(120))
        .with(keys::EXTENDED_DURATION, CapabilityValue::Seconds(5400))
}
