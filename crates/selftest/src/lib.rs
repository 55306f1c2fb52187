//! Device self-test sessions: start a test, poll its progress at a rate
//! derived from the expected duration, estimate the time left, and abort.

pub mod capability;
mod interpret;
mod kind;
mod runner;
mod session;

#[cfg(test)]
mod test_utils;

pub use capability::{CapabilitySource, CapabilityValue, StaticCapabilities};
pub use interpret::{OutputInterpreter, SmartctlInterpreter, StatusReport, TestStatus};
pub use kind::TestKind;
pub use runner::{CommandRunner, SmartctlRunner, SmartctlTarget};
pub use session::{
    poll_interval_for, SelfTest, SelfTestError, TestState, DEFAULT_POLL_INTERVAL,
    MIN_POLL_INTERVAL,
};
