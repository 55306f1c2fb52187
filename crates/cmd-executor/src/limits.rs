use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecLimits {
    pub stdout_buffer_bytes: usize,
    pub stderr_buffer_bytes: usize,
    pub read_chunk_bytes: usize,
    pub drain_grace_ms: u64,
}

impl ExecLimits {
    pub fn drain_grace(&self) -> Duration {
        Duration::from_millis(self.drain_grace_ms)
    }
}

impl Default for ExecLimits {
    fn default() -> Self {
        Self {
            stdout_buffer_bytes: 100 * 1024,
            stderr_buffer_bytes: 10 * 1024,
            read_chunk_bytes: 256,
            drain_grace_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub tick_interval_ms: u64,
    pub kill_after_ms: u64,
    /// Zero disables the whole-run timeout.
    pub timeout_secs: u64,
}

impl SessionConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn kill_after(&self) -> Duration {
        Duration::from_millis(self.kill_after_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 40,
            kill_after_ms: 3000,
            timeout_secs: 0,
        }
    }
}
