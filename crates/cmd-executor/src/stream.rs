use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use diag_errors::{Errno, ErrorKind, ErrorRecord, Severity};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

const MAX_CONSECUTIVE_READ_FAILURES: u32 = 3;
const FIRST_LINE_LIMIT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Returned by watch handlers after every readiness event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchControl {
    Continue,
    Stop,
}

/// Bounded capture. Bytes past capacity are drained from the pipe and dropped.
#[derive(Debug, Default)]
pub(crate) struct CaptureBuffer {
    bytes: Vec<u8>,
    capacity: usize,
    truncated: bool,
}

impl CaptureBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            bytes: Vec::new(),
            capacity,
            truncated: false,
        }
    }

    pub(crate) fn append(&mut self, chunk: &[u8]) {
        let remaining = self.capacity.saturating_sub(self.bytes.len());
        let to_copy = remaining.min(chunk.len());
        self.bytes.extend_from_slice(&chunk[..to_copy]);
        if to_copy < chunk.len() {
            self.truncated = true;
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    pub(crate) fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.bytes)
    }

    pub(crate) fn truncated(&self) -> bool {
        self.truncated
    }
}

pub(crate) type SharedCapture = Arc<Mutex<CaptureBuffer>>;

pub(crate) fn shared_capture(capacity: usize) -> SharedCapture {
    Arc::new(Mutex::new(CaptureBuffer::new(capacity)))
}

pub(crate) fn lock_capture(capture: &SharedCapture) -> MutexGuard<'_, CaptureBuffer> {
    capture
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Per-stream logging state: remembers whether the first output line of this
/// stream has been traced yet.
#[derive(Debug)]
pub(crate) struct StreamLogContext {
    kind: StreamKind,
    pid: Option<u32>,
    pending: Vec<u8>,
    first_line_logged: bool,
}

impl StreamLogContext {
    pub(crate) fn new(kind: StreamKind, pid: Option<u32>) -> Self {
        Self {
            kind,
            pid,
            pending: Vec::new(),
            first_line_logged: false,
        }
    }

    fn observe(&mut self, chunk: &[u8]) {
        if self.first_line_logged {
            return;
        }
        let newline = chunk.iter().position(|byte| *byte == b'\n');
        let end = newline.unwrap_or(chunk.len());
        let room = FIRST_LINE_LIMIT.saturating_sub(self.pending.len());
        self.pending.extend_from_slice(&chunk[..end.min(room)]);
        if newline.is_some() || self.pending.len() >= FIRST_LINE_LIMIT {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.first_line_logged || self.pending.is_empty() {
            return;
        }
        self.first_line_logged = true;
        tracing::debug!(
            event = "exec.output.first_line",
            stream = self.kind.as_str(),
            pid = ?self.pid,
            line = %String::from_utf8_lossy(&self.pending),
            "first output line"
        );
        self.pending.clear();
    }
}

pub(crate) struct StreamWatch {
    kind: StreamKind,
    capture: SharedCapture,
    failures: mpsc::UnboundedSender<ErrorRecord>,
    log: StreamLogContext,
    consecutive_failures: u32,
    total_bytes: u64,
}

impl StreamWatch {
    pub(crate) fn new(
        kind: StreamKind,
        capture: SharedCapture,
        failures: mpsc::UnboundedSender<ErrorRecord>,
        pid: Option<u32>,
    ) -> Self {
        Self {
            kind,
            capture,
            failures,
            log: StreamLogContext::new(kind, pid),
            consecutive_failures: 0,
            total_bytes: 0,
        }
    }

    fn on_data(&mut self, chunk: &[u8]) -> WatchControl {
        self.consecutive_failures = 0;
        self.total_bytes += chunk.len() as u64;
        self.log.observe(chunk);
        lock_capture(&self.capture).append(chunk);
        WatchControl::Continue
    }

    fn on_error(&mut self, err: io::Error) -> WatchControl {
        if err.kind() == io::ErrorKind::Interrupted {
            return WatchControl::Continue;
        }
        self.consecutive_failures += 1;
        let mut record = ErrorRecord::new(
            ErrorKind::IoChannel,
            Severity::Warn,
            format!("error reading {}: {err}", self.kind.as_str()),
        );
        if let Some(errno) = err.raw_os_error() {
            record = record.with_code(Errno(errno));
        }
        let _ = self.failures.send(record);
        if self.consecutive_failures >= MAX_CONSECUTIVE_READ_FAILURES {
            WatchControl::Stop
        } else {
            WatchControl::Continue
        }
    }

    fn on_eof(&mut self) -> WatchControl {
        self.log.flush();
        tracing::trace!(
            event = "exec.output.eof",
            stream = self.kind.as_str(),
            bytes = self.total_bytes,
            "stream closed"
        );
        WatchControl::Stop
    }
}

/// Reads `reader` in `chunk_size` increments until the watch asks to stop.
pub(crate) async fn drain_stream<R: AsyncRead + Unpin>(
    mut reader: R,
    mut watch: StreamWatch,
    chunk_size: usize,
) {
    let mut chunk = vec![0u8; chunk_size.max(1)];
    loop {
        let control = match reader.read(&mut chunk).await {
            Ok(0) => watch.on_eof(),
            Ok(n) => watch.on_data(&chunk[..n]),
            Err(err) => watch.on_error(err),
        };
        if control == WatchControl::Stop {
            break;
        }
    }
}
