use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

/// Number of transcoder output lines retained per job.
pub const LOG_CAPACITY: usize = 20;

/// Bounded, append-only line buffer shared between a job's relay worker
/// (the only writer) and any number of pollers.
///
/// Once sealed, appends are silently dropped. Cancellation seals the sink so
/// output still buffered in the pipe after the kill never shows up.
#[derive(Clone, Debug)]
pub struct LogSink {
    inner: Arc<Mutex<SinkInner>>,
}

#[derive(Debug)]
struct SinkInner {
    lines: VecDeque<String>,
    capacity: usize,
    sealed: bool,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new()
    }
}

impl LogSink {
    pub fn new() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Mutex::new(SinkInner {
                lines: VecDeque::with_capacity(capacity),
                capacity,
                sealed: false,
            })),
        }
    }

    /// Returns `false` if the line was dropped because the sink is sealed.
    pub fn push(&self, line: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.sealed {
            return false;
        }

        if inner.lines.len() == inner.capacity {
            inner.lines.pop_front();
        }
        inner.lines.push_back(line.into());
        true
    }

    pub fn seal(&self) {
        self.inner.lock().sealed = true;
    }

    /// Most recent lines, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().lines.iter().cloned().collect()
    }
}
