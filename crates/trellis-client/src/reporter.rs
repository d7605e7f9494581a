use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use tracing::debug;

pub const SUCCESS_RESULT: i32 = 0;
pub const FAILURE_RESULT: i32 = -1;

/// Shared slot holding the session result code. Readable after the bounded
/// outer wait expires, by which point the coordinator may be gone.
#[derive(Debug, Clone)]
pub struct ResultCell(Arc<AtomicI32>);

impl ResultCell {
    fn new() -> Self {
        Self(Arc::new(AtomicI32::new(FAILURE_RESULT)))
    }

    pub fn code(&self) -> i32 {
        self.0.load(Ordering::SeqCst)
    }

    fn store(&self, code: i32) {
        self.0.store(code, Ordering::SeqCst);
    }
}

/// Records the session outcome at most once. The first `finish` wins; later
/// calls are logged and ignored.
#[derive(Debug)]
pub struct SessionReporter {
    cell: ResultCell,
    finished: bool,
}

impl SessionReporter {
    pub fn new() -> Self {
        Self {
            cell: ResultCell::new(),
            finished: false,
        }
    }

    pub fn cell(&self) -> ResultCell {
        self.cell.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Returns true when this call recorded the result, false when a result
    /// was already in place.
    pub fn finish(&mut self, code: i32) -> bool {
        if self.finished {
            debug!(code, recorded = self.cell.code(), "duplicate finish ignored");
            return false;
        }
        self.finished = true;
        self.cell.store(code);
        true
    }
}

impl Default for SessionReporter {
    fn default() -> Self {
        Self::new()
    }
}
