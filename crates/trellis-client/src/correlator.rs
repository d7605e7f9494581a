use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates supported `CoverageSignal` values.
pub enum CoverageSignal {
    Pending,
    Satisfied,
}

/// Reconciles an announced universe size against members observed on the
/// telemetry stream. The expected total and the member events may arrive in
/// any order; totals may be re-announced, in which case the latest wins.
/// `Satisfied` is signalled exactly once per reset.
#[derive(Debug, Default)]
pub struct CoverageCorrelator {
    expected: Option<u64>,
    observed: u64,
    satisfied: bool,
}

impl CoverageCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn record_expected(&mut self, total: u64) -> CoverageSignal {
        self.expected = Some(total);
        trace!(expected = total, observed = self.observed, "coverage total announced");
        self.evaluate()
    }

    pub fn record_member(&mut self) -> CoverageSignal {
        self.observed = self.observed.saturating_add(1);
        trace!(expected = ?self.expected, observed = self.observed, "coverage member observed");
        self.evaluate()
    }

    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    // Coverage uses >= rather than ==: a re-announced total below an
    // already-passed tally must not stall the wait.
    fn evaluate(&mut self) -> CoverageSignal {
        if self.satisfied {
            return CoverageSignal::Pending;
        }
        match self.expected {
            Some(expected) if self.observed >= expected => {
                self.satisfied = true;
                CoverageSignal::Satisfied
            }
            _ => CoverageSignal::Pending,
        }
    }
}
