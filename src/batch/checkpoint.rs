//! When to flush the artifacts of a batch run.
use crate::constants::StarIndex;

/// Flush schedule of the batch loop.
///
/// With `every = Some(n)`, the artifacts are flushed after processing star `e` whenever
/// `e > 0` and `e % n == 0`. Independently of the interval, a final flush always happens
/// when the loop ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CheckpointPolicy {
    pub every: Option<usize>,
}

impl CheckpointPolicy {
    pub fn new(every: Option<usize>) -> Self {
        CheckpointPolicy { every }
    }

    /// Flush only at the end of the run.
    pub fn at_end() -> Self {
        CheckpointPolicy { every: None }
    }

    /// Intermediate flush after star `e`?
    pub fn should_flush(&self, e: StarIndex) -> bool {
        match self.every {
            Some(n) if n > 0 => e > 0 && e % n == 0,
            _ => false,
        }
    }
}
