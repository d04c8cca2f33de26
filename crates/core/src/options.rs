//! Per-call execution options.

use std::time::Duration;

/// Options that govern one resolution or cache call without changing what is
/// being asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallOptions {
    /// Propagate cache failures instead of degrading to a miss.
    pub strict: bool,
    /// Upper bound for each storage or cache round trip.
    pub timeout: Duration,
}

impl Default for CallOptions {
    fn default() -> Self {
        Self { strict: false, timeout: Duration::from_millis(5_000) }
    }
}
