use std::time::Duration;

/// Default upper bound on a single ledger operation, including lock waits.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Runtime settings for a [`Ledger`](crate::application::ledger::Ledger).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Time budget for one transaction scope; on expiry the work is rolled back.
    pub deadline: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
        }
    }
}

impl LedgerConfig {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}
