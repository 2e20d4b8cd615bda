use crate::domain::ports::{BoxFuture, LedgerStoreBox, LedgerTransactionBox};
use crate::error::{LedgerError, Result};
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Runs units of work inside a store transaction.
///
/// The transaction is committed only when the work returns `Ok`. An error, an
/// expired deadline or a dropped caller future leaves the store untouched.
pub struct TransactionScope {
    store: LedgerStoreBox,
    deadline: Duration,
}

impl TransactionScope {
    pub fn new(store: LedgerStoreBox, deadline: Duration) -> Self {
        Self { store, deadline }
    }

    /// Executes `work` in a fresh transaction. Begin, the work and the commit
    /// share the configured deadline.
    ///
    /// `operation` names the unit of work in logs and in `DeadlineExceeded`.
    pub async fn run<T, F>(&self, operation: &'static str, work: F) -> Result<T>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut LedgerTransactionBox) -> BoxFuture<'t, Result<T>> + Send,
    {
        let started = Instant::now();
        let expired = || LedgerError::DeadlineExceeded {
            operation,
            deadline: self.deadline,
        };

        let mut tx = timeout(self.deadline, self.store.begin())
            .await
            .map_err(|_| expired())??;
        debug!(operation, "transaction started");

        let remaining = self.deadline.saturating_sub(started.elapsed());
        let outcome = match timeout(remaining, work(&mut tx)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(expired()),
        };

        match outcome {
            Ok(value) => {
                let remaining = self.deadline.saturating_sub(started.elapsed());
                // Timing out drops the transaction, which discards its writes.
                match timeout(remaining, tx.commit()).await {
                    Ok(committed) => committed?,
                    Err(_) => {
                        let err = expired();
                        warn!(operation, code = err.code(), error = %err, "commit abandoned");
                        return Err(err);
                    }
                }
                debug!(operation, elapsed = ?started.elapsed(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(operation, error = %rollback_err, "rollback failed");
                }
                warn!(operation, code = err.code(), error = %err, "transaction rolled back");
                Err(err)
            }
        }
    }
}
