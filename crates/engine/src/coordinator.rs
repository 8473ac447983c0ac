//! Transaction bookkeeping
//!
//! The [`TransactionCoordinator`] counts transactions as the store starts,
//! commits and rolls them back. Atomicity itself comes from the database;
//! the coordinator only observes.
//!
//! The counters use Relaxed ordering. They are observational and do not
//! guard any other memory.

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Lifecycle counters for store transactions
#[derive(Debug, Default)]
pub struct TransactionCoordinator {
    active_count: AtomicU64,
    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_aborted: AtomicU64,
}

impl TransactionCoordinator {
    /// Coordinator with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a transaction start and return a guard that finishes it.
    pub fn begin(&self) -> ActiveTransaction<'_> {
        self.record_start();
        ActiveTransaction {
            coordinator: self,
            committed: false,
        }
    }

    /// Record a transaction start.
    pub fn record_start(&self) {
        self.active_count.fetch_add(1, Ordering::Relaxed);
        self.total_started.fetch_add(1, Ordering::Relaxed);
        debug!(target: "jsondb::txn", "Transaction started");
    }

    /// Record a transaction commit.
    pub fn record_commit(&self) {
        self.finish();
        self.total_committed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a transaction rollback.
    pub fn record_abort(&self) {
        self.finish();
        self.total_aborted.fetch_add(1, Ordering::Relaxed);
    }

    fn finish(&self) {
        // Saturating so a stray abort cannot underflow
        let _ = self
            .active_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |x| {
                Some(x.saturating_sub(1))
            });
    }

    /// Current snapshot of the counters.
    pub fn metrics(&self) -> TransactionMetrics {
        let started = self.total_started.load(Ordering::Relaxed);
        let committed = self.total_committed.load(Ordering::Relaxed);

        TransactionMetrics {
            active_count: self.active_count.load(Ordering::Relaxed),
            total_started: started,
            total_committed: committed,
            total_aborted: self.total_aborted.load(Ordering::Relaxed),
            commit_rate: if started > 0 {
                committed as f64 / started as f64
            } else {
                0.0
            },
        }
    }
}

/// One transaction counted as active.
///
/// Dropping the guard without [`commit`](Self::commit) records an abort, so a
/// transaction unwound by a panic is still counted as finished.
#[must_use = "dropping the guard records an abort"]
pub struct ActiveTransaction<'a> {
    coordinator: &'a TransactionCoordinator,
    committed: bool,
}

impl ActiveTransaction<'_> {
    /// Record the commit.
    pub fn commit(mut self) {
        self.committed = true;
        self.coordinator.record_commit();
    }

    /// Record the rollback.
    pub fn abort(self) {}
}

impl Drop for ActiveTransaction<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.coordinator.record_abort();
        }
    }
}

/// Transaction metrics
#[derive(Debug, Clone)]
pub struct TransactionMetrics {
    /// Transactions currently open
    pub active_count: u64,
    /// Transactions started
    pub total_started: u64,
    /// Transactions committed
    pub total_committed: u64,
    /// Transactions rolled back
    pub total_aborted: u64,
    /// committed / started
    pub commit_rate: f64,
}

impl TransactionMetrics {
    /// Transactions that finished either way
    pub fn total_completed(&self) -> u64 {
        self.total_committed + self.total_aborted
    }
}
