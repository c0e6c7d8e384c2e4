// crates/cargohold-metadb/src/txn.rs
// ============================================================================
// Module: Metadata DB Transactions
// Description: Immediate-mode transaction lifecycle with timing.
// Purpose: Make long write transactions visible and rollback always safe.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! One transaction per connection: `Idle -> InProgress -> {Committed,
//! RolledBack} -> Idle`. Begin takes the write lock up front through the
//! busy-retry loop; commit and rollback both log when the transaction ran
//! past the slow threshold and always return the connection to idle.
//! Rollback is designed for generic cleanup paths: with no open transaction
//! it is a silent no-op, and a failed rollback is a logged anomaly, never an
//! escalated error.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;
use std::time::Instant;

use tracing::info;
use tracing::warn;

use crate::db::MetaDb;
use crate::db::SLOW_OPERATION;
use crate::error::DbError;
use crate::query::StepOutcome;
use crate::severity;
use crate::severity::Severity;

// ============================================================================
// SECTION: Transaction Manager
// ============================================================================

impl MetaDb {
    /// Returns whether a transaction is currently open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.begin_at.get().is_some()
    }

    /// Returns the time since the open transaction began, or zero when idle.
    #[must_use]
    pub fn txn_elapsed(&self) -> Duration {
        self.begin_at.get().map_or(Duration::ZERO, |at| at.elapsed())
    }

    /// Begins an immediate write transaction.
    ///
    /// The write lock is acquired at begin; contention goes through the
    /// bounded busy-retry loop. The begin timestamp is recorded on success.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Busy`] when the lock stays held past the busy
    /// timeout, or any other [`DbError`] from preparing or stepping.
    pub fn begin(&self) -> Result<(), DbError> {
        let mut query = self.prepare("BEGIN IMMEDIATE TRANSACTION")?;
        let outcome = query.step_busy_retry()?;
        drop(query);
        if outcome == StepOutcome::Done {
            self.begin_at.set(Some(Instant::now()));
            return Ok(());
        }
        warn!(db = %self.name, outcome = outcome.label(), "begin failed");
        Err(DbError::Contract {
            sql: String::from("BEGIN IMMEDIATE TRANSACTION"),
            detail: "begin returned an unexpected outcome",
        })
    }

    /// Commits the open transaction.
    ///
    /// The slow-transaction check runs and the in-transaction flag clears
    /// whether or not the commit succeeded. A commit the engine refused can
    /// leave an engine-level transaction open; [`Self::rollback`] detects and
    /// releases it.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the commit statement cannot be prepared or
    /// does not run to completion.
    pub fn commit(&self) -> Result<(), DbError> {
        let result = self
            .prepare("COMMIT")
            .and_then(|mut query| query.expect_done());
        self.finish_transaction();
        result
    }

    /// Rolls back the open transaction, best effort.
    ///
    /// Safe to call from any cleanup path: a connection with no open
    /// transaction is a no-op. A rollback failure after a failed commit is a
    /// serious but non-fatal condition; it is logged at critical severity and
    /// the connection remains usable.
    pub fn rollback(&self) {
        if self.begin_at.get().is_none() && self.conn.is_autocommit() {
            return;
        }
        let result = self
            .prepare("ROLLBACK")
            .and_then(|mut query| query.expect_done());
        if result.is_err() {
            severity::emit(Severity::Critical, "ROLLBACK", "rollback failed");
        }
        self.finish_transaction();
    }

    /// Logs a slow transaction and returns the connection to idle.
    fn finish_transaction(&self) {
        let elapsed = self.txn_elapsed();
        if elapsed > SLOW_OPERATION {
            info!(
                db = %self.name,
                elapsed_secs = elapsed.as_secs_f64(),
                "slow transaction finished"
            );
        }
        self.begin_at.set(None);
    }
}
