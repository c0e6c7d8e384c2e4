// crates/cargohold-metadb/src/retry.rs
// ============================================================================
// Module: Metadata DB Busy Retry
// Description: Bounded exponential backoff for write-lock acquisition.
// Purpose: Keep worst-case write-lock latency bounded and observable.
// Dependencies: tracing
// ============================================================================

//! ## Overview
//! Starting an immediate write transaction bypasses the engine's built-in
//! busy handler, so the wait is simulated here: a fixed ascending backoff
//! table, a saturating cursor, and a total budget read from the engine's own
//! busy-timeout setting. The loop warns once when it first spins ("possible
//! deadlock") and once more when it gives up ("probably deadlock"); it never
//! spins silently and never spins forever.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::thread;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::db::SLOW_OPERATION;
use crate::error::DbError;
use crate::query::Query;
use crate::query::StepOutcome;
use crate::query::busy_timeout_setting;

// ============================================================================
// SECTION: Backoff Table
// ============================================================================

/// Ascending backoff delays applied between busy retries.
pub(crate) const BUSY_BACKOFF: [Duration; 12] = [
    Duration::from_millis(1),
    Duration::from_millis(2),
    Duration::from_millis(5),
    Duration::from_millis(10),
    Duration::from_millis(15),
    Duration::from_millis(20),
    Duration::from_millis(25),
    Duration::from_millis(25),
    Duration::from_millis(25),
    Duration::from_millis(50),
    Duration::from_millis(50),
    Duration::from_millis(100),
];

/// Delay applied should the cursor ever land outside the table.
const SATURATED_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// SECTION: Retry Loop
// ============================================================================

impl Query<'_> {
    /// Steps the statement, retrying busy outcomes with bounded backoff.
    ///
    /// Used for `BEGIN IMMEDIATE`, which the engine's busy handler does not
    /// cover. The total wall time is bounded by the engine busy-timeout
    /// setting plus at most one backoff increment.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Busy`] when the lock stays held past the timeout,
    /// or any other [`DbError`] from stepping.
    pub(crate) fn step_busy_retry(&mut self) -> Result<StepOutcome, DbError> {
        let started = Instant::now();
        let mut cursor: usize = 0;
        let mut warned = false;
        let mut budget: Option<Duration> = None;
        loop {
            let outcome = self.step()?;
            if outcome != StepOutcome::Busy {
                if outcome == StepOutcome::Done {
                    let elapsed = started.elapsed();
                    if elapsed > SLOW_OPERATION {
                        info!(
                            db = %self.db().name,
                            elapsed_secs = elapsed.as_secs_f64(),
                            "slow write-lock acquisition completed"
                        );
                    } else {
                        debug!(elapsed_secs = elapsed.as_secs_f64(), "write lock acquired");
                    }
                }
                return Ok(outcome);
            }
            if !warned {
                warn!(sql = %self.sql(), "busy on write-lock acquisition, possible deadlock");
                warned = true;
            }
            let limit = *budget.get_or_insert_with(|| busy_timeout_setting(&self.db().conn));
            let elapsed = started.elapsed();
            if elapsed >= limit {
                warn!(
                    sql = %self.sql(),
                    waited_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    "still busy after the busy timeout, probably deadlock"
                );
                return Err(DbError::Busy {
                    sql: self.sql().to_owned(),
                });
            }
            let delay = BUSY_BACKOFF
                .get(cursor)
                .copied()
                .unwrap_or(SATURATED_DELAY)
                .min(limit - elapsed);
            if cursor + 1 < BUSY_BACKOFF.len() {
                cursor += 1;
            }
            thread::sleep(delay);
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::BUSY_BACKOFF;
    use super::SATURATED_DELAY;

    #[test]
    fn backoff_is_monotonically_non_decreasing() {
        assert!(BUSY_BACKOFF.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn saturation_delay_matches_last_entry() {
        assert_eq!(BUSY_BACKOFF.last().copied(), Some(SATURATED_DELAY));
    }
}
