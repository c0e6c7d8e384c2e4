// crates/cargohold-metadb/src/checkpoint.rs
// ============================================================================
// Module: Metadata DB Checkpoint Scheduler
// Description: WAL-growth and idle-triggered checkpoint policy.
// Purpose: Reclaim WAL space without blocking the write path.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! The engine's own autocheckpoint is disabled at open; this scheduler
//! decides when the log is reclaimed. Two triggers: (1) after a commit the
//! WAL frame count is measured and a checkpoint runs once it crosses the
//! passive threshold, escalating to restart mode past the restart threshold;
//! (2) a periodic idle tick runs a passive checkpoint when commits happened
//! since the last tick and the connection has been quiet for the idle
//! interval, reclaiming space during lulls instead of waiting for growth.
//!
//! The tracked frame count resets to zero after every run regardless of how
//! much the engine reclaimed; a partial checkpoint must not re-trigger on the
//! very next commit. A busy or locked checkpoint is expected under concurrent
//! write load and logs at warning only.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::db::MetaDb;
use crate::db::SLOW_OPERATION;
use crate::error::DbError;
use crate::severity;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Size of the WAL file header in bytes.
const WAL_HEADER_BYTES: u64 = 32;
/// Size of each WAL frame header in bytes.
const WAL_FRAME_HEADER_BYTES: u64 = 24;

// ============================================================================
// SECTION: Checkpoint Modes
// ============================================================================

/// How a checkpoint run interacts with concurrent readers and writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CheckpointMode {
    /// Non-blocking, best effort; may leave work undone.
    Passive,
    /// Blocks new writers until the log can restart.
    Restart,
}

impl CheckpointMode {
    /// Returns the pragma statement for this mode.
    const fn pragma_sql(self) -> &'static str {
        match self {
            Self::Passive => "PRAGMA wal_checkpoint(PASSIVE)",
            Self::Restart => "PRAGMA wal_checkpoint(RESTART)",
        }
    }

    /// Returns the canonical lowercase label.
    const fn label(self) -> &'static str {
        match self {
            Self::Passive => "passive",
            Self::Restart => "restart",
        }
    }
}

// ============================================================================
// SECTION: Scheduler
// ============================================================================

impl MetaDb {
    /// Folds new commits into the WAL measurement and checkpoints on growth.
    ///
    /// Called after completed statements; cheap when nothing was committed
    /// since the previous call.
    pub(crate) fn checkpoint_if_needed(&self) {
        let commits = self.commits.load(Ordering::Relaxed);
        if commits == self.wal.seen_commits.get() {
            return;
        }
        self.wal.seen_commits.set(commits);
        let frames = match self.wal_frame_count() {
            Ok(frames) => frames,
            Err(error) => {
                debug!(db = %self.name, error = %error, "wal inspection failed");
                return;
            }
        };
        if self.wal.frames.get() == 0 && frames > 0 {
            // Idle time counts from the first commit after a checkpoint;
            // otherwise a long-quiet connection would checkpoint immediately
            // after its next commit.
            self.wal.last_activity.set(Instant::now());
        }
        self.wal.frames.set(frames);
        if frames >= self.options.max_passive_wal_pages {
            self.checkpoint();
        }
    }

    /// Runs a checkpoint now, restart-mode once the WAL has grown past the
    /// restart threshold and passive otherwise.
    pub fn checkpoint(&self) {
        if self.wal.frames.get() >= self.options.max_restart_wal_pages {
            self.checkpoint_run(CheckpointMode::Restart);
        } else {
            self.checkpoint_run(CheckpointMode::Passive);
        }
    }

    /// Periodic idle tick; reclaims WAL space during quiet periods.
    ///
    /// Fires only when commits happened since the previous tick and the idle
    /// interval elapsed since the last checkpoint activity. Returns whether a
    /// checkpoint ran.
    pub fn checkpoint_idle(&self) -> bool {
        let commits = self.commits.load(Ordering::Relaxed);
        if commits == self.wal.idle_commits.get() {
            return false;
        }
        if self.wal.last_activity.get().elapsed() < self.options.idle_checkpoint_interval() {
            return false;
        }
        self.checkpoint_run(CheckpointMode::Passive);
        self.wal.last_activity.set(Instant::now());
        self.wal.idle_commits.set(commits);
        true
    }

    /// WAL frames tracked since the last checkpoint run.
    #[must_use]
    pub fn wal_pages(&self) -> u64 {
        self.wal.frames.get()
    }

    /// Checkpoint runs completed on this connection.
    #[must_use]
    pub fn checkpoint_runs(&self) -> u64 {
        self.checkpoints.get()
    }

    /// Rebuilds the database file, reclaiming free pages.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the vacuum cannot be prepared or completed.
    pub fn vacuum(&self) -> Result<(), DbError> {
        self.prepare("VACUUM")?.expect_done()
    }

    /// Executes one checkpoint and records the outcome.
    fn checkpoint_run(&self, mode: CheckpointMode) {
        let started = Instant::now();
        let result = self.conn.query_row(mode.pragma_sql(), [], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, row.get::<_, i64>(2)?))
        });
        let elapsed = started.elapsed();
        match result {
            Ok((blocked, log_frames, reclaimed)) => {
                if blocked != 0 {
                    warn!(
                        db = %self.name,
                        mode = mode.label(),
                        "checkpoint blocked by concurrent activity"
                    );
                } else if reclaimed > 0 {
                    debug!(
                        db = %self.name,
                        mode = mode.label(),
                        log_frames,
                        reclaimed,
                        elapsed_secs = elapsed.as_secs_f64(),
                        "wal checkpoint completed"
                    );
                }
            }
            Err(error) => {
                if is_contention(&error) {
                    warn!(db = %self.name, mode = mode.label(), "checkpoint busy");
                } else {
                    severity::log_engine_failure(&error, mode.pragma_sql());
                }
            }
        }
        if elapsed > SLOW_OPERATION {
            info!(
                db = %self.name,
                mode = mode.label(),
                elapsed_secs = elapsed.as_secs_f64(),
                "slow wal checkpoint completed"
            );
        }
        self.wal.frames.set(0);
        self.checkpoints.set(self.checkpoints.get() + 1);
    }

    /// Measures the WAL frame count from the log file size.
    fn wal_frame_count(&self) -> Result<u64, DbError> {
        let mut raw = self.path.clone().into_os_string();
        raw.push("-wal");
        let wal_path = PathBuf::from(raw);
        match std::fs::metadata(&wal_path) {
            Ok(meta) => {
                let len = meta.len();
                if len <= WAL_HEADER_BYTES {
                    Ok(0)
                } else {
                    Ok((len - WAL_HEADER_BYTES) / (self.page_size + WAL_FRAME_HEADER_BYTES))
                }
            }
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(error) => Err(DbError::Io { source: error }),
        }
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns whether an engine error is busy/locked contention.
fn is_contention(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(cause, _) if matches!(
            cause.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        )
    )
}
