// crates/cargohold-metadb/src/db.rs
// ============================================================================
// Module: Metadata DB Connection
// Description: Connection lifecycle for the node metadata database.
// Purpose: Own the engine handle plus checkpoint and transaction state.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`MetaDb`] owns exactly one engine connection per database file together
//! with the scheduling state derived from it: the commit counter fed by the
//! engine's commit notification, the WAL frame count observed since the last
//! checkpoint, and the begin timestamp of an open transaction. Opening
//! registers the commit notification and the `path_match` predicate and
//! records the checkpoint idle-baseline.
//!
//! `MetaDb` is not `Sync`; callers use one connection per worker or guard a
//! shared one with an external mutex. Statement handles borrow the
//! connection, so a connection cannot be closed while a prepared statement is
//! alive; the finalize-walk of the original engine API is unreachable here by
//! construction.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::cell::Cell;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;
use rusqlite::OpenFlags;
use tracing::debug;
use tracing::warn;

use crate::error::DbError;
use crate::options::DbOptions;
use crate::pmatch;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Elapsed time above which a query, transaction, or checkpoint is slow.
pub(crate) const SLOW_OPERATION: Duration = Duration::from_secs(5);
/// Page size assumed when the pragma read reports a nonsensical value.
const DEFAULT_PAGE_SIZE: u64 = 4_096;

// ============================================================================
// SECTION: Scheduler State
// ============================================================================

/// WAL bookkeeping owned by a connection.
pub(crate) struct WalTracker {
    /// WAL frames observed since the last checkpoint run.
    pub(crate) frames: Cell<u64>,
    /// Commit count already folded into the frame measurement.
    pub(crate) seen_commits: Cell<u64>,
    /// Commit count at the last idle-checkpoint evaluation.
    pub(crate) idle_commits: Cell<u64>,
    /// Last checkpoint activity: open, first write after a checkpoint, or an
    /// idle checkpoint run.
    pub(crate) last_activity: Cell<Instant>,
}

// ============================================================================
// SECTION: Connection
// ============================================================================

/// A metadata database connection.
///
/// # Invariants
/// - Owns exactly one engine connection for one database file.
/// - At most one transaction is open at a time (engine single-writer model).
pub struct MetaDb {
    /// Underlying engine connection.
    pub(crate) conn: Connection,
    /// Database file path.
    pub(crate) path: PathBuf,
    /// Database file base name used as a log prefix.
    pub(crate) name: String,
    /// Layer configuration.
    pub(crate) options: DbOptions,
    /// Database page size, read once at open.
    pub(crate) page_size: u64,
    /// Commits observed by the engine notification callback.
    pub(crate) commits: Arc<AtomicU64>,
    /// WAL checkpoint scheduling state.
    pub(crate) wal: WalTracker,
    /// Begin timestamp of the open transaction, if any.
    pub(crate) begin_at: Cell<Option<Instant>>,
    /// Checkpoint runs completed on this connection.
    pub(crate) checkpoints: Cell<u64>,
}

impl MetaDb {
    /// Opens the metadata database at `path`.
    ///
    /// Applies the durability pragmas, disables the engine's own WAL
    /// autocheckpoint (the scheduler owns checkpointing), registers the
    /// commit notification and the `path_match` predicate, and records the
    /// idle-baseline.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the database cannot be opened or configured.
    pub fn open(path: impl AsRef<Path>, options: DbOptions) -> Result<Self, DbError> {
        let path = path.as_ref().to_path_buf();
        let name = path
            .file_name()
            .map_or_else(|| String::from("main"), |n| n.to_string_lossy().into_owned());
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        let conn = Connection::open_with_flags(&path, flags)?;
        apply_pragmas(&conn, &options)?;
        let page_size = read_page_size(&conn);

        let commits = Arc::new(AtomicU64::new(0));
        let notify = Arc::clone(&commits);
        conn.commit_hook(Some(move || {
            notify.fetch_add(1, Ordering::Relaxed);
            false
        }))?;
        pmatch::register(&conn, options.max_path_length)?;

        let journal_mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap_or_else(|_| String::from("unknown"));
        debug!(db = %name, journal_mode = %journal_mode, "metadata database opened");

        Ok(Self {
            conn,
            path,
            name,
            options,
            page_size,
            commits,
            wal: WalTracker {
                frames: Cell::new(0),
                seen_commits: Cell::new(0),
                idle_commits: Cell::new(0),
                last_activity: Cell::new(Instant::now()),
            },
            begin_at: Cell::new(None),
            checkpoints: Cell::new(0),
        })
    }

    /// Closes the connection.
    ///
    /// A refused close is logged with the database file name, the prepared
    /// statement cache is flushed, and the close is retried once; the handle
    /// is consumed on every path so no further use is possible.
    pub fn close(self) {
        let Self { conn, name, .. } = self;
        if let Err((conn, error)) = conn.close() {
            debug!(db = %name, error = %error, "close refused, flushing statement cache");
            conn.flush_prepared_statement_cache();
            if let Err((_, error)) = conn.close() {
                warn!(db = %name, error = %error, "cannot close database");
            }
        }
    }

    /// Returns the database file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

// ============================================================================
// SECTION: Open Helpers
// ============================================================================

/// Applies the pragmas the layer depends on.
///
/// `wal_autocheckpoint` is disabled and `journal_size_limit` is zeroed so the
/// scheduler alone decides when the log is reclaimed and the on-disk WAL size
/// tracks the live frame count after each reclaim.
fn apply_pragmas(conn: &Connection, options: &DbOptions) -> Result<(), DbError> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.execute_batch(&format!(
        "PRAGMA journal_mode = {};",
        options.journal_mode.pragma_value()
    ))?;
    conn.execute_batch(&format!("PRAGMA synchronous = {};", options.sync_mode.pragma_value()))?;
    conn.execute_batch("PRAGMA wal_autocheckpoint = 0; PRAGMA journal_size_limit = 0;")?;
    conn.busy_timeout(options.busy_timeout())?;
    Ok(())
}

/// Reads the database page size, falling back to the engine default.
fn read_page_size(conn: &Connection) -> u64 {
    conn.pragma_query_value(None, "page_size", |row| row.get::<_, i64>(0))
        .ok()
        .and_then(|value| u64::try_from(value).ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_PAGE_SIZE)
}
