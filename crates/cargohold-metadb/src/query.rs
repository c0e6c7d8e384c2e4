// crates/cargohold-metadb/src/query.rs
// ============================================================================
// Module: Metadata DB Statement Executor
// Description: Prepared statement wrapper with typed binding and stepping.
// Purpose: Classify every execution outcome once and keep slow queries visible.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`Query`] wraps one prepared statement owned by one connection. Binding
//! resolves named placeholders only; a missing name is a programmer defect
//! surfaced immediately. Stepping classifies the engine result into
//! [`StepOutcome`] and the statement is reset before every return, so a query
//! can always be rebound and re-stepped. Row-producing scans go through the
//! fetch helpers or [`Query::for_each_row`].
//!
//! Execution is timed: completions above the slow threshold log at info with
//! the SQL text, everything else leaves a debug trace. Bound values are never
//! logged; they may carry secrets such as auth keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::thread;
use std::time::Duration;
use std::time::Instant;

use rusqlite::Connection;
use rusqlite::Row;
use rusqlite::Statement;
use rusqlite::ToSql;
use tracing::debug;
use tracing::info;

use crate::db::MetaDb;
use crate::db::SLOW_OPERATION;
use crate::error::DbError;
use crate::severity;
use crate::severity::Severity;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Attempts made to prepare a statement while the schema lock is contended.
const PREPARE_ATTEMPTS: u32 = 30;
/// Pause between contended prepare attempts.
const PREPARE_RETRY_DELAY: Duration = Duration::from_millis(100);

// ============================================================================
// SECTION: Step Outcomes
// ============================================================================

/// Classified result of stepping a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The statement produced a row.
    Row,
    /// The statement ran to completion without producing a row.
    Done,
    /// The required lock is currently held elsewhere.
    Busy,
    /// A unique or foreign-key constraint rejected the statement.
    Constraint,
}

impl StepOutcome {
    /// Returns the canonical lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Row => "row",
            Self::Done => "done",
            Self::Busy => "busy",
            Self::Constraint => "constraint",
        }
    }
}

// ============================================================================
// SECTION: Preparation
// ============================================================================

impl MetaDb {
    /// Prepares `sql` into a [`Query`].
    ///
    /// Preparation retries through transient schema-lock contention. When
    /// debug diagnostics are enabled the query plan is captured and logged as
    /// a side channel that never affects results.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when the statement cannot be prepared.
    pub fn prepare(&self, sql: &str) -> Result<Query<'_>, DbError> {
        let stmt = self.prepare_retry(sql)?;
        if tracing::enabled!(tracing::Level::DEBUG) {
            self.log_query_plan(sql);
        }
        Ok(Query {
            db: self,
            stmt,
            sql: sql.to_owned(),
        })
    }

    /// Prepares a statement, waiting out transient busy results.
    fn prepare_retry(&self, sql: &str) -> Result<Statement<'_>, DbError> {
        let mut attempt: u32 = 0;
        loop {
            match self.conn.prepare(sql) {
                Ok(stmt) => return Ok(stmt),
                Err(error) => {
                    let busy = matches!(busy_or_constraint(&error), Some(StepOutcome::Busy));
                    if busy && attempt + 1 < PREPARE_ATTEMPTS {
                        attempt += 1;
                        debug!(sql, attempt, total = PREPARE_ATTEMPTS, "waiting to prepare query");
                        thread::sleep(PREPARE_RETRY_DELAY);
                        continue;
                    }
                    severity::emit(
                        Severity::Critical,
                        sql,
                        &format!("cannot prepare query: {error}"),
                    );
                    return Err(if busy {
                        DbError::Busy { sql: sql.to_owned() }
                    } else {
                        DbError::Engine { source: error }
                    });
                }
            }
        }
    }

    /// Logs the query plan for `sql`, prefixed with the database base name.
    fn log_query_plan(&self, sql: &str) {
        let explain = format!("EXPLAIN QUERY PLAN {sql}");
        let Ok(mut stmt) = self.conn.prepare(&explain) else {
            return;
        };
        let mut plan = String::new();
        let mut rows = stmt.raw_query();
        while let Ok(Some(row)) = rows.next() {
            let id = row.get::<_, i64>(0).unwrap_or_default();
            let parent = row.get::<_, i64>(1).unwrap_or_default();
            let aux = row.get::<_, i64>(2).unwrap_or_default();
            let detail = row.get::<_, String>(3).unwrap_or_default();
            plan.push_str(&format!("\n\t{id}|{parent}|{aux}|{detail}"));
        }
        debug!(db = %self.name, "{explain}{plan}");
    }
}

// ============================================================================
// SECTION: Query
// ============================================================================

/// A prepared statement bound to one connection.
///
/// # Invariants
/// - The statement is reset before every method returns, so rebinding is
///   always safe.
pub struct Query<'db> {
    /// Owning connection.
    db: &'db MetaDb,
    /// Compiled statement.
    stmt: Statement<'db>,
    /// Original SQL text, kept for diagnostics.
    sql: String,
}

impl<'db> Query<'db> {
    /// Returns the owning connection.
    pub(crate) fn db(&self) -> &'db MetaDb {
        self.db
    }

    /// Returns the SQL text of this statement.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    // ------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------

    /// Binds an integer to the named placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BindParameter`] when the placeholder is missing or
    /// the engine rejects the bind.
    pub fn bind_int(&mut self, name: &str, value: i32) -> Result<(), DbError> {
        self.bind_value(name, value)
    }

    /// Binds a 64-bit integer to the named placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BindParameter`] when the placeholder is missing or
    /// the engine rejects the bind.
    pub fn bind_int64(&mut self, name: &str, value: i64) -> Result<(), DbError> {
        self.bind_value(name, value)
    }

    /// Binds text to the named placeholder. The engine copies the value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BindParameter`] when the placeholder is missing or
    /// the engine rejects the bind.
    pub fn bind_text(&mut self, name: &str, value: &str) -> Result<(), DbError> {
        self.bind_value(name, value.to_owned())
    }

    /// Binds a blob to the named placeholder. The engine copies the value.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BindParameter`] when the placeholder is missing or
    /// the engine rejects the bind.
    pub fn bind_blob(&mut self, name: &str, value: &[u8]) -> Result<(), DbError> {
        self.bind_value(name, value.to_vec())
    }

    /// Binds NULL to the named placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::BindParameter`] when the placeholder is missing or
    /// the engine rejects the bind.
    pub fn bind_null(&mut self, name: &str) -> Result<(), DbError> {
        self.bind_value(name, rusqlite::types::Null)
    }

    /// Resolves the placeholder and binds one value.
    ///
    /// The value is never logged on failure.
    fn bind_value<T: ToSql>(&mut self, name: &str, value: T) -> Result<(), DbError> {
        let position = match self.stmt.parameter_index(name) {
            Ok(Some(position)) => position,
            Ok(None) | Err(_) => return Err(self.bind_defect(name)),
        };
        match self.stmt.raw_bind_parameter(position, value) {
            Ok(()) => Ok(()),
            Err(_) => Err(self.bind_defect(name)),
        }
    }

    /// Logs and builds the binding-defect error for `name`.
    fn bind_defect(&self, name: &str) -> DbError {
        severity::emit(
            Severity::Critical,
            &self.sql,
            &format!("cannot bind parameter {name}"),
        );
        DbError::BindParameter {
            param: name.to_owned(),
            sql: self.sql.clone(),
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Steps the statement once and classifies the result.
    ///
    /// The statement is reset before returning, so a `Row` outcome reports
    /// that the statement produces rows; scans that need the row values use
    /// [`Self::fetch_row`], [`Self::fetch_optional`] or
    /// [`Self::for_each_row`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Engine`] for failures other than contention and
    /// constraint rejection, which are reported as outcomes.
    pub fn step(&mut self) -> Result<StepOutcome, DbError> {
        let started = Instant::now();
        let outcome = {
            let mut rows = self.stmt.raw_query();
            match rows.next() {
                Ok(Some(_)) => Ok(StepOutcome::Row),
                Ok(None) => Ok(StepOutcome::Done),
                Err(error) => {
                    severity::log_engine_failure(&error, &self.sql);
                    match busy_or_constraint(&error) {
                        Some(outcome) => Ok(outcome),
                        None => Err(DbError::Engine { source: error }),
                    }
                }
            }
        };
        if matches!(outcome, Ok(StepOutcome::Row | StepOutcome::Done)) {
            self.observe_elapsed(started);
        }
        if matches!(outcome, Ok(StepOutcome::Done)) {
            self.db.checkpoint_if_needed();
        }
        outcome
    }

    /// Steps the statement and requires the outcome to equal `wanted`.
    ///
    /// # Errors
    ///
    /// A `Row`/`Done` mismatch is a [`DbError::Contract`] violation; a busy
    /// or constraint outcome propagates as its own error class so callers
    /// keep the taxonomy.
    pub fn step_expect(&mut self, wanted: StepOutcome) -> Result<(), DbError> {
        let outcome = self.step()?;
        if outcome == wanted {
            return Ok(());
        }
        match outcome {
            StepOutcome::Done => Err(self.contract_violation("query unexpectedly returned no results")),
            StepOutcome::Row => Err(self.contract_violation("query unexpectedly returned results")),
            StepOutcome::Busy => Err(DbError::Busy { sql: self.sql.clone() }),
            StepOutcome::Constraint => Err(DbError::Constraint { sql: self.sql.clone() }),
        }
    }

    /// Steps a statement that must complete without producing rows.
    ///
    /// # Errors
    ///
    /// See [`Self::step_expect`].
    pub fn expect_done(&mut self) -> Result<(), DbError> {
        self.step_expect(StepOutcome::Done)
    }

    /// Fetches the single row this statement must produce.
    ///
    /// # Errors
    ///
    /// An empty result is a [`DbError::Contract`] violation; row mapping and
    /// engine failures surface as [`DbError::Engine`].
    pub fn fetch_row<T>(
        &mut self,
        map: impl FnOnce(&Row<'_>) -> Result<T, rusqlite::Error>,
    ) -> Result<T, DbError> {
        match self.fetch_optional(map)? {
            Some(value) => Ok(value),
            None => Err(self.contract_violation("query unexpectedly returned no results")),
        }
    }

    /// Fetches the first row, or `None` when the statement produces none.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] for contention, constraint rejection, or engine
    /// failures.
    pub fn fetch_optional<T>(
        &mut self,
        map: impl FnOnce(&Row<'_>) -> Result<T, rusqlite::Error>,
    ) -> Result<Option<T>, DbError> {
        let started = Instant::now();
        let fetched = {
            let mut rows = self.stmt.raw_query();
            match rows.next() {
                Ok(Some(row)) => map(row).map(Some).map_err(|error| DbError::Engine { source: error }),
                Ok(None) => Ok(None),
                Err(error) => Err(classify_failure(error, &self.sql)),
            }
        };
        if fetched.is_ok() {
            self.observe_elapsed(started);
        }
        fetched
    }

    /// Runs the statement to completion, visiting every row.
    ///
    /// The whole scan is timed as one execution.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] when stepping fails or `visit` rejects a row.
    pub fn for_each_row(
        &mut self,
        mut visit: impl FnMut(&Row<'_>) -> Result<(), rusqlite::Error>,
    ) -> Result<(), DbError> {
        let started = Instant::now();
        let result = {
            let mut rows = self.stmt.raw_query();
            loop {
                match rows.next() {
                    Ok(Some(row)) => {
                        if let Err(error) = visit(row) {
                            break Err(DbError::Engine { source: error });
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(error) => break Err(classify_failure(error, &self.sql)),
                }
            }
        };
        if result.is_ok() {
            self.observe_elapsed(started);
            self.db.checkpoint_if_needed();
        }
        result
    }

    // ------------------------------------------------------------------
    // Instrumentation
    // ------------------------------------------------------------------

    /// Logs the elapsed time of a successful execution.
    fn observe_elapsed(&self, started: Instant) {
        let elapsed = started.elapsed();
        if elapsed > SLOW_OPERATION {
            info!(
                sql = %self.sql,
                elapsed_secs = elapsed.as_secs_f64(),
                "slow query completed"
            );
        } else {
            debug!(
                sql = %self.sql,
                elapsed_secs = elapsed.as_secs_f64(),
                "query step completed"
            );
        }
    }

    /// Logs and builds a query-contract violation.
    fn contract_violation(&self, detail: &'static str) -> DbError {
        severity::emit(Severity::Critical, &self.sql, detail);
        DbError::Contract {
            sql: self.sql.clone(),
            detail,
        }
    }
}

// ============================================================================
// SECTION: Classification Helpers
// ============================================================================

/// Returns the contention or constraint outcome encoded in an engine error.
pub(crate) fn busy_or_constraint(error: &rusqlite::Error) -> Option<StepOutcome> {
    match error {
        rusqlite::Error::SqliteFailure(cause, _) => match cause.code {
            rusqlite::ErrorCode::DatabaseBusy => Some(StepOutcome::Busy),
            rusqlite::ErrorCode::ConstraintViolation => Some(StepOutcome::Constraint),
            _ => None,
        },
        _ => None,
    }
}

/// Logs an engine failure and converts it to the matching [`DbError`].
fn classify_failure(error: rusqlite::Error, sql: &str) -> DbError {
    severity::log_engine_failure(&error, sql);
    match busy_or_constraint(&error) {
        Some(StepOutcome::Busy) => DbError::Busy { sql: sql.to_owned() },
        Some(StepOutcome::Constraint) => DbError::Constraint { sql: sql.to_owned() },
        _ => DbError::Engine { source: error },
    }
}

/// Reads the engine's busy-timeout setting from a connection.
///
/// Falls back to 25 seconds when the pragma read fails.
pub(crate) fn busy_timeout_setting(conn: &Connection) -> Duration {
    /// Fallback when the pragma read fails.
    const FALLBACK: Duration = Duration::from_millis(25_000);
    conn.pragma_query_value(None, "busy_timeout", |row| row.get::<_, i64>(0))
        .ok()
        .filter(|value| *value > 0)
        .and_then(|value| u64::try_from(value).ok())
        .map_or(FALLBACK, Duration::from_millis)
}
