// crates/cargohold-metadb/src/error.rs
// ============================================================================
// Module: Metadata DB Errors
// Description: Error taxonomy for the metadata access layer.
// Purpose: Classify engine failures once at the point of occurrence.
// Dependencies: rusqlite, thiserror, std
// ============================================================================

//! ## Overview
//! Every engine-level failure is classified exactly once where it occurs and
//! returned as a tagged [`DbError`] value. Constraint violations are expected
//! outcomes, never logged as errors. Busy results are surfaced so writer
//! back-pressure stays observable. Error messages carry SQL text but never
//! bound parameter values, which may contain secrets such as auth keys.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Metadata access layer errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
/// - No variant ever embeds a bound parameter value.
#[derive(Debug, Error)]
pub enum DbError {
    /// The write lock stayed held past the configured busy timeout.
    #[error("database busy: {sql}")]
    Busy {
        /// SQL text of the statement that stayed busy.
        sql: String,
    },
    /// A unique or foreign-key constraint rejected the statement.
    #[error("constraint violated: {sql}")]
    Constraint {
        /// SQL text of the rejected statement.
        sql: String,
    },
    /// A named placeholder could not be resolved or bound.
    #[error("cannot bind parameter {param} in query: {sql}")]
    BindParameter {
        /// Name of the offending placeholder.
        param: String,
        /// SQL text of the statement.
        sql: String,
    },
    /// A query returned a row count its caller ruled out.
    #[error("query contract violated, {detail}: {sql}")]
    Contract {
        /// SQL text of the statement.
        sql: String,
        /// What the statement did that the caller ruled out.
        detail: &'static str,
    },
    /// Any other engine-level failure.
    #[error("sqlite engine error: {source}")]
    Engine {
        /// Underlying engine error.
        #[from]
        source: rusqlite::Error,
    },
    /// WAL file inspection failed at the filesystem level.
    #[error("wal inspection failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
