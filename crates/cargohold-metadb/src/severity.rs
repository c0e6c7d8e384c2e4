// crates/cargohold-metadb/src/severity.rs
// ============================================================================
// Module: Metadata DB Log Severity
// Description: Engine result-code severity mapping and log emission.
// Purpose: Keep one canonical mapping from engine failures to leveled logs.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! The storage service logs at six operational levels. `tracing` exposes five,
//! so every event carries an explicit `severity` field and folds `notice` into
//! info-level and `alert` into error-level emission. Successful result codes
//! and constraint violations are suppressed entirely; a constraint violation
//! is an expected outcome many callers rely on.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::ErrorCode;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

// ============================================================================
// SECTION: Severity Levels
// ============================================================================

/// Operational severity attached to every engine log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Diagnostic detail, schema reload chatter.
    Debug,
    /// Expected contention, lock back-pressure.
    Info,
    /// Engine notices.
    Notice,
    /// Possibly transient errors, or errors the operator cannot fix.
    Warning,
    /// Faults that likely leave the connection unusable.
    Critical,
    /// Errors requiring immediate operator attention.
    Alert,
}

impl Severity {
    /// Returns the canonical lowercase label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Notice => "notice",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Alert => "alert",
        }
    }

    /// Maps an engine result code to a severity, or `None` when the code is
    /// an expected outcome that must not be logged as an error.
    #[must_use]
    pub const fn for_code(code: ErrorCode) -> Option<Self> {
        match code {
            ErrorCode::ConstraintViolation => None,
            ErrorCode::SchemaChanged => Some(Self::Debug),
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => Some(Self::Info),
            ErrorCode::SystemIoFailure | ErrorCode::CannotOpen | ErrorCode::NotADatabase => {
                Some(Self::Critical)
            }
            ErrorCode::DatabaseCorrupt | ErrorCode::DiskFull => Some(Self::Alert),
            _ => Some(Self::Warning),
        }
    }
}

// ============================================================================
// SECTION: Emission
// ============================================================================

/// Emits one leveled event for a layer-originated condition.
pub(crate) fn emit(severity: Severity, sql: &str, message: &str) {
    match severity {
        Severity::Debug => debug!(severity = severity.label(), sql, "{message}"),
        Severity::Info | Severity::Notice => info!(severity = severity.label(), sql, "{message}"),
        Severity::Warning => warn!(severity = severity.label(), sql, "{message}"),
        Severity::Critical | Severity::Alert => {
            error!(severity = severity.label(), sql, "{message}");
        }
    }
}

/// Logs an engine failure through the severity mapping.
///
/// Constraint violations map to no severity and are suppressed here; the
/// caller still receives the classified outcome.
pub(crate) fn log_engine_failure(error: &rusqlite::Error, sql: &str) {
    let (severity, message) = match error {
        rusqlite::Error::SqliteFailure(cause, detail) => {
            let Some(severity) = Severity::for_code(cause.code) else {
                return;
            };
            let message = match detail {
                Some(text) => text.clone(),
                None => cause.to_string(),
            };
            (severity, message)
        }
        other => (Severity::Warning, other.to_string()),
    };
    emit(severity, sql, &message);
}

// ============================================================================
// SECTION: Tests
// ============================================================================
