// crates/cargohold-metadb/src/lib.rs
// ============================================================================
// Module: Cargohold Metadata DB
// Description: Transactional SQLite access layer for cluster node metadata.
// Purpose: Be the only path between node software and the metadata database.
// Dependencies: rusqlite, serde, thiserror, tracing
// ============================================================================

//! ## Overview
//! Every Cargohold node persists cluster, volume, and file metadata in an
//! embedded `SQLite` database; this crate is the only path through which the
//! rest of the node touches it. It reconciles durability under concurrent
//! writers, bounded latency against the single-writer lock, and slow-query /
//! slow-checkpoint observability without taxing the common path.
//!
//! The layer is schema-agnostic: callers supply SQL text with named
//! placeholders. One [`MetaDb`] per worker; connections are not `Sync` and
//! sharing one across threads requires an external mutex. The host process
//! installs the `tracing` subscriber once at startup; this crate only emits
//! structured events.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod db;
pub mod error;
pub mod options;
pub mod query;
pub mod severity;

mod checkpoint;
mod pmatch;
mod retry;
mod txn;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use db::MetaDb;
pub use error::DbError;
pub use options::DbOptions;
pub use options::JournalMode;
pub use options::SyncMode;
pub use query::Query;
pub use query::StepOutcome;
pub use severity::Severity;
