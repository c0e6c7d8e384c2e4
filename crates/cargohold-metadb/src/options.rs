// crates/cargohold-metadb/src/options.rs
// ============================================================================
// Module: Metadata DB Options
// Description: Tunable settings consumed by the metadata access layer.
// Purpose: Provide a canonical, deserializable configuration model.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Configuration consumed by [`crate::MetaDb`]. Every field carries a default
//! so a node configuration file may omit the whole section. Checkpoint
//! thresholds are expressed in WAL frames; intervals and timeouts in
//! milliseconds.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde::Deserialize;

// ============================================================================
// SECTION: Defaults
// ============================================================================

/// Default engine busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 25_000;
/// Default WAL frame count above which a passive checkpoint runs.
const DEFAULT_MAX_PASSIVE_WAL_PAGES: u64 = 2_000;
/// Default WAL frame count above which a restart checkpoint runs.
const DEFAULT_MAX_RESTART_WAL_PAGES: u64 = 10_000;
/// Default quiet period before an idle checkpoint fires (ms).
const DEFAULT_IDLE_CHECKPOINT_INTERVAL_MS: u64 = 10_000;
/// Default upper bound on object path length accepted by the path predicate.
const DEFAULT_MAX_PATH_LENGTH: usize = 1_024;

// ============================================================================
// SECTION: Journal Modes
// ============================================================================

/// `SQLite` journal mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// WAL journal mode (required for checkpoint scheduling).
    #[default]
    Wal,
    /// Delete journal mode (legacy, no checkpoint scheduling).
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// `SQLite` sync mode configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Normal synchronous mode (balanced, safe under WAL).
    #[default]
    Normal,
    /// Full synchronous mode (safest).
    Full,
}

impl SyncMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Full => "full",
        }
    }
}

// ============================================================================
// SECTION: Options
// ============================================================================

/// Configuration for a metadata database connection.
///
/// # Invariants
/// - `max_restart_wal_pages` should not be below `max_passive_wal_pages`;
///   a lower value simply makes every scheduled checkpoint a restart.
#[derive(Debug, Clone, Deserialize)]
pub struct DbOptions {
    /// Engine busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// `SQLite` sync mode.
    #[serde(default)]
    pub sync_mode: SyncMode,
    /// WAL frame count that triggers a passive checkpoint.
    #[serde(default = "default_max_passive_wal_pages")]
    pub max_passive_wal_pages: u64,
    /// WAL frame count that escalates a scheduled checkpoint to restart mode.
    #[serde(default = "default_max_restart_wal_pages")]
    pub max_restart_wal_pages: u64,
    /// Quiet period after which an idle checkpoint may fire, in milliseconds.
    #[serde(default = "default_idle_checkpoint_interval_ms")]
    pub idle_checkpoint_interval_ms: u64,
    /// Maximum supported object path length for the path-match predicate.
    #[serde(default = "default_max_path_length")]
    pub max_path_length: usize,
}

impl DbOptions {
    /// Returns the busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Returns the idle checkpoint interval as a [`Duration`].
    #[must_use]
    pub const fn idle_checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.idle_checkpoint_interval_ms)
    }
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: JournalMode::default(),
            sync_mode: SyncMode::default(),
            max_passive_wal_pages: default_max_passive_wal_pages(),
            max_restart_wal_pages: default_max_restart_wal_pages(),
            idle_checkpoint_interval_ms: default_idle_checkpoint_interval_ms(),
            max_path_length: default_max_path_length(),
        }
    }
}

/// Returns the default busy timeout in milliseconds.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default passive checkpoint threshold.
const fn default_max_passive_wal_pages() -> u64 {
    DEFAULT_MAX_PASSIVE_WAL_PAGES
}

/// Returns the default restart checkpoint threshold.
const fn default_max_restart_wal_pages() -> u64 {
    DEFAULT_MAX_RESTART_WAL_PAGES
}

/// Returns the default idle checkpoint interval in milliseconds.
const fn default_idle_checkpoint_interval_ms() -> u64 {
    DEFAULT_IDLE_CHECKPOINT_INTERVAL_MS
}

/// Returns the default maximum path length.
const fn default_max_path_length() -> usize {
    DEFAULT_MAX_PATH_LENGTH
}
