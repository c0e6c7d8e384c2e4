// crates/cargohold-metadb/tests/pmatch_tests.rs
// ============================================================================
// Module: Path-Match Predicate Tests
// Description: Validate hierarchical glob matching through SQL.
// Purpose: Pin every fallback branch and the never-error property.
// Dependencies: cargohold-metadb, proptest, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the `path_match` scalar function as listing queries
//! see it: branch codes for every depth/fallback combination, NULL on
//! malformed arguments, and a property check that arbitrary inputs never
//! abort a query.

#![allow(
    clippy::panic,
    clippy::print_stdout,
    clippy::print_stderr,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::use_debug,
    clippy::dbg_macro,
    clippy::panic_in_result_fn,
    clippy::unwrap_in_result,
    reason = "Test-only assertions and helpers are permitted."
)]

// ============================================================================
// SECTION: Imports
// ============================================================================

use cargohold_metadb::DbOptions;
use cargohold_metadb::MetaDb;
use proptest::prelude::proptest;
use proptest::prop_assert;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_db(temp: &TempDir) -> MetaDb {
    MetaDb::open(temp.path().join("meta.db"), DbOptions::default()).expect("open")
}

fn pmatch(db: &MetaDb, path: &str, pattern: &str, slashes: i64, wildcard: i64) -> Option<i64> {
    let mut query = db
        .prepare("SELECT path_match(:path, :pattern, :slashes, :wildcard)")
        .unwrap();
    query.bind_text(":path", path).unwrap();
    query.bind_text(":pattern", pattern).unwrap();
    query.bind_int64(":slashes", slashes).unwrap();
    query.bind_int64(":wildcard", wildcard).unwrap();
    query.fetch_row(|row| row.get::<_, Option<i64>>(0)).unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn listing_vectors_from_the_storage_protocol() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);

    // Deeper path truncates at the boundary, then globs the prefix.
    assert_eq!(pmatch(&db, "a/b/c.txt", "a/b*", 1, 0), Some(4));
    assert_eq!(pmatch(&db, "a/b/c.txt", "a/*", 1, 0), Some(4));
    // Sibling directories never match.
    assert_eq!(pmatch(&db, "dir1/file", "dir2/*", 1, 0), Some(0));
    // Fewer slashes than the pattern can never match.
    assert_eq!(pmatch(&db, "onlyfile", "a/b", 1, 0), Some(0));
    assert_eq!(pmatch(&db, "onlyfile", "a/b", 1, 1), Some(0));
}

#[test]
fn equal_depth_branch_codes() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);

    assert_eq!(pmatch(&db, "a/b", "a/b", 1, 0), Some(1));
    assert_eq!(pmatch(&db, "a/bcd", "a/b*", 1, 0), Some(1));
    // Glob fails on the literal bracket, the trailing-wildcard prefix
    // fallback applies.
    assert_eq!(pmatch(&db, "a/[b]", "a/[b]*", 1, 1), Some(2));
    // Same glob failure, exact-equality fallback with the flag off.
    assert_eq!(pmatch(&db, "a/[b]", "a/[b]", 1, 0), Some(3));
    // The exact fallback is skipped when the flag is set.
    assert_eq!(pmatch(&db, "a/[b]", "a/[b]", 1, 1), Some(0));
}

#[test]
fn deeper_branch_codes() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);

    assert_eq!(pmatch(&db, "a/[b]x/c", "a/[b]x*", 1, 1), Some(5));
    assert_eq!(pmatch(&db, "a/[b]/c", "a/[b]", 1, 0), Some(6));
    // The exact fallback requires the boundary to equal the pattern length.
    assert_eq!(pmatch(&db, "a/[bb]/c", "a/[b]", 1, 0), Some(0));
}

#[test]
fn malformed_arguments_yield_null() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);

    let mut query = db
        .prepare("SELECT path_match(:path, :pattern, :slashes, :wildcard)")
        .unwrap();
    query.bind_null(":path").unwrap();
    query.bind_text(":pattern", "a/*").unwrap();
    query.bind_int64(":slashes", 1).unwrap();
    query.bind_int64(":wildcard", 0).unwrap();
    assert_eq!(query.fetch_row(|row| row.get::<_, Option<i64>>(0)).unwrap(), None);

    query.bind_text(":path", "a/b").unwrap();
    query.bind_int64(":pattern", 7).unwrap();
    assert_eq!(query.fetch_row(|row| row.get::<_, Option<i64>>(0)).unwrap(), None);
}

#[test]
fn negative_slash_count_yields_null() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    assert_eq!(pmatch(&db, "a/b", "a/b", -1, 0), None);
}

#[test]
fn overlong_truncation_yields_null() {
    let temp = TempDir::new().unwrap();
    let options = DbOptions {
        max_path_length: 8,
        ..DbOptions::default()
    };
    let db = MetaDb::open(temp.path().join("meta.db"), options).expect("open");

    let mut query = db
        .prepare("SELECT path_match(:path, :pattern, :slashes, :wildcard)")
        .unwrap();
    query.bind_text(":path", "aaaaaaaaaaaa/b/c").unwrap();
    query.bind_text(":pattern", "a*/b").unwrap();
    query.bind_int64(":slashes", 1).unwrap();
    query.bind_int64(":wildcard", 0).unwrap();
    assert_eq!(query.fetch_row(|row| row.get::<_, Option<i64>>(0)).unwrap(), None);
}

#[test]
fn listing_scan_filters_by_directory_level() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    db.prepare("CREATE TABLE files (name TEXT PRIMARY KEY)")
        .unwrap()
        .expect_done()
        .unwrap();
    for name in ["docs/a.txt", "docs/b.txt", "docs/sub/c.txt", "media/d.bin", "rootfile"] {
        let mut insert = db.prepare("INSERT INTO files (name) VALUES (:name)").unwrap();
        insert.bind_text(":name", name).unwrap();
        insert.expect_done().unwrap();
    }

    let mut listing = db
        .prepare(
            "SELECT name FROM files WHERE path_match(name, :pattern, :slashes, :wildcard) <> 0 \
             ORDER BY name",
        )
        .unwrap();
    listing.bind_text(":pattern", "docs/*").unwrap();
    listing.bind_int64(":slashes", 1).unwrap();
    listing.bind_int64(":wildcard", 1).unwrap();

    let mut names = Vec::new();
    listing
        .for_each_row(|row| {
            names.push(row.get::<_, String>(0)?);
            Ok(())
        })
        .unwrap();
    // The deep entry matches through truncation to its first level; the
    // sibling volume directory and the root file do not.
    assert_eq!(
        names,
        vec![
            String::from("docs/a.txt"),
            String::from("docs/b.txt"),
            String::from("docs/sub/c.txt"),
        ]
    );
}

// ============================================================================
// SECTION: Properties
// ============================================================================

proptest! {
    #[test]
    fn arbitrary_inputs_never_abort_a_query(
        path in "[\\[\\]a-c/*?!-]{0,24}",
        pattern in "[\\[\\]a-c/*?!-]{0,24}",
        slashes in 0_i64 .. 4,
        wildcard in 0_i64 .. 2,
    ) {
        let temp = TempDir::new().unwrap();
        let db = open_db(&temp);
        let result = pmatch(&db, &path, &pattern, slashes, wildcard);
        prop_assert!(matches!(result, None | Some(0 ..= 6)));
    }
}
