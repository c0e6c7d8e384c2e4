// crates/cargohold-metadb/tests/query_tests.rs
// ============================================================================
// Module: Statement Executor Tests
// Description: Validate binding, stepping, and contract enforcement.
// Purpose: Ensure outcome classification and statement reuse stay correct.
// Dependencies: cargohold-metadb, tempfile
// ============================================================================

//! ## Overview
//! Conformance tests for the binding layer and statement executor: named
//! placeholder resolution, outcome classification, query-contract violations,
//! and statement reuse after every outcome.

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

use cargohold_metadb::DbError;
use cargohold_metadb::DbOptions;
use cargohold_metadb::MetaDb;
use cargohold_metadb::StepOutcome;
use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn open_db(temp: &TempDir) -> MetaDb {
    MetaDb::open(temp.path().join("meta.db"), DbOptions::default()).expect("open")
}

fn create_schema(db: &MetaDb) {
    db.prepare(
        "CREATE TABLE files (volume INTEGER NOT NULL, name TEXT NOT NULL UNIQUE, size INTEGER \
         NOT NULL, content BLOB, mtime INTEGER)",
    )
    .unwrap()
    .expect_done()
    .unwrap();
}

fn insert_file(db: &MetaDb, volume: i32, name: &str, size: i64) {
    let mut query = db
        .prepare(
            "INSERT INTO files (volume, name, size, content, mtime) VALUES (:volume, :name, \
             :size, :content, :mtime)",
        )
        .unwrap();
    query.bind_int(":volume", volume).unwrap();
    query.bind_text(":name", name).unwrap();
    query.bind_int64(":size", size).unwrap();
    query.bind_blob(":content", &[0xde, 0xad]).unwrap();
    query.bind_null(":mtime").unwrap();
    query.expect_done().unwrap();
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn bind_and_fetch_roundtrip() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);
    insert_file(&db, 7, "vol/a.txt", 42);

    let mut query = db
        .prepare("SELECT volume, name, size, content, mtime FROM files WHERE name = :name")
        .unwrap();
    query.bind_text(":name", "vol/a.txt").unwrap();
    let (volume, name, size, content, mtime) = query
        .fetch_row(|row| {
            Ok((
                row.get::<_, i32>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, Vec<u8>>(3)?,
                row.get::<_, Option<i64>>(4)?,
            ))
        })
        .unwrap();
    assert_eq!(volume, 7);
    assert_eq!(name, "vol/a.txt");
    assert_eq!(size, 42);
    assert_eq!(content, vec![0xde, 0xad]);
    assert_eq!(mtime, None);
}

#[test]
fn missing_placeholder_is_a_bind_defect() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);

    let mut query = db.prepare("SELECT size FROM files WHERE name = :name").unwrap();
    let result = query.bind_int(":volume", 1);
    assert!(matches!(
        result,
        Err(DbError::BindParameter { param, .. }) if param == ":volume"
    ));
}

#[test]
fn statement_reuse_across_rebinds() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);

    let mut query = db
        .prepare("INSERT INTO files (volume, name, size) VALUES (:volume, :name, :size)")
        .unwrap();
    for index in 0 .. 3_i64 {
        query.bind_int(":volume", 1).unwrap();
        query.bind_text(":name", &format!("vol/file-{index}")).unwrap();
        query.bind_int64(":size", index).unwrap();
        query.expect_done().unwrap();
    }

    let mut count = db.prepare("SELECT COUNT(*) FROM files").unwrap();
    let rows: i64 = count.fetch_row(|row| row.get(0)).unwrap();
    assert_eq!(rows, 3);
}

#[test]
fn expect_done_on_row_returning_statement_is_contract_violation() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);

    let mut query = db.prepare("SELECT 1").unwrap();
    let result = query.expect_done();
    assert!(matches!(result, Err(DbError::Contract { .. })));

    // The statement was reset by the violation and is steppable again.
    assert_eq!(query.step().unwrap(), StepOutcome::Row);
}

#[test]
fn fetch_row_on_empty_result_is_contract_violation() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);

    let mut query = db.prepare("SELECT size FROM files WHERE name = :name").unwrap();
    query.bind_text(":name", "absent").unwrap();
    let result = query.fetch_row(|row| row.get::<_, i64>(0));
    assert!(matches!(result, Err(DbError::Contract { .. })));

    // Still rebindable afterwards.
    query.bind_text(":name", "still-absent").unwrap();
    assert_eq!(query.fetch_optional(|row| row.get::<_, i64>(0)).unwrap(), None);
}

#[test]
fn unique_violation_is_an_outcome_not_an_error() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);
    insert_file(&db, 1, "vol/dup", 1);

    let mut query = db
        .prepare("INSERT INTO files (volume, name, size) VALUES (:volume, :name, :size)")
        .unwrap();
    query.bind_int(":volume", 1).unwrap();
    query.bind_text(":name", "vol/dup").unwrap();
    query.bind_int64(":size", 2).unwrap();
    assert_eq!(query.step().unwrap(), StepOutcome::Constraint);

    // The rejected statement can be rebound and retried.
    query.bind_text(":name", "vol/dup-2").unwrap();
    query.bind_int(":volume", 1).unwrap();
    query.bind_int64(":size", 2).unwrap();
    assert_eq!(query.step().unwrap(), StepOutcome::Done);
}

#[test]
fn step_resets_after_every_outcome() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);
    insert_file(&db, 1, "vol/a", 1);
    insert_file(&db, 1, "vol/b", 2);

    let mut query = db.prepare("SELECT name FROM files ORDER BY name").unwrap();
    // Each step reports and resets; a full scan goes through for_each_row.
    assert_eq!(query.step().unwrap(), StepOutcome::Row);
    assert_eq!(query.step().unwrap(), StepOutcome::Row);

    let mut names = Vec::new();
    query
        .for_each_row(|row| {
            names.push(row.get::<_, String>(0)?);
            Ok(())
        })
        .unwrap();
    assert_eq!(names, vec![String::from("vol/a"), String::from("vol/b")]);
}

#[test]
fn close_releases_the_handle_cleanly() {
    let temp = TempDir::new().unwrap();
    let db = open_db(&temp);
    create_schema(&db);
    insert_file(&db, 1, "vol/a", 1);
    // Every statement above was dropped, so close succeeds without leaks.
    db.close();
}
