//! Schema versioning and migrations
//!
//! Forward-only, tracked via `PRAGMA user_version`.

use super::{DbError, Result};
use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Apply all migrations to bring DB to current version
pub fn migrate_to_latest(conn: &mut Connection) -> Result<()> {
    let current = get_schema_version(conn)?;

    if current > SCHEMA_VERSION {
        return Err(DbError::Migration(format!(
            "database schema version {current} is newer than supported version {SCHEMA_VERSION}"
        )));
    }

    if current < 1 {
        migration_v1(conn)?;
        tracing::info!(version = 1, "Applied schema migration");
    }

    Ok(())
}

/// Get current schema version
fn get_schema_version(conn: &Connection) -> Result<i32> {
    Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
}

/// Migration V1: petition graph, signature graph, issued public ids.
///
/// `issued_public_ids` has no foreign key to `petitions` and is never
/// wiped, so an identifier is never handed out twice.
fn migration_v1(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS issued_public_ids (
            public_id  TEXT PRIMARY KEY,
            issued_at  INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS petitions (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            public_id     TEXT NOT NULL UNIQUE,
            title         TEXT NOT NULL CHECK (length(title) > 0),
            content       TEXT NOT NULL CHECK (length(content) > 0),
            created_at    INTEGER NOT NULL,
            activated_at  INTEGER,
            creator_id    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_petitions_creator
            ON petitions(creator_id, created_at);

        CREATE TABLE IF NOT EXISTS surveys (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            petition_id    INTEGER NOT NULL REFERENCES petitions(id) ON DELETE CASCADE,
            title          TEXT NOT NULL CHECK (length(title) > 0),
            question_type  TEXT NOT NULL CHECK (question_type IN ('single', 'multiple')),
            sort_order     INTEGER NOT NULL,
            UNIQUE (petition_id, sort_order)
        );

        CREATE TABLE IF NOT EXISTS survey_options (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            survey_id   INTEGER NOT NULL REFERENCES surveys(id) ON DELETE CASCADE,
            label       TEXT NOT NULL CHECK (length(label) > 0),
            sort_order  INTEGER NOT NULL,
            UNIQUE (survey_id, sort_order)
        );

        CREATE TABLE IF NOT EXISTS signatures (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            petition_id      INTEGER NOT NULL REFERENCES petitions(id) ON DELETE CASCADE,
            name             TEXT NOT NULL CHECK (length(name) > 0),
            phone            TEXT NOT NULL,
            signature_path   TEXT NOT NULL,
            created_at       INTEGER NOT NULL,
            UNIQUE (petition_id, phone)
        );

        CREATE TABLE IF NOT EXISTS survey_responses (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            signature_id  INTEGER NOT NULL REFERENCES signatures(id) ON DELETE CASCADE,
            survey_id     INTEGER NOT NULL REFERENCES surveys(id) ON DELETE CASCADE,
            option_id     INTEGER NOT NULL REFERENCES survey_options(id) ON DELETE CASCADE,
            UNIQUE (signature_id, option_id)
        );
        CREATE INDEX IF NOT EXISTS idx_survey_responses_option
            ON survey_responses(option_id);

        PRAGMA user_version = 1;
        "#,
    )?;
    tx.commit()?;
    Ok(())
}
