use rusqlite::{Connection, OptionalExtension};

use crate::errors::StoreError;

pub const SCHEMA_VERSION: i64 = 1;

/// Creates the record tables when missing and checks the stored version.
/// Foreign keys are deferred so a batch may be written in any order and is
/// only checked at flush.
pub fn ensure_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;
        CREATE TABLE IF NOT EXISTS records (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            kind            TEXT NOT NULL,
            short_label     TEXT NOT NULL,
            identity        TEXT,
            parent_id       INTEGER REFERENCES records(id) DEFERRABLE INITIALLY DEFERRED,
            parent_relation TEXT,
            position        INTEGER NOT NULL DEFAULT 0,
            attributes      TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS record_links (
            from_id  INTEGER NOT NULL REFERENCES records(id) DEFERRABLE INITIALLY DEFERRED,
            relation TEXT NOT NULL,
            position INTEGER NOT NULL,
            to_id    INTEGER NOT NULL REFERENCES records(id) DEFERRABLE INITIALLY DEFERRED
        );
        CREATE INDEX IF NOT EXISTS idx_records_kind_identity ON records(kind, identity);
        CREATE INDEX IF NOT EXISTS idx_records_parent ON records(parent_id, parent_relation, position);
        CREATE INDEX IF NOT EXISTS idx_links_from ON record_links(from_id, relation, position);
        CREATE INDEX IF NOT EXISTS idx_links_to ON record_links(to_id);
        CREATE TABLE IF NOT EXISTS store_meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            schema_version INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| StoreError::schema(e.to_string()))?;
    ensure_meta(conn)
}

pub fn read_schema_version(conn: &Connection) -> Result<i64, StoreError> {
    conn.query_row(
        "SELECT schema_version FROM store_meta WHERE id=1",
        [],
        |row| row.get(0),
    )
    .map_err(|e| StoreError::schema(e.to_string()))
}

fn ensure_meta(conn: &Connection) -> Result<(), StoreError> {
    let version: Option<i64> = conn
        .query_row(
            "SELECT schema_version FROM store_meta WHERE id=1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(|e| StoreError::schema(e.to_string()))?;
    match version {
        Some(existing) if existing != SCHEMA_VERSION => Err(StoreError::schema(format!(
            "database schema version {existing} does not match supported {SCHEMA_VERSION}"
        ))),
        Some(_) => Ok(()),
        None => {
            conn.execute(
                "INSERT INTO store_meta(id, schema_version) VALUES(1, ?1)",
                [SCHEMA_VERSION],
            )
            .map_err(|e| StoreError::schema(e.to_string()))?;
            Ok(())
        }
    }
}
