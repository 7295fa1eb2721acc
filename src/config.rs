//! Engine and store configuration.
//!
//! [`SyncConfig`] carries the two engine switches; [`StoreConfig`] carries
//! SQLite tuning applied by [`open_store`] before the schema is ensured.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::store::{SqliteStore, ensure_schema};

/// Behavior switches of [`SyncEngine`](crate::SyncEngine).
///
/// ```rust
/// use interactsync::SyncConfig;
/// let config = SyncConfig::default();
/// assert!(!config.update_without_identifier);
/// assert!(config.statistics_enabled);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// When a submitted entity without identifier matches a stored record,
    /// merge its state into that record instead of only reusing its id.
    ///
    /// **Default:** `false`
    pub update_without_identifier: bool,

    /// Collect per-kind statistics for each batch.
    ///
    /// **Default:** `true`
    pub statistics_enabled: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            update_without_identifier: false,
            statistics_enabled: true,
        }
    }
}

/// Options for [`open_store`].
///
/// ```rust
/// use interactsync::StoreConfig;
/// let config = StoreConfig::default();
/// assert!(!config.without_foreign_keys);
/// assert!(config.cache_size.is_none());
/// assert!(config.pragma_settings.is_empty());
/// ```
#[derive(Clone, Debug, Default)]
pub struct StoreConfig {
    /// Skip the foreign key check at flush and disable SQLite enforcement.
    ///
    /// **Default:** `false`
    ///
    /// Only for bulk loads from a trusted source: dangling references are
    /// then persisted silently.
    pub without_foreign_keys: bool,

    /// Capacity of the prepared statement cache.
    ///
    /// **Default:** `None` (rusqlite's default)
    pub cache_size: Option<usize>,

    /// Extra PRAGMAs applied after opening, e.g. `journal_mode = WAL`.
    ///
    /// **Default:** empty
    pub pragma_settings: HashMap<String, String>,
}

/// Opens (or creates) a store at `path` with the given options.
///
/// ```rust,no_run
/// use interactsync::{StoreConfig, open_store};
///
/// let mut cfg = StoreConfig::default();
/// cfg.pragma_settings.insert("journal_mode".to_string(), "WAL".to_string());
/// let store = open_store("curation.db", &cfg)?;
/// # Ok::<(), interactsync::StoreError>(())
/// ```
pub fn open_store<P: AsRef<Path>>(path: P, cfg: &StoreConfig) -> Result<SqliteStore, StoreError> {
    let conn = Connection::open(path).map_err(|e| StoreError::connection(e.to_string()))?;
    configure_connection(&conn, cfg)?;
    Ok(SqliteStore::from_connection(conn, !cfg.without_foreign_keys))
}

/// In-memory variant of [`open_store`].
pub fn open_store_in_memory(cfg: &StoreConfig) -> Result<SqliteStore, StoreError> {
    let conn = Connection::open_in_memory().map_err(|e| StoreError::connection(e.to_string()))?;
    configure_connection(&conn, cfg)?;
    Ok(SqliteStore::from_connection(conn, !cfg.without_foreign_keys))
}

fn configure_connection(conn: &Connection, cfg: &StoreConfig) -> Result<(), StoreError> {
    if let Some(capacity) = cfg.cache_size {
        conn.set_prepared_statement_cache_capacity(capacity);
    }
    for (key, value) in &cfg.pragma_settings {
        match conn.execute(&format!("PRAGMA {key} = {value}"), []) {
            Ok(_) | Err(rusqlite::Error::ExecuteReturnedResults) => {}
            Err(e) => {
                return Err(StoreError::connection(format!("PRAGMA {key} = {value}: {e}")));
            }
        }
    }
    ensure_schema(conn)?;
    if cfg.without_foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = OFF")
            .map_err(|e| StoreError::connection(e.to_string()))?;
    }
    Ok(())
}
