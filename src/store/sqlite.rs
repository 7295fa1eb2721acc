use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashSet;
use parking_lot::{Mutex, RwLock};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::counters::{StoreCounters, StoreCountersSnapshot};
use super::record::{ParentLink, Record, StoredRelation, validate_record};
use super::schema::{ensure_schema, read_schema_version};
use super::SyncBackend;
use crate::errors::StoreError;
use crate::fault_injection::{self, FaultPoint};
use crate::model::{Cardinality, Entity, EntityId, EntityKind, SessionToken};
use crate::sync::IdentifyingAttributes;

const RECORD_COLUMNS: &str =
    "id, kind, short_label, identity, parent_id, parent_relation, position, attributes";

/// [`SyncBackend`] over a single SQLite connection.
///
/// Writes open a transaction lazily; [`flush`](SyncBackend::flush) checks
/// the deferred foreign keys and commits unless a scope (savepoint) is
/// open. Every flush or discard starts a new session, which untracks all
/// records loaded before it.
pub struct SqliteStore {
    conn: Connection,
    check_foreign_keys: bool,
    tracked: RwLock<AHashSet<EntityId>>,
    session: AtomicU64,
    scopes: Mutex<Vec<String>>,
    counters: StoreCounters,
}

impl SqliteStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(|e| StoreError::connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn, true))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::connection(e.to_string()))?;
        ensure_schema(&conn)?;
        Ok(Self::from_connection(conn, true))
    }

    pub(crate) fn from_connection(conn: Connection, check_foreign_keys: bool) -> Self {
        Self {
            conn,
            check_foreign_keys,
            tracked: RwLock::new(AHashSet::new()),
            session: AtomicU64::new(0),
            scopes: Mutex::new(Vec::new()),
            counters: StoreCounters::default(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn schema_version(&self) -> Result<i64, StoreError> {
        read_schema_version(&self.conn)
    }

    pub fn counters(&self) -> StoreCountersSnapshot {
        self.counters.snapshot()
    }

    pub fn reset_counters(&self) {
        self.counters.reset();
    }

    pub fn session(&self) -> SessionToken {
        SessionToken(self.session.load(Ordering::Relaxed))
    }

    /// Reads a record without marking it as tracked.
    pub fn get_record(&self, id: EntityId) -> Result<Record, StoreError> {
        self.load_record(id)?
            .ok_or_else(|| StoreError::not_found(format!("record {id}")))
    }

    pub fn record_count(&self) -> Result<usize, StoreError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))
            .map_err(|e| StoreError::query(e.to_string()))?;
        Ok(count as usize)
    }

    pub fn record_ids(&self, kind: EntityKind) -> Result<Vec<EntityId>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id FROM records WHERE kind=?1 ORDER BY id")
            .map_err(|e| StoreError::query(e.to_string()))?;
        let rows = stmt
            .query_map(params![kind.as_str()], |row| row.get::<_, i64>(0))
            .map_err(|e| StoreError::query(e.to_string()))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(EntityId(row.map_err(|e| StoreError::query(e.to_string()))?));
        }
        Ok(ids)
    }

    /// Every stored link as `(from, relation, to)`, in insertion order.
    pub fn links(&self) -> Result<Vec<(EntityId, String, EntityId)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT from_id, relation, to_id FROM record_links ORDER BY rowid")
            .map_err(|e| StoreError::query(e.to_string()))?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    EntityId(row.get(0)?),
                    row.get::<_, String>(1)?,
                    EntityId(row.get(2)?),
                ))
            })
            .map_err(|e| StoreError::query(e.to_string()))?;
        let mut links = Vec::new();
        for row in rows {
            links.push(row.map_err(|e| StoreError::query(e.to_string()))?);
        }
        Ok(links)
    }

    /// Owned children of `parent`, grouped by relation and ordered by position.
    pub fn children_of(
        &self,
        parent: EntityId,
    ) -> Result<BTreeMap<String, Vec<EntityId>>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT id, parent_relation FROM records WHERE parent_id=?1 ORDER BY parent_relation, position, id",
            )
            .map_err(|e| StoreError::query(e.to_string()))?;
        let rows = stmt
            .query_map(params![parent.as_i64()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<String>>(1)?))
            })
            .map_err(|e| StoreError::query(e.to_string()))?;
        let mut children: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();
        for row in rows {
            let (id, relation) = row.map_err(|e| StoreError::query(e.to_string()))?;
            children
                .entry(relation.unwrap_or_default())
                .or_default()
                .push(EntityId(id));
        }
        Ok(children)
    }

    fn load_record(&self, id: EntityId) -> Result<Option<Record>, StoreError> {
        let record = self
            .conn
            .query_row(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id=?1"),
                params![id.as_i64()],
                row_to_record,
            )
            .optional()
            .map_err(|e| StoreError::query(e.to_string()))?;
        let Some(mut record) = record else {
            return Ok(None);
        };

        let mut linked = self.outgoing_links(id)?;
        let mut children = self.children_of(id)?;
        for spec in record.kind.relations() {
            let relation = match spec.cardinality {
                Cardinality::One => StoredRelation::One(
                    linked
                        .remove(spec.name)
                        .and_then(|targets| targets.first().copied()),
                ),
                Cardinality::Many if spec.owned => {
                    StoredRelation::Many(children.remove(spec.name).unwrap_or_default())
                }
                Cardinality::Many => {
                    StoredRelation::Many(linked.remove(spec.name).unwrap_or_default())
                }
            };
            record.links.insert(spec.name.to_string(), relation);
        }
        record.session = self.session();
        Ok(Some(record))
    }

    fn outgoing_links(&self, id: EntityId) -> Result<BTreeMap<String, Vec<EntityId>>, StoreError> {
        let mut stmt = self
            .conn
            .prepare_cached(
                "SELECT relation, to_id FROM record_links WHERE from_id=?1 ORDER BY relation, position",
            )
            .map_err(|e| StoreError::query(e.to_string()))?;
        let rows = stmt
            .query_map(params![id.as_i64()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })
            .map_err(|e| StoreError::query(e.to_string()))?;
        let mut linked: BTreeMap<String, Vec<EntityId>> = BTreeMap::new();
        for row in rows {
            let (relation, to) = row.map_err(|e| StoreError::query(e.to_string()))?;
            linked.entry(relation).or_default().push(EntityId(to));
        }
        Ok(linked)
    }

    /// Replaces the stored links of every relation present in `links`.
    fn write_links(
        &self,
        id: EntityId,
        links: &BTreeMap<String, StoredRelation>,
    ) -> Result<(), StoreError> {
        for (relation, value) in links {
            self.conn
                .execute(
                    "DELETE FROM record_links WHERE from_id=?1 AND relation=?2",
                    params![id.as_i64(), relation],
                )
                .map_err(|e| StoreError::query(e.to_string()))?;
            let targets: Vec<EntityId> = match value {
                StoredRelation::One(target) => target.iter().copied().collect(),
                StoredRelation::Many(targets) => {
                    let mut seen = AHashSet::new();
                    targets.iter().copied().filter(|t| seen.insert(*t)).collect()
                }
            };
            let mut stmt = self
                .conn
                .prepare_cached(
                    "INSERT INTO record_links(from_id, relation, position, to_id) VALUES(?1, ?2, ?3, ?4)",
                )
                .map_err(|e| StoreError::query(e.to_string()))?;
            for (position, target) in targets.into_iter().enumerate() {
                stmt.execute(params![id.as_i64(), relation, position as i64, target.as_i64()])
                    .map_err(|e| StoreError::query(e.to_string()))?;
            }
        }
        Ok(())
    }

    fn ensure_transaction(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            self.conn
                .execute_batch("BEGIN IMMEDIATE")
                .map_err(|e| StoreError::transaction(e.to_string()))?;
            self.counters.record_begin();
        }
        Ok(())
    }

    fn first_foreign_key_violation(&self) -> Result<Option<StoreError>, StoreError> {
        let violation = self
            .conn
            .query_row("PRAGMA foreign_key_check", [], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, Option<i64>>(1)?))
            })
            .optional()
            .map_err(|e| StoreError::query(e.to_string()))?;
        let Some((table, rowid)) = violation else {
            return Ok(None);
        };
        let rowid = rowid.unwrap_or_default();
        let (record, referenced) = if table == "record_links" {
            self.conn.query_row(
                "SELECT from_id, to_id FROM record_links WHERE rowid=?1",
                params![rowid],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
            )
        } else {
            self.conn.query_row(
                "SELECT id, parent_id FROM records WHERE rowid=?1",
                params![rowid],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, Option<i64>>(1)?.unwrap_or_default(),
                    ))
                },
            )
        }
        .map_err(|e| StoreError::query(e.to_string()))?;
        Ok(Some(StoreError::ForeignKey { record, referenced }))
    }

    fn advance_session(&self) {
        self.session.fetch_add(1, Ordering::Relaxed);
        self.tracked.write().clear();
    }
}

impl SyncBackend for SqliteStore {
    fn find_by_identifying_attributes(
        &self,
        kind: EntityKind,
        attributes: &IdentifyingAttributes,
    ) -> Result<Option<EntityId>, StoreError> {
        self.counters.record_lookup();
        let identity = attributes.canonical();
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM records WHERE kind=?1 AND identity=?2 ORDER BY id LIMIT 1",
                params![kind.as_str(), identity],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::query(e.to_string()))?;
        Ok(id.map(EntityId))
    }

    fn find_by_identifier(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<Record>, StoreError> {
        self.counters.record_load();
        let Some(record) = self.load_record(id)? else {
            return Ok(None);
        };
        if record.kind != kind {
            debug!(%id, expected = %kind, found = %record.kind, "record kind mismatch");
            return Ok(None);
        }
        self.tracked.write().insert(id);
        Ok(Some(record))
    }

    fn is_tracked(&self, entity: &Entity) -> bool {
        match (entity.id, entity.session) {
            (Some(id), Some(session)) => {
                session == self.session() && self.tracked.read().contains(&id)
            }
            _ => false,
        }
    }

    fn insert(&self, record: &Record) -> Result<EntityId, StoreError> {
        validate_record(record)?;
        if record.kind.is_scoped() && record.parent.is_none() {
            return Err(StoreError::invalid_input(format!(
                "{} requires a parent",
                record.kind
            )));
        }
        fault_injection::check_fault(FaultPoint::InsertRecord)?;
        self.ensure_transaction()?;
        let attributes = serde_json::to_string(&record.attributes)
            .map_err(|e| StoreError::invalid_input(e.to_string()))?;
        let (parent_id, parent_relation, position) = parent_columns(record.parent.as_ref());
        self.conn
            .execute(
                "INSERT INTO records(kind, short_label, identity, parent_id, parent_relation, position, attributes) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    record.kind.as_str(),
                    record.short_label.as_str(),
                    record.identity.as_deref(),
                    parent_id,
                    parent_relation,
                    position,
                    attributes,
                ],
            )
            .map_err(|e| StoreError::query(e.to_string()))?;
        let id = EntityId(self.conn.last_insert_rowid());
        self.write_links(id, &record.links)?;
        self.tracked.write().insert(id);
        self.counters.record_insert();
        Ok(id)
    }

    fn update(&self, record: &Record) -> Result<(), StoreError> {
        if record.id.as_i64() <= 0 {
            return Err(StoreError::invalid_input(
                "record id must be positive for update",
            ));
        }
        validate_record(record)?;
        fault_injection::check_fault(FaultPoint::UpdateRecord)?;
        self.ensure_transaction()?;
        let attributes = serde_json::to_string(&record.attributes)
            .map_err(|e| StoreError::invalid_input(e.to_string()))?;
        let (parent_id, parent_relation, position) = parent_columns(record.parent.as_ref());
        let affected = self
            .conn
            .execute(
                "UPDATE records SET short_label=?1, parent_id=?2, parent_relation=?3, position=?4, attributes=?5 WHERE id=?6 AND kind=?7",
                params![
                    record.short_label.as_str(),
                    parent_id,
                    parent_relation,
                    position,
                    attributes,
                    record.id.as_i64(),
                    record.kind.as_str(),
                ],
            )
            .map_err(|e| StoreError::query(e.to_string()))?;
        if affected == 0 {
            return Err(StoreError::not_found(format!(
                "{} {}",
                record.kind, record.id
            )));
        }
        self.write_links(record.id, &record.links)?;
        self.tracked.write().insert(record.id);
        self.counters.record_update();
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        fault_injection::check_fault(FaultPoint::FlushBeforeCommit)?;
        if self.check_foreign_keys
            && let Some(violation) = self.first_foreign_key_violation()?
        {
            return Err(violation);
        }
        if self.scopes.lock().is_empty() && !self.conn.is_autocommit() {
            self.conn
                .execute_batch("COMMIT")
                .map_err(|e| StoreError::transaction(e.to_string()))?;
            self.counters.record_commit();
        }
        self.counters.record_flush();
        self.advance_session();
        Ok(())
    }

    fn begin_scope(&self) -> Result<(), StoreError> {
        let mut scopes = self.scopes.lock();
        let name = format!("sync_scope_{}", scopes.len());
        self.conn
            .execute_batch(&format!("SAVEPOINT {name}"))
            .map_err(|e| StoreError::transaction(e.to_string()))?;
        scopes.push(name);
        Ok(())
    }

    fn end_scope(&self, commit: bool) -> Result<(), StoreError> {
        let mut scopes = self.scopes.lock();
        let Some(name) = scopes.pop() else {
            return Err(StoreError::transaction("no open scope"));
        };
        let sql = if commit {
            format!("RELEASE {name}")
        } else {
            format!("ROLLBACK TO {name}; RELEASE {name}")
        };
        self.conn
            .execute_batch(&sql)
            .map_err(|e| StoreError::transaction(e.to_string()))?;
        if commit {
            self.counters.record_commit();
        } else {
            self.counters.record_rollback();
            self.advance_session();
        }
        Ok(())
    }

    fn discard(&self) -> Result<(), StoreError> {
        let scopes = self.scopes.lock();
        let sql = match scopes.last() {
            Some(name) => format!("ROLLBACK TO {name}"),
            None if !self.conn.is_autocommit() => "ROLLBACK".to_string(),
            None => {
                self.advance_session();
                return Ok(());
            }
        };
        self.conn
            .execute_batch(&sql)
            .map_err(|e| StoreError::transaction(e.to_string()))?;
        self.counters.record_rollback();
        self.advance_session();
        Ok(())
    }
}

fn parent_columns(parent: Option<&ParentLink>) -> (Option<i64>, Option<&str>, i64) {
    match parent {
        Some(link) => (
            Some(link.id.as_i64()),
            Some(link.relation.as_str()),
            link.position as i64,
        ),
        None => (None, None, 0),
    }
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<Record> {
    let kind: String = row.get(1)?;
    let kind = kind
        .parse::<EntityKind>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;
    let parent_id: Option<i64> = row.get(4)?;
    let parent_relation: Option<String> = row.get(5)?;
    let position: i64 = row.get(6)?;
    let parent = match (parent_id, parent_relation) {
        (Some(id), Some(relation)) => Some(ParentLink {
            id: EntityId(id),
            relation,
            position: position as usize,
        }),
        _ => None,
    };
    let attributes: String = row.get(7)?;
    let attributes = serde_json::from_str(&attributes)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;
    Ok(Record {
        id: EntityId(row.get(0)?),
        kind,
        short_label: row.get(2)?,
        identity: row.get(3)?,
        parent,
        attributes,
        links: BTreeMap::new(),
        session: SessionToken::default(),
    })
}
