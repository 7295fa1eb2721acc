//! Persistence boundary of the engine. [`SyncBackend`] is everything the
//! engine needs from a store: lookup by identifying attributes, load by
//! identifier, insert, update, one flush per batch, plus savepoint scopes.
//! [`SqliteStore`] implements it on a bundled SQLite database.

mod counters;
mod record;
mod schema;
mod sqlite;

use crate::errors::StoreError;
use crate::model::{Entity, EntityId, EntityKind};
use crate::sync::IdentifyingAttributes;

pub use counters::{StoreCounters, StoreCountersSnapshot};
pub use record::{ParentLink, Record, StoredRelation};
pub use schema::{SCHEMA_VERSION, ensure_schema, read_schema_version};
pub use sqlite::SqliteStore;

pub trait SyncBackend {
    fn find_by_identifying_attributes(
        &self,
        kind: EntityKind,
        attributes: &IdentifyingAttributes,
    ) -> Result<Option<EntityId>, StoreError>;
    /// Loads a record and marks it as tracked for the current session.
    fn find_by_identifier(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<Record>, StoreError>;
    /// Whether `entity` was loaded or written in the current session.
    fn is_tracked(&self, entity: &Entity) -> bool;
    fn insert(&self, record: &Record) -> Result<EntityId, StoreError>;
    fn update(&self, record: &Record) -> Result<(), StoreError>;
    /// Checks integrity of pending writes and makes them durable, unless a
    /// scope is open.
    fn flush(&self) -> Result<(), StoreError>;
    fn begin_scope(&self) -> Result<(), StoreError>;
    fn end_scope(&self, commit: bool) -> Result<(), StoreError>;
    /// Drops pending writes since the last flush or the innermost scope.
    fn discard(&self) -> Result<(), StoreError>;
}

impl<B> SyncBackend for &B
where
    B: SyncBackend + ?Sized,
{
    fn find_by_identifying_attributes(
        &self,
        kind: EntityKind,
        attributes: &IdentifyingAttributes,
    ) -> Result<Option<EntityId>, StoreError> {
        (*self).find_by_identifying_attributes(kind, attributes)
    }

    fn find_by_identifier(
        &self,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Option<Record>, StoreError> {
        (*self).find_by_identifier(kind, id)
    }

    fn is_tracked(&self, entity: &Entity) -> bool {
        (*self).is_tracked(entity)
    }

    fn insert(&self, record: &Record) -> Result<EntityId, StoreError> {
        (*self).insert(record)
    }

    fn update(&self, record: &Record) -> Result<(), StoreError> {
        (*self).update(record)
    }

    fn flush(&self) -> Result<(), StoreError> {
        (*self).flush()
    }

    fn begin_scope(&self) -> Result<(), StoreError> {
        (*self).begin_scope()
    }

    fn end_scope(&self, commit: bool) -> Result<(), StoreError> {
        (*self).end_scope(commit)
    }

    fn discard(&self) -> Result<(), StoreError> {
        (*self).discard()
    }
}
