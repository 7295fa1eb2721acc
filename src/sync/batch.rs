use std::collections::BTreeMap;

use ahash::{AHashMap, AHashSet};

use super::identity::{IdentityKey, IdentityKeyBuilder};
use super::stats::Statistics;
use crate::errors::{CommitStage, StoreError, SyncError};
use crate::model::{EntityGraph, EntityId, Handle};

/// State of one `synchronize` call. Dropped when the call returns,
/// whatever the outcome.
pub(crate) struct SyncBatch {
    pub(crate) graph: EntityGraph,
    pub(crate) keys: IdentityKeyBuilder,
    pub(crate) synched: AHashMap<IdentityKey, Handle>,
    pub(crate) to_insert: Vec<Handle>,
    pub(crate) to_update: Vec<Handle>,
    /// Canonical identifying attributes of new records, computed during the walk.
    pub(crate) identities: AHashMap<Handle, String>,
    /// Stored records already materialized in the arena.
    pub(crate) materialized: AHashMap<EntityId, Handle>,
    pub(crate) statistics: Statistics,
    queued: AHashSet<Handle>,
    substitutions: AHashMap<Handle, Handle>,
    statistics_enabled: bool,
    submitted: usize,
}

impl SyncBatch {
    pub(crate) fn new(graph: &EntityGraph, statistics_enabled: bool) -> Self {
        Self {
            graph: graph.clone(),
            keys: IdentityKeyBuilder::new(),
            synched: AHashMap::new(),
            to_insert: Vec::new(),
            to_update: Vec::new(),
            identities: AHashMap::new(),
            materialized: AHashMap::new(),
            statistics: Statistics::new(),
            queued: AHashSet::new(),
            substitutions: AHashMap::new(),
            statistics_enabled,
            submitted: graph.len(),
        }
    }

    /// Canonical handle standing in for `handle`.
    pub(crate) fn resolve(&self, handle: Handle) -> Handle {
        let mut current = handle;
        for _ in 0..=self.substitutions.len() {
            match self.substitutions.get(&current) {
                Some(next) if *next != current => current = *next,
                _ => break,
            }
        }
        current
    }

    pub(crate) fn substitute(&mut self, from: Handle, to: Handle) {
        if from != to {
            self.substitutions.insert(from, to);
        }
    }

    pub(crate) fn queue_insert(&mut self, handle: Handle) {
        if self.queued.insert(handle) {
            self.to_insert.push(handle);
        }
    }

    /// No-op for entities already queued, including new ones.
    pub(crate) fn queue_update(&mut self, handle: Handle) {
        if self.queued.insert(handle) {
            self.to_update.push(handle);
        }
    }

    pub(crate) fn count(&mut self, record: impl FnOnce(&mut Statistics)) {
        if self.statistics_enabled {
            record(&mut self.statistics);
        }
    }

    pub(crate) fn describe(&self, handle: Handle) -> String {
        match self.graph.get(handle) {
            Some(entity) => match entity.id {
                Some(id) => format!("{} '{}' (id {id})", entity.kind, entity.short_label),
                None => format!("{} '{}' ({handle})", entity.kind, entity.short_label),
            },
            None => format!("entity {handle}"),
        }
    }

    /// Arena entity carrying stored identifier `id`.
    pub(crate) fn handle_of(&self, id: EntityId) -> Option<Handle> {
        self.graph
            .handles()
            .find(|handle| self.graph.get(*handle).and_then(|e| e.id) == Some(id))
    }

    pub(crate) fn unpersisted(&self, record: Handle, dependency: Handle) -> SyncError {
        SyncError::UnpersistedDependency {
            record: self.describe(record),
            dependency: self.describe(dependency),
            statistics: Box::new(self.statistics.clone()),
        }
    }

    pub(crate) fn integrity_failure(
        &self,
        stage: CommitStage,
        handle: Option<Handle>,
        source: StoreError,
    ) -> SyncError {
        if let StoreError::ForeignKey { record, referenced } = source {
            let record = self
                .handle_of(EntityId(record))
                .map(|handle| self.describe(handle))
                .unwrap_or_else(|| format!("record {record}"));
            let dependency = self
                .handle_of(EntityId(referenced))
                .map(|handle| self.describe(handle))
                .unwrap_or_else(|| format!("record {referenced}"));
            return SyncError::UnpersistedDependency {
                record,
                dependency,
                statistics: Box::new(self.statistics.clone()),
            };
        }
        SyncError::BackendIntegrity {
            stage,
            record: handle
                .map(|handle| self.describe(handle))
                .unwrap_or_else(|| "batch".to_string()),
            source,
            statistics: Box::new(self.statistics.clone()),
        }
    }

    /// Stored identifier of every submitted handle that resolved to one.
    pub(crate) fn identifiers(&self) -> BTreeMap<Handle, EntityId> {
        (0..self.submitted)
            .map(Handle)
            .filter_map(|handle| {
                let id = self.graph.get(self.resolve(handle))?.id?;
                Some((handle, id))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Entity, EntityKind};

    #[test]
    fn substitutions_chain_to_the_canonical_handle() {
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new(EntityKind::Institution, "a"));
        let b = graph.add(Entity::new(EntityKind::Institution, "b"));
        let c = graph.add(Entity::new(EntityKind::Institution, "c"));
        let mut batch = SyncBatch::new(&graph, true);
        batch.substitute(a, b);
        batch.substitute(b, c);
        assert_eq!(batch.resolve(a), c);
        assert_eq!(batch.resolve(c), c);
    }

    #[test]
    fn queued_entities_are_not_updated_again() {
        let mut graph = EntityGraph::new();
        let a = graph.add(Entity::new(EntityKind::Institution, "a"));
        let mut batch = SyncBatch::new(&graph, true);
        batch.queue_insert(a);
        batch.queue_update(a);
        assert_eq!(batch.to_insert, vec![a]);
        assert!(batch.to_update.is_empty());
    }

    #[test]
    fn disabled_statistics_stay_empty() {
        let graph = EntityGraph::new();
        let mut batch = SyncBatch::new(&graph, false);
        batch.count(|stats| stats.record_insert(EntityKind::Xref));
        assert!(batch.statistics.is_empty());
    }
}
