use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::batch::SyncBatch;
use super::finder::DuplicateFinder;
use super::identity::IdentityKey;
use super::merge::{MergeReport, StateMerger};
use super::order::PersistenceOrderPolicy;
use super::stats::Statistics;
use crate::config::SyncConfig;
use crate::errors::{CommitStage, SyncError};
use crate::model::{
    Cardinality, Entity, EntityGraph, EntityId, EntityKind, Handle, Loaded, Relation,
};
use crate::store::{ParentLink, Record, StoredRelation, SyncBackend};

/// Phase of the engine; `Failed` until the next successful batch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EngineState {
    #[default]
    Idle,
    Walking,
    Committing,
    Failed,
}

/// Outcome of a successful synchronization.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Synchronized {
    pub statistics: Statistics,
    /// Stored identifier of every submitted handle that resolved to one,
    /// including duplicates that were folded into another entity.
    pub identifiers: BTreeMap<Handle, EntityId>,
    /// Finalized stored state of each root.
    pub roots: BTreeMap<Handle, Record>,
}

impl Synchronized {
    pub fn id_of(&self, handle: Handle) -> Option<EntityId> {
        self.identifiers.get(&handle).copied()
    }

    pub fn root(&self, handle: Handle) -> Option<&Record> {
        self.roots.get(&handle)
    }
}

/// Walks submitted graphs, decides insert, update or reuse for every
/// entity, and commits each batch through `B` in dependency order.
pub struct SyncEngine<B> {
    backend: B,
    config: SyncConfig,
    statistics: Statistics,
    state: EngineState,
    merger: StateMerger,
}

impl<B: SyncBackend> SyncEngine<B> {
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, SyncConfig::default())
    }

    pub fn with_config(backend: B, config: SyncConfig) -> Self {
        Self {
            backend,
            config,
            statistics: Statistics::new(),
            state: EngineState::Idle,
            merger: StateMerger::new(),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn set_update_without_identifier(&mut self, enabled: bool) {
        self.config.update_without_identifier = enabled;
    }

    pub fn set_statistics_enabled(&mut self, enabled: bool) {
        self.config.statistics_enabled = enabled;
    }

    /// Statistics accumulated over every successful batch since the last reset.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    pub fn reset_statistics(&mut self) {
        self.statistics.reset();
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Synchronizes the entities reachable from `roots`.
    ///
    /// `graph` is not modified. On error nothing of the batch is persisted:
    /// pending writes are discarded through the backend.
    #[tracing::instrument(skip(self, graph), fields(entities = graph.len()))]
    pub fn synchronize(
        &mut self,
        graph: &EntityGraph,
        roots: &[Handle],
    ) -> Result<Synchronized, SyncError> {
        let mut batch = SyncBatch::new(graph, self.config.statistics_enabled);
        match self.run(&mut batch, roots) {
            Ok(result) => {
                self.state = EngineState::Idle;
                self.statistics.absorb(&result.statistics);
                info!(statistics = %result.statistics, "batch synchronized");
                Ok(result)
            }
            Err(err) => {
                self.state = EngineState::Failed;
                if let Err(discard) = self.backend.discard() {
                    warn!(error = %discard, "discarding pending writes failed");
                }
                warn!(error = %err, "batch discarded");
                Err(err)
            }
        }
    }

    /// Like [`synchronize`](Self::synchronize), inside a backend scope that
    /// is committed on success and rolled back on failure.
    pub fn synchronize_in_new_scope(
        &mut self,
        graph: &EntityGraph,
        roots: &[Handle],
    ) -> Result<Synchronized, SyncError> {
        self.backend.begin_scope()?;
        let result = self.synchronize(graph, roots);
        match self.backend.end_scope(result.is_ok()) {
            Ok(()) => result,
            Err(err) if result.is_ok() => {
                self.state = EngineState::Failed;
                Err(err.into())
            }
            Err(err) => {
                warn!(error = %err, "closing failed scope");
                result
            }
        }
    }

    fn run(&mut self, batch: &mut SyncBatch, roots: &[Handle]) -> Result<Synchronized, SyncError> {
        self.state = EngineState::Walking;
        for root in roots {
            self.walk(batch, *root)?;
        }
        self.state = EngineState::Committing;
        // Writes become durable only once every root has been reloaded.
        self.backend.begin_scope()?;
        let finalized = match self.commit_and_reload(batch, roots) {
            Ok(finalized) => finalized,
            Err(err) => {
                if let Err(rollback) = self.backend.end_scope(false) {
                    warn!(error = %rollback, "rolling back batch scope failed");
                }
                return Err(err);
            }
        };
        self.backend.end_scope(true)?;
        Ok(Synchronized {
            statistics: batch.statistics.clone(),
            identifiers: batch.identifiers(),
            roots: finalized,
        })
    }

    /// Returns the canonical handle that now stands for `handle`.
    fn walk(&mut self, batch: &mut SyncBatch, handle: Handle) -> Result<Handle, SyncError> {
        let handle = batch.resolve(handle);
        let entity = batch.graph.entity(handle)?;
        let (kind, id) = (entity.kind, entity.id);
        if !entity.is_realized() {
            if id.is_none() {
                return Err(SyncError::invalid_graph(format!(
                    "{kind} {handle} has neither content nor identifier"
                )));
            }
            return Ok(handle);
        }

        let key = batch.keys.key_for(&batch.graph, handle)?;
        if let Some(canonical) = batch.synched.get(&key).copied() {
            let canonical = batch.resolve(canonical);
            if canonical != handle {
                if !kind.is_shared() {
                    batch.count(|stats| stats.record_duplicate(kind));
                }
                debug!(%kind, %key, "duplicate within batch");
                batch.substitute(handle, canonical);
            }
            return Ok(canonical);
        }
        batch.synched.insert(key.clone(), handle);

        let result = match id {
            None => self.walk_unidentified(batch, handle, kind)?,
            Some(id) => {
                if self.backend.is_tracked(batch.graph.entity(handle)?) {
                    handle
                } else {
                    self.walk_transient(batch, handle, kind, id)?
                }
            }
        };

        let final_key = batch.keys.key_for(&batch.graph, result)?;
        if final_key != key {
            batch.synched.entry(final_key).or_insert(result);
        }
        batch.substitute(handle, result);
        Ok(result)
    }

    fn walk_unidentified(
        &mut self,
        batch: &mut SyncBatch,
        handle: Handle,
        kind: EntityKind,
    ) -> Result<Handle, SyncError> {
        if kind.is_scoped() {
            debug!(%kind, %handle, "new scoped entity");
            batch.queue_insert(handle);
            self.descend(batch, handle)?;
            return Ok(handle);
        }

        let attributes = batch.keys.identifying_attributes(&batch.graph, handle)?;
        let stored = DuplicateFinder::new(&self.backend).find_by_attributes(&attributes)?;
        let Some(id) = stored else {
            debug!(%kind, %handle, "new entity");
            batch.identities.insert(handle, attributes.canonical());
            batch.queue_insert(handle);
            self.descend(batch, handle)?;
            return Ok(handle);
        };

        if self.config.update_without_identifier {
            let target = self.load_counterpart(batch, kind, id)?;
            let report = self
                .merger
                .merge(&mut batch.keys, &mut batch.graph, handle, target)?;
            adopt_matches(batch, &report);
            if report.changed() {
                debug!(%kind, %id, "merged into stored record");
                queue_merge(batch, &report);
                self.descend(batch, target)?;
                return Ok(target);
            }
        }
        debug!(%kind, %id, "duplicate of stored record");
        batch.count(|stats| stats.record_duplicate(kind));
        batch.graph.entity_mut(handle)?.id = Some(id);
        Ok(handle)
    }

    fn walk_transient(
        &mut self,
        batch: &mut SyncBatch,
        handle: Handle,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Handle, SyncError> {
        batch.count(|stats| stats.record_transient(kind));
        let target = self.load_counterpart(batch, kind, id)?;
        let report = self
            .merger
            .merge(&mut batch.keys, &mut batch.graph, handle, target)?;
        adopt_matches(batch, &report);
        if report.changed() {
            debug!(%kind, %id, "transient entity changed stored state");
            queue_merge(batch, &report);
        }
        self.descend(batch, target)?;
        Ok(target)
    }

    /// Walks every loaded relation of `handle` and rewrites it to point at
    /// canonical handles, dropping repeated collection members.
    fn descend(&mut self, batch: &mut SyncBatch, handle: Handle) -> Result<(), SyncError> {
        let relations = match &batch.graph.entity(handle)?.relations {
            Loaded::Loaded(relations) => relations.clone(),
            Loaded::NotLoaded => return Ok(()),
        };
        for (name, relation) in relations {
            match relation {
                Relation::One(Some(child)) => {
                    let resolved = self.walk(batch, child)?;
                    if resolved != child {
                        batch
                            .graph
                            .set_relation(handle, &name, Relation::One(Some(resolved)))?;
                    }
                }
                Relation::Many(Loaded::Loaded(members)) => {
                    let mut resolved = Vec::with_capacity(members.len());
                    for member in &members {
                        let canonical = self.walk(batch, *member)?;
                        if !resolved.contains(&canonical) {
                            resolved.push(canonical);
                        }
                    }
                    if resolved != members {
                        batch.graph.set_relation(
                            handle,
                            &name,
                            Relation::Many(Loaded::Loaded(resolved)),
                        )?;
                    }
                }
                Relation::One(None) | Relation::Many(Loaded::NotLoaded) => {}
            }
        }
        Ok(())
    }

    fn load_counterpart(
        &mut self,
        batch: &mut SyncBatch,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Handle, SyncError> {
        if let Some(handle) = batch.materialized.get(&id).copied()
            && batch.graph.entity(handle)?.is_realized()
        {
            return Ok(handle);
        }
        let record = self
            .backend
            .find_by_identifier(kind, id)?
            .ok_or(SyncError::UnknownIdentifier { kind, id })?;
        self.materialize(batch, record)
    }

    /// Brings a stored record into the arena. Owned children are loaded in
    /// full; other references become hollow stubs carrying the stored
    /// identity, enough to compare them by content.
    fn materialize(&mut self, batch: &mut SyncBatch, record: Record) -> Result<Handle, SyncError> {
        let handle = match batch.materialized.get(&record.id) {
            Some(handle) => *handle,
            None => {
                let handle = batch.graph.add(Entity::reference(record.kind, record.id));
                batch.materialized.insert(record.id, handle);
                handle
            }
        };

        let mut relations = BTreeMap::new();
        for spec in record.kind.relations() {
            let relation = match (spec.cardinality, record.links.get(spec.name)) {
                (Cardinality::One, Some(StoredRelation::One(Some(target)))) => {
                    Relation::One(Some(self.stub(batch, spec.target, *target)?))
                }
                (Cardinality::One, _) => Relation::One(None),
                (Cardinality::Many, Some(StoredRelation::Many(members))) => {
                    let mut handles = Vec::with_capacity(members.len());
                    for member in members {
                        let child = if spec.owned {
                            let stored = self
                                .backend
                                .find_by_identifier(spec.target, *member)?
                                .ok_or(SyncError::UnknownIdentifier {
                                    kind: spec.target,
                                    id: *member,
                                })?;
                            let child = self.materialize(batch, stored)?;
                            batch.graph.entity_mut(child)?.parent = Some(handle);
                            child
                        } else {
                            self.stub(batch, spec.target, *member)?
                        };
                        handles.push(child);
                    }
                    Relation::Many(Loaded::Loaded(handles))
                }
                (Cardinality::Many, _) => Relation::Many(Loaded::Loaded(Vec::new())),
            };
            relations.insert(spec.name.to_string(), relation);
        }

        let entity = batch.graph.entity_mut(handle)?;
        entity.id = Some(record.id);
        entity.short_label = record.short_label;
        entity.attributes = record.attributes;
        entity.relations = Loaded::Loaded(relations);
        entity.stored_identity = record.identity;
        entity.session = Some(record.session);
        Ok(handle)
    }

    fn stub(
        &mut self,
        batch: &mut SyncBatch,
        kind: EntityKind,
        id: EntityId,
    ) -> Result<Handle, SyncError> {
        if let Some(handle) = batch.materialized.get(&id) {
            return Ok(*handle);
        }
        let mut stub = Entity::reference(kind, id);
        if let Some(record) = self.backend.find_by_identifier(kind, id)? {
            stub.short_label = record.short_label;
            stub.stored_identity = record.identity;
            stub.session = Some(record.session);
        }
        let handle = batch.graph.add(stub);
        batch.materialized.insert(id, handle);
        Ok(handle)
    }

    fn commit_and_reload(
        &mut self,
        batch: &mut SyncBatch,
        roots: &[Handle],
    ) -> Result<BTreeMap<Handle, Record>, SyncError> {
        self.commit(batch)?;
        self.reload(batch, roots)
    }

    #[tracing::instrument(skip_all, fields(inserts = batch.to_insert.len(), updates = batch.to_update.len()))]
    fn commit(&mut self, batch: &mut SyncBatch) -> Result<(), SyncError> {
        let mut inserts = Vec::with_capacity(batch.to_insert.len());
        for handle in &batch.to_insert {
            inserts.push((*handle, batch.graph.entity(*handle)?.kind));
        }
        PersistenceOrderPolicy::sort(&mut inserts, |item| item.1);
        for (handle, kind) in inserts {
            let record = build_record(batch, handle)?;
            let id = self
                .backend
                .insert(&record)
                .map_err(|e| batch.integrity_failure(CommitStage::Insert, Some(handle), e))?;
            batch.graph.entity_mut(handle)?.id = Some(id);
            batch.count(|stats| stats.record_insert(kind));
            debug!(%kind, %id, "inserted");
        }

        let mut updates = Vec::with_capacity(batch.to_update.len());
        for handle in &batch.to_update {
            updates.push((*handle, batch.graph.entity(*handle)?.kind));
        }
        PersistenceOrderPolicy::sort(&mut updates, |item| item.1);
        for (handle, kind) in updates {
            let record = build_record(batch, handle)?;
            self.backend
                .update(&record)
                .map_err(|e| batch.integrity_failure(CommitStage::Update, Some(handle), e))?;
            batch.count(|stats| stats.record_update(kind));
            debug!(%kind, id = %record.id, "updated");
        }

        self.backend
            .flush()
            .map_err(|e| batch.integrity_failure(CommitStage::Flush, None, e))
    }

    fn reload(
        &mut self,
        batch: &mut SyncBatch,
        roots: &[Handle],
    ) -> Result<BTreeMap<Handle, Record>, SyncError> {
        let mut finalized = BTreeMap::new();
        for root in roots {
            let handle = batch.resolve(*root);
            let entity = batch.graph.entity(handle)?;
            let (kind, id) = (entity.kind, entity.id);
            let id = match id {
                Some(id) => id,
                None => {
                    let found = DuplicateFinder::new(&self.backend).find_stored_identifier(
                        &mut batch.keys,
                        &batch.graph,
                        handle,
                    )?;
                    let Some(id) = found else {
                        let key = batch.keys.key_for(&batch.graph, handle)?;
                        return Err(SyncError::DuplicateResolution {
                            kind,
                            key: key.to_string(),
                        });
                    };
                    batch.graph.entity_mut(handle)?.id = Some(id);
                    id
                }
            };
            let record = self.backend.find_by_identifier(kind, id)?.ok_or_else(|| {
                SyncError::DuplicateResolution {
                    kind,
                    key: IdentityKey::stored(id).to_string(),
                }
            })?;
            finalized.insert(*root, record);
        }
        Ok(finalized)
    }
}

/// Submitted children matched to stored ones resolve to the stored handle.
fn adopt_matches(batch: &mut SyncBatch, report: &MergeReport) {
    for (submitted, stored) in &report.matched {
        batch.substitute(*submitted, *stored);
    }
}

fn queue_merge(batch: &mut SyncBatch, report: &MergeReport) {
    for handle in report.dirty.iter().chain(&report.detached) {
        batch.queue_update(*handle);
    }
}

/// Flattens an arena entity into a record, resolving every reference to a
/// stored identifier. Owned collections are not written as links; children
/// carry their parent link instead.
fn build_record(batch: &SyncBatch, handle: Handle) -> Result<Record, SyncError> {
    let entity = batch.graph.entity(handle)?;
    let parent = match entity.parent {
        Some(parent) => {
            let parent = batch.resolve(parent);
            let id = batch
                .graph
                .entity(parent)?
                .id
                .ok_or_else(|| batch.unpersisted(handle, parent))?;
            let (relation, position) =
                batch.graph.position_in_parent(parent, handle).ok_or_else(|| {
                    SyncError::invalid_graph(format!(
                        "{} is not listed by its parent {}",
                        batch.describe(handle),
                        batch.describe(parent)
                    ))
                })?;
            Some(ParentLink {
                id,
                relation,
                position,
            })
        }
        None => None,
    };

    let stored_id = |target: Handle| -> Result<EntityId, SyncError> {
        let target = batch.resolve(target);
        batch
            .graph
            .entity(target)?
            .id
            .ok_or_else(|| batch.unpersisted(handle, target))
    };
    let mut links = BTreeMap::new();
    for spec in entity.kind.relations().iter().filter(|spec| !spec.owned) {
        let link = match entity.relation(spec.name) {
            Some(Relation::One(target)) => {
                StoredRelation::One(target.map(stored_id).transpose()?)
            }
            Some(Relation::Many(Loaded::Loaded(members))) => StoredRelation::Many(
                members
                    .iter()
                    .map(|member| stored_id(*member))
                    .collect::<Result<Vec<_>, SyncError>>()?,
            ),
            Some(Relation::Many(Loaded::NotLoaded)) | None => continue,
        };
        links.insert(spec.name.to_string(), link);
    }

    Ok(Record {
        id: entity.id.unwrap_or_default(),
        kind: entity.kind,
        short_label: entity.short_label.clone(),
        identity: batch.identities.get(&handle).cloned(),
        parent,
        attributes: entity.attributes.clone(),
        links,
        session: Default::default(),
    })
}
