use serde::{Deserialize, Serialize};

use super::entity::{Entity, Relation};
use super::kinds::{Cardinality, EntityKind, RelationSpec};
use super::types::{Handle, Loaded};
use crate::errors::SyncError;

/// Arena of entities addressed by [`Handle`].
///
/// Callers build a graph, submit it together with the handles of its roots
/// and get back the stored identifiers per handle. The engine never touches
/// the caller's arena; it works on its own copy.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityGraph {
    nodes: Vec<Entity>,
}

impl EntityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn add(&mut self, entity: Entity) -> Handle {
        self.nodes.push(entity);
        Handle(self.nodes.len() - 1)
    }

    pub fn get(&self, handle: Handle) -> Option<&Entity> {
        self.nodes.get(handle.0)
    }

    pub fn entity(&self, handle: Handle) -> Result<&Entity, SyncError> {
        self.nodes
            .get(handle.0)
            .ok_or_else(|| SyncError::invalid_graph(format!("dangling handle {handle}")))
    }

    pub fn entity_mut(&mut self, handle: Handle) -> Result<&mut Entity, SyncError> {
        self.nodes
            .get_mut(handle.0)
            .ok_or_else(|| SyncError::invalid_graph(format!("dangling handle {handle}")))
    }

    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        (0..self.nodes.len()).map(Handle)
    }

    /// Adds `child` to the owned collection `relation` of `parent`.
    pub fn add_child(
        &mut self,
        parent: Handle,
        relation: &str,
        mut child: Entity,
    ) -> Result<Handle, SyncError> {
        let spec = self.spec(parent, relation, Cardinality::Many)?;
        if !spec.owned {
            return Err(SyncError::invalid_graph(format!(
                "{relation} is not an owned collection"
            )));
        }
        check_target(spec, child.kind)?;
        if !self.entity(parent)?.is_realized() {
            return Err(SyncError::invalid_graph(format!(
                "{parent} is a hollow reference"
            )));
        }
        child.parent = Some(parent);
        let handle = self.add(child);
        self.append(parent, relation, handle)?;
        Ok(handle)
    }

    /// Sets a single-valued relation; `None` clears it explicitly.
    pub fn link(
        &mut self,
        from: Handle,
        relation: &str,
        to: Option<Handle>,
    ) -> Result<(), SyncError> {
        let spec = self.spec(from, relation, Cardinality::One)?;
        if let Some(to) = to {
            check_target(spec, self.entity(to)?.kind)?;
        }
        self.set_relation(from, relation, Relation::One(to))
    }

    /// Appends a reference to a non-owned collection.
    pub fn push(&mut self, from: Handle, relation: &str, to: Handle) -> Result<(), SyncError> {
        let spec = self.spec(from, relation, Cardinality::Many)?;
        if spec.owned {
            return Err(SyncError::invalid_graph(format!(
                "{relation} is owned; use add_child"
            )));
        }
        check_target(spec, self.entity(to)?.kind)?;
        self.append(from, relation, to)
    }

    /// Declares a collection as not fetched, so that merges leave the stored
    /// side untouched.
    pub fn mark_not_loaded(&mut self, handle: Handle, relation: &str) -> Result<(), SyncError> {
        self.spec(handle, relation, Cardinality::Many)?;
        self.set_relation(handle, relation, Relation::Many(Loaded::NotLoaded))
    }

    /// Declares a collection as loaded and empty.
    pub fn clear(&mut self, handle: Handle, relation: &str) -> Result<(), SyncError> {
        self.spec(handle, relation, Cardinality::Many)?;
        self.set_relation(handle, relation, Relation::Many(Loaded::Loaded(Vec::new())))
    }

    /// Relation name and index under which `child` is listed by `parent`.
    pub fn position_in_parent(&self, parent: Handle, child: Handle) -> Option<(String, usize)> {
        let relations = self.get(parent)?.relations.get()?;
        relations.iter().find_map(|(name, relation)| match relation {
            Relation::Many(Loaded::Loaded(members)) => members
                .iter()
                .position(|member| *member == child)
                .map(|position| (name.clone(), position)),
            _ => None,
        })
    }

    pub(crate) fn set_relation(
        &mut self,
        handle: Handle,
        name: &str,
        relation: Relation,
    ) -> Result<(), SyncError> {
        let entity = self.entity_mut(handle)?;
        match &mut entity.relations {
            Loaded::Loaded(relations) => {
                relations.insert(name.to_string(), relation);
                Ok(())
            }
            Loaded::NotLoaded => Err(SyncError::invalid_graph(format!(
                "{} {handle} is a hollow reference",
                entity.kind
            ))),
        }
    }

    fn append(&mut self, from: Handle, name: &str, to: Handle) -> Result<(), SyncError> {
        let entity = self.entity_mut(from)?;
        let kind = entity.kind;
        let Loaded::Loaded(relations) = &mut entity.relations else {
            return Err(SyncError::invalid_graph(format!(
                "{kind} {from} is a hollow reference"
            )));
        };
        let slot = relations
            .entry(name.to_string())
            .or_insert_with(|| Relation::Many(Loaded::Loaded(Vec::new())));
        match slot {
            Relation::Many(Loaded::Loaded(members)) => {
                if !members.contains(&to) {
                    members.push(to);
                }
                Ok(())
            }
            Relation::Many(Loaded::NotLoaded) => Err(SyncError::invalid_graph(format!(
                "{kind}.{name} is marked as not loaded"
            ))),
            Relation::One(_) => Err(SyncError::invalid_graph(format!(
                "{kind}.{name} is single-valued"
            ))),
        }
    }

    fn spec(
        &self,
        handle: Handle,
        name: &str,
        cardinality: Cardinality,
    ) -> Result<&'static RelationSpec, SyncError> {
        let kind = self.entity(handle)?.kind;
        match kind.relation(name) {
            Some(spec) if spec.cardinality == cardinality => Ok(spec),
            Some(_) => Err(SyncError::invalid_graph(format!(
                "{kind}.{name} is not {cardinality:?}-valued"
            ))),
            None => Err(SyncError::invalid_graph(format!(
                "{kind} has no relation {name}"
            ))),
        }
    }
}

fn check_target(spec: &RelationSpec, kind: EntityKind) -> Result<(), SyncError> {
    if spec.target != kind {
        return Err(SyncError::invalid_graph(format!(
            "{} expects {}, got {kind}",
            spec.name, spec.target
        )));
    }
    Ok(())
}
