use ahash::AHashSet;
use tracing::trace;

use super::identity::IdentityKeyBuilder;
use crate::errors::SyncError;
use crate::model::{
    Cardinality, Entity, EntityGraph, EntityKind, Handle, Loaded, Relation, RelationSpec,
    attribute,
};

/// What a merge touched.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Entities whose own state changed and need an update.
    pub dirty: Vec<Handle>,
    /// Submitted scoped children moved under the stored owner; they are new.
    pub adopted: Vec<Handle>,
    /// Stored scoped children dropped from a loaded collection; their parent
    /// link was cleared and they need an update.
    pub detached: Vec<Handle>,
    /// Submitted scoped children merged into a stored child, as
    /// `(submitted, stored)`.
    pub matched: Vec<(Handle, Handle)>,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        !self.dirty.is_empty() || !self.detached.is_empty()
    }
}

/// Reconciles a submitted entity (source) into its stored counterpart (target).
///
/// Rules:
/// - an attribute missing from the source leaves the target value alone; an
///   explicit JSON `null` removes it;
/// - a relation missing from the source, or a collection marked
///   [`Loaded::NotLoaded`], is left untouched;
/// - a loaded collection is authoritative: owned children are matched on
///   their local key and merged recursively, unmatched source children are
///   adopted, unmatched target children are detached;
/// - clearing a significant relation, or dropping the identity xref, fails
///   with [`SyncError::InvalidMerge`] before anything is written.
#[derive(Debug, Default)]
pub struct StateMerger;

impl StateMerger {
    pub fn new() -> Self {
        Self
    }

    pub fn merge(
        &self,
        keys: &mut IdentityKeyBuilder,
        graph: &mut EntityGraph,
        source: Handle,
        target: Handle,
    ) -> Result<MergeReport, SyncError> {
        let mut report = MergeReport::default();
        self.merge_into(keys, graph, source, target, &mut report)?;
        Ok(report)
    }

    /// Same stored record: equal ids when both have one, equal content keys otherwise.
    pub fn same_record(
        &self,
        keys: &mut IdentityKeyBuilder,
        graph: &EntityGraph,
        a: Handle,
        b: Handle,
    ) -> Result<bool, SyncError> {
        if a == b {
            return Ok(true);
        }
        let (left, right) = (graph.entity(a)?, graph.entity(b)?);
        if left.kind != right.kind {
            return Ok(false);
        }
        if let (Some(x), Some(y)) = (left.id, right.id) {
            return Ok(x == y);
        }
        Ok(keys.content_key(graph, a)? == keys.content_key(graph, b)?)
    }

    fn merge_into(
        &self,
        keys: &mut IdentityKeyBuilder,
        graph: &mut EntityGraph,
        source: Handle,
        target: Handle,
        report: &mut MergeReport,
    ) -> Result<(), SyncError> {
        if source == target {
            return Ok(());
        }
        let incoming = graph.entity(source)?.clone();
        let stored = graph.entity(target)?.clone();
        if incoming.kind != stored.kind {
            return Err(SyncError::invalid_graph(format!(
                "cannot merge {} {source} into {} {target}",
                incoming.kind, stored.kind
            )));
        }
        let Loaded::Loaded(mut relations) = stored.relations.clone() else {
            return Err(SyncError::invalid_graph(format!(
                "{} {target} is a hollow reference",
                stored.kind
            )));
        };

        let mut changed = false;
        let mut short_label = stored.short_label.clone();
        if !incoming.short_label.is_empty() && incoming.short_label != stored.short_label {
            short_label = incoming.short_label.clone();
            changed = true;
        }
        let mut attributes = stored.attributes.clone();
        for (name, value) in &incoming.attributes {
            if value.is_null() {
                changed |= attributes.remove(name).is_some();
            } else if attributes.get(name) != Some(value) {
                attributes.insert(name.clone(), value.clone());
                changed = true;
            }
        }

        if let Loaded::Loaded(submitted) = &incoming.relations {
            for spec in incoming.kind.relations() {
                let Some(relation) = submitted.get(spec.name) else {
                    continue;
                };
                match (spec.cardinality, relation) {
                    (Cardinality::One, Relation::One(value)) => {
                        let current = match relations.get(spec.name) {
                            Some(Relation::One(current)) => *current,
                            _ => None,
                        };
                        match (*value, current) {
                            (None, None) => {}
                            (None, Some(_)) => {
                                if spec.significant {
                                    return Err(SyncError::InvalidMerge {
                                        kind: stored.kind,
                                        target: describe(&stored, target),
                                        relation: spec.name.to_string(),
                                    });
                                }
                                relations.insert(spec.name.to_string(), Relation::One(None));
                                changed = true;
                            }
                            (Some(new), Some(old)) if self.same_record(keys, graph, new, old)? => {}
                            (Some(new), _) => {
                                relations.insert(spec.name.to_string(), Relation::One(Some(new)));
                                changed = true;
                            }
                        }
                    }
                    (Cardinality::Many, Relation::Many(Loaded::NotLoaded)) => {}
                    (Cardinality::Many, Relation::Many(Loaded::Loaded(members))) => {
                        let current = match relations.get(spec.name) {
                            Some(Relation::Many(Loaded::Loaded(current))) => current.clone(),
                            _ => Vec::new(),
                        };
                        let merged = if spec.owned {
                            self.merge_owned(keys, graph, spec, &stored, target, members, &current, report)?
                        } else {
                            self.merge_references(keys, graph, members, &current)?
                        };
                        if merged != current {
                            relations.insert(
                                spec.name.to_string(),
                                Relation::Many(Loaded::Loaded(merged)),
                            );
                            changed = true;
                        }
                    }
                    _ => {
                        return Err(SyncError::invalid_graph(format!(
                            "{}.{} has the wrong cardinality",
                            incoming.kind, spec.name
                        )));
                    }
                }
            }
        }

        let entity = graph.entity_mut(target)?;
        entity.short_label = short_label;
        entity.attributes = attributes;
        entity.relations = Loaded::Loaded(relations);
        if changed {
            trace!(kind = %stored.kind, %target, "merge changed state");
            report.dirty.push(target);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn merge_owned(
        &self,
        keys: &mut IdentityKeyBuilder,
        graph: &mut EntityGraph,
        spec: &RelationSpec,
        owner: &Entity,
        target: Handle,
        incoming: &[Handle],
        current: &[Handle],
        report: &mut MergeReport,
    ) -> Result<Vec<Handle>, SyncError> {
        let mut existing = Vec::with_capacity(current.len());
        for child in current {
            existing.push((keys.local_key(graph, *child)?, *child));
        }
        let mut matched = AHashSet::new();
        let mut merged = Vec::with_capacity(incoming.len());
        for child in incoming {
            let local = keys.local_key(graph, *child)?;
            let counterpart = existing
                .iter()
                .find(|(key, handle)| *key == local && !matched.contains(handle))
                .map(|(_, handle)| *handle);
            match counterpart {
                Some(stored_child) => {
                    matched.insert(stored_child);
                    report.matched.push((*child, stored_child));
                    self.merge_into(keys, graph, *child, stored_child, report)?;
                    merged.push(stored_child);
                }
                None => {
                    graph.entity_mut(*child)?.parent = Some(target);
                    keys.forget_subtree(graph, *child)?;
                    report.adopted.push(*child);
                    merged.push(*child);
                }
            }
        }
        for (_, stored_child) in &existing {
            if matched.contains(stored_child) {
                continue;
            }
            check_removable(graph, owner, target, spec, *stored_child)?;
            graph.entity_mut(*stored_child)?.parent = None;
            report.detached.push(*stored_child);
        }
        Ok(merged)
    }

    fn merge_references(
        &self,
        keys: &mut IdentityKeyBuilder,
        graph: &EntityGraph,
        incoming: &[Handle],
        current: &[Handle],
    ) -> Result<Vec<Handle>, SyncError> {
        let mut merged = Vec::with_capacity(incoming.len());
        for member in incoming {
            let mut kept = *member;
            for existing in current {
                if self.same_record(keys, graph, *member, *existing)? {
                    kept = *existing;
                    break;
                }
            }
            if !merged.contains(&kept) {
                merged.push(kept);
            }
        }
        Ok(merged)
    }
}

/// Dropping the xref that carries a record's identity would leave it
/// unidentifiable.
fn check_removable(
    graph: &EntityGraph,
    owner: &Entity,
    target: Handle,
    spec: &RelationSpec,
    child: Handle,
) -> Result<(), SyncError> {
    let child = graph.entity(child)?;
    let identity_xref = child.kind == EntityKind::Xref
        && child.attribute_str(attribute::QUALIFIER).as_deref()
            == Some(attribute::IDENTITY_QUALIFIER);
    if identity_xref {
        return Err(SyncError::InvalidMerge {
            kind: owner.kind,
            target: describe(owner, target),
            relation: format!("{} (identity xref)", spec.name),
        });
    }
    Ok(())
}

fn describe(entity: &Entity, handle: Handle) -> String {
    match entity.id {
        Some(id) => format!("{} '{}' (id {id})", entity.kind, entity.short_label),
        None => format!("{} '{}' ({handle})", entity.kind, entity.short_label),
    }
}
