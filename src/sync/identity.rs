use std::collections::BTreeMap;
use std::fmt;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::SyncError;
use crate::model::{Entity, EntityGraph, EntityId, EntityKind, Handle, attribute, relation};

/// Content-derived identity of an entity within one batch.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub(crate) fn stored(id: EntityId) -> Self {
        IdentityKey(format!("id:{id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Keys derived from a stored identifier rather than from content.
    pub fn is_stored(&self) -> bool {
        self.0.starts_with("id:")
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Attributes the store can match a record on, in canonical order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyingAttributes {
    kind: EntityKind,
    fields: BTreeMap<String, String>,
}

impl IdentifyingAttributes {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.insert(name.to_string(), value.into());
        self
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// `k=v;k=v` sorted by name; this is what the store keeps as identity.
    pub fn canonical(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Computes and caches identity keys for the entities of one graph.
///
/// Two caches are kept: the batch key (`key_for`), which prefers a stored
/// identifier, and the content key, which never does unless the entity is
/// hollow. Comparisons between a submitted entity and a stored counterpart
/// go through content keys.
#[derive(Debug, Default)]
pub struct IdentityKeyBuilder {
    keys: AHashMap<Handle, IdentityKey>,
    content: AHashMap<Handle, IdentityKey>,
    resolving_keys: AHashSet<Handle>,
    resolving_content: AHashSet<Handle>,
}

impl IdentityKeyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_for(
        &mut self,
        graph: &EntityGraph,
        handle: Handle,
    ) -> Result<IdentityKey, SyncError> {
        let entity = graph.entity(handle)?;
        if let Some(id) = entity.id {
            return Ok(IdentityKey::stored(id));
        }
        if let Some(key) = self.keys.get(&handle) {
            return Ok(key.clone());
        }
        if !self.resolving_keys.insert(handle) {
            return Err(cycle(entity, handle));
        }
        let key = if entity.kind.is_scoped() {
            self.scoped_key(graph, entity, handle, Self::key_for)
        } else {
            self.content_key(graph, handle)
        };
        self.resolving_keys.remove(&handle);
        let key = key?;
        self.keys.insert(handle, key.clone());
        Ok(key)
    }

    pub fn content_key(
        &mut self,
        graph: &EntityGraph,
        handle: Handle,
    ) -> Result<IdentityKey, SyncError> {
        if let Some(key) = self.content.get(&handle) {
            return Ok(key.clone());
        }
        let entity = graph.entity(handle)?;
        let key = if let Some(identity) = &entity.stored_identity {
            IdentityKey(format!("{}:{identity}", entity.kind))
        } else if !entity.is_realized() {
            match entity.id {
                Some(id) => IdentityKey::stored(id),
                None => {
                    return Err(SyncError::invalid_graph(format!(
                        "{} {handle} has neither content nor identifier",
                        entity.kind
                    )));
                }
            }
        } else {
            if !self.resolving_content.insert(handle) {
                return Err(cycle(entity, handle));
            }
            let key = if entity.kind.is_scoped() {
                self.scoped_key(graph, entity, handle, Self::content_key)
            } else {
                self.identifying_attributes(graph, handle)
                    .map(|attributes| IdentityKey(format!("{}:{}", entity.kind, attributes.canonical())))
            };
            self.resolving_content.remove(&handle);
            key?
        };
        self.content.insert(handle, key.clone());
        Ok(key)
    }

    /// Identifying attributes of a realized entity; scoped kinds report
    /// their local key only.
    pub fn identifying_attributes(
        &mut self,
        graph: &EntityGraph,
        handle: Handle,
    ) -> Result<IdentifyingAttributes, SyncError> {
        let entity = graph.entity(handle)?;
        let attributes = IdentifyingAttributes::new(entity.kind);
        let attributes = match entity.kind {
            EntityKind::Institution | EntityKind::Experiment => {
                attributes.with("label", label(entity))
            }
            EntityKind::CvTerm => {
                let term = find_xref(graph, entity, |_, qualifier| {
                    qualifier == attribute::IDENTITY_QUALIFIER
                })?
                .and_then(|xref| xref.attribute_str(attribute::PRIMARY_ID))
                .unwrap_or_else(|| label(entity));
                attributes
                    .with("class", entity.attribute_str(attribute::CV_CLASS).unwrap_or_default())
                    .with("term", term)
            }
            EntityKind::BioSource => match entity.attribute_str(attribute::TAXID) {
                Some(taxid) => attributes.with("taxid", taxid),
                None => attributes.with("label", label(entity)),
            },
            EntityKind::Publication => {
                let pubmed = find_xref(graph, entity, |database, qualifier| {
                    database == attribute::PUBMED
                        && qualifier == attribute::PRIMARY_REFERENCE_QUALIFIER
                })?;
                match pubmed.and_then(|xref| xref.attribute_str(attribute::PRIMARY_ID)) {
                    Some(pubmed) => attributes.with("pubmed", pubmed),
                    None => attributes.with("label", label(entity)),
                }
            }
            EntityKind::Interactor => {
                let identity = find_xref(graph, entity, |_, qualifier| {
                    qualifier == attribute::IDENTITY_QUALIFIER
                })?
                .map(|xref| {
                    format!(
                        "{}:{}",
                        xref.attribute_str(attribute::DATABASE).unwrap_or_default(),
                        xref.attribute_str(attribute::PRIMARY_ID).unwrap_or_default()
                    )
                })
                .unwrap_or_else(|| label(entity));
                let organism = self.optional_content(graph, entity.one(relation::ORGANISM))?;
                attributes.with("identity", identity).with("organism", organism)
            }
            EntityKind::Interaction => attributes.with("checksum", self.checksum(graph, handle)?),
            EntityKind::Participant
            | EntityKind::Feature
            | EntityKind::Xref
            | EntityKind::Alias
            | EntityKind::Annotation => attributes.with("local", self.local_key(graph, handle)?),
        };
        Ok(attributes)
    }

    /// Key of a scoped entity relative to its parent.
    pub fn local_key(&mut self, graph: &EntityGraph, handle: Handle) -> Result<String, SyncError> {
        let entity = graph.entity(handle)?;
        let field = |name: &str| entity.attribute_str(name).unwrap_or_default();
        let key = match entity.kind {
            EntityKind::Participant => {
                let descriptor = self.participant_descriptor(graph, handle)?;
                let ordinal = self.participant_ordinal(graph, handle, &descriptor)?;
                format!("participant:{descriptor}#{ordinal}")
            }
            EntityKind::Feature => {
                let feature_type = self.optional_content(graph, entity.one(relation::FEATURE_TYPE))?;
                format!("feature:{}|{feature_type}", label(entity))
            }
            EntityKind::Xref => format!(
                "xref:{}:{}:{}",
                field(attribute::DATABASE),
                field(attribute::PRIMARY_ID),
                field(attribute::QUALIFIER)
            ),
            EntityKind::Alias => format!(
                "alias:{}:{}",
                field(attribute::ALIAS_TYPE),
                field(attribute::NAME)
            ),
            EntityKind::Annotation => format!(
                "annotation:{}:{}",
                field(attribute::TOPIC),
                field(attribute::TEXT)
            ),
            other => {
                return Err(SyncError::invalid_graph(format!(
                    "{other} is not a scoped kind"
                )));
            }
        };
        Ok(key)
    }

    /// Drops cached keys of an entity and its owned subtree, after it moved
    /// to another parent.
    pub fn forget_subtree(&mut self, graph: &EntityGraph, handle: Handle) -> Result<(), SyncError> {
        self.keys.remove(&handle);
        self.content.remove(&handle);
        let entity = graph.entity(handle)?;
        for spec in entity.kind.relations().iter().filter(|spec| spec.owned) {
            for child in entity.many(spec.name).unwrap_or(&[]) {
                self.forget_subtree(graph, *child)?;
            }
        }
        Ok(())
    }

    fn scoped_key(
        &mut self,
        graph: &EntityGraph,
        entity: &Entity,
        handle: Handle,
        parent_key: fn(&mut Self, &EntityGraph, Handle) -> Result<IdentityKey, SyncError>,
    ) -> Result<IdentityKey, SyncError> {
        let parent = entity.parent.ok_or_else(|| {
            SyncError::invalid_graph(format!("{} {handle} has no parent", entity.kind))
        })?;
        let parent = parent_key(self, graph, parent)?;
        let local = self.local_key(graph, handle)?;
        Ok(IdentityKey(format!("{parent}::{local}")))
    }

    /// Order-independent digest of what makes an interaction the same
    /// interaction: its type, experiments and participants.
    fn checksum(&mut self, graph: &EntityGraph, handle: Handle) -> Result<String, SyncError> {
        let entity = graph.entity(handle)?;
        let interaction_type = self.optional_content(graph, entity.one(relation::INTERACTION_TYPE))?;

        let mut experiments = Vec::new();
        for experiment in entity.many(relation::EXPERIMENTS).unwrap_or(&[]) {
            experiments.push(self.content_key(graph, *experiment)?.0);
        }
        experiments.sort();

        let mut participants = Vec::new();
        for participant in entity.many(relation::PARTICIPANTS).unwrap_or(&[]) {
            participants.push(self.participant_descriptor(graph, *participant)?);
        }
        participants.sort();

        let canonical = format!(
            "type={interaction_type}\nexperiments={}\nparticipants={}",
            experiments.join(","),
            participants.join(";")
        );
        Ok(format!("{:x}", Sha256::digest(canonical.as_bytes())))
    }

    fn participant_descriptor(
        &mut self,
        graph: &EntityGraph,
        handle: Handle,
    ) -> Result<String, SyncError> {
        let entity = graph.entity(handle)?;
        let interactor = self.optional_content(graph, entity.one(relation::INTERACTOR))?;
        let experimental = self.optional_content(graph, entity.one(relation::EXPERIMENTAL_ROLE))?;
        let biological = self.optional_content(graph, entity.one(relation::BIOLOGICAL_ROLE))?;
        Ok(format!("{interactor}|{experimental}|{biological}"))
    }

    /// Position among siblings with the same descriptor, so that homodimer
    /// participants get distinct keys.
    fn participant_ordinal(
        &mut self,
        graph: &EntityGraph,
        handle: Handle,
        descriptor: &str,
    ) -> Result<usize, SyncError> {
        let Some(parent) = graph.entity(handle)?.parent else {
            return Ok(0);
        };
        let siblings = graph
            .entity(parent)?
            .many(relation::PARTICIPANTS)
            .unwrap_or(&[]);
        let mut ordinal = 0;
        for sibling in siblings {
            if *sibling == handle {
                break;
            }
            if self.participant_descriptor(graph, *sibling)? == descriptor {
                ordinal += 1;
            }
        }
        Ok(ordinal)
    }

    fn optional_content(
        &mut self,
        graph: &EntityGraph,
        handle: Option<Handle>,
    ) -> Result<String, SyncError> {
        match handle {
            Some(handle) => Ok(self.content_key(graph, handle)?.0),
            None => Ok("-".to_string()),
        }
    }
}

fn label(entity: &Entity) -> String {
    entity.short_label.trim().to_lowercase()
}

fn cycle(entity: &Entity, handle: Handle) -> SyncError {
    SyncError::invalid_graph(format!(
        "identity of {} {handle} depends on itself",
        entity.kind
    ))
}

/// First xref of `entity` whose database and qualifier satisfy `matches`.
fn find_xref<'g>(
    graph: &'g EntityGraph,
    entity: &Entity,
    matches: impl Fn(&str, &str) -> bool,
) -> Result<Option<&'g Entity>, SyncError> {
    for handle in entity.many(relation::XREFS).unwrap_or(&[]) {
        let xref = graph.entity(*handle)?;
        let database = xref.attribute_str(attribute::DATABASE).unwrap_or_default();
        let qualifier = xref.attribute_str(attribute::QUALIFIER).unwrap_or_default();
        if matches(&database, &qualifier) {
            return Ok(Some(xref));
        }
    }
    Ok(None)
}
