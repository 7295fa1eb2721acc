use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::kinds::{EntityKind, attribute};
use super::types::{EntityId, Handle, Loaded, SessionToken};

/// Value of one relation slot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    One(Option<Handle>),
    Many(Loaded<Vec<Handle>>),
}

impl Relation {
    /// Handles referenced by this relation; empty when the collection was not loaded.
    pub fn handles(&self) -> Vec<Handle> {
        match self {
            Relation::One(target) => target.iter().copied().collect(),
            Relation::Many(Loaded::Loaded(targets)) => targets.clone(),
            Relation::Many(Loaded::NotLoaded) => Vec::new(),
        }
    }
}

/// A node of a submitted or materialized graph.
///
/// An entity whose `relations` are [`Loaded::NotLoaded`] is a hollow
/// reference: it stands for a stored record without carrying its state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default)]
    pub id: Option<EntityId>,
    pub kind: EntityKind,
    #[serde(default)]
    pub short_label: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
    pub relations: Loaded<BTreeMap<String, Relation>>,
    #[serde(default)]
    pub parent: Option<Handle>,
    /// Identifying attributes recorded by the store, used as the content
    /// key of hollow references.
    #[serde(default)]
    pub stored_identity: Option<String>,
    #[serde(skip)]
    pub(crate) session: Option<SessionToken>,
}

impl Entity {
    pub fn new(kind: EntityKind, short_label: impl Into<String>) -> Self {
        Self {
            id: None,
            kind,
            short_label: short_label.into(),
            attributes: BTreeMap::new(),
            relations: Loaded::Loaded(BTreeMap::new()),
            parent: None,
            stored_identity: None,
            session: None,
        }
    }

    /// Hollow reference to a stored record.
    pub fn reference(kind: EntityKind, id: EntityId) -> Self {
        Self {
            id: Some(id),
            kind,
            short_label: String::new(),
            attributes: BTreeMap::new(),
            relations: Loaded::NotLoaded,
            parent: None,
            stored_identity: None,
            session: None,
        }
    }

    pub fn xref(database: &str, primary_id: &str, qualifier: Option<&str>) -> Self {
        let mut xref = Entity::new(EntityKind::Xref, primary_id)
            .with_attribute(attribute::DATABASE, database)
            .with_attribute(attribute::PRIMARY_ID, primary_id);
        if let Some(qualifier) = qualifier {
            xref = xref.with_attribute(attribute::QUALIFIER, qualifier);
        }
        xref
    }

    pub fn alias(alias_type: &str, name: &str) -> Self {
        Entity::new(EntityKind::Alias, name)
            .with_attribute(attribute::ALIAS_TYPE, alias_type)
            .with_attribute(attribute::NAME, name)
    }

    pub fn annotation(topic: &str, text: &str) -> Self {
        Entity::new(EntityKind::Annotation, topic)
            .with_attribute(attribute::TOPIC, topic)
            .with_attribute(attribute::TEXT, text)
    }

    pub fn bio_source(short_label: &str, taxid: i64) -> Self {
        Entity::new(EntityKind::BioSource, short_label).with_attribute(attribute::TAXID, taxid)
    }

    pub fn cv_term(cv_class: &str, short_label: &str) -> Self {
        Entity::new(EntityKind::CvTerm, short_label).with_attribute(attribute::CV_CLASS, cv_class)
    }

    pub fn with_id(mut self, id: EntityId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.attributes.insert(name.to_string(), value.into());
        self
    }

    /// Entities with loaded relations carry state the engine can act on.
    pub fn is_realized(&self) -> bool {
        self.relations.is_loaded()
    }

    /// Attribute rendered as text; numbers and booleans are stringified.
    pub fn attribute_str(&self, name: &str) -> Option<String> {
        match self.attributes.get(name)? {
            Value::Null => None,
            Value::String(text) => Some(text.trim().to_string()),
            other => Some(other.to_string()),
        }
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get()?.get(name)
    }

    pub fn one(&self, name: &str) -> Option<Handle> {
        match self.relation(name)? {
            Relation::One(target) => *target,
            Relation::Many(_) => None,
        }
    }

    /// Loaded collection members, or `None` when absent or not loaded.
    pub fn many(&self, name: &str) -> Option<&[Handle]> {
        match self.relation(name)? {
            Relation::Many(Loaded::Loaded(targets)) => Some(targets.as_slice()),
            _ => None,
        }
    }
}
