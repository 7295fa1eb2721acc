use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StoreError;
use crate::model::{EntityId, EntityKind, SessionToken};

/// Stored value of one relation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoredRelation {
    One(Option<EntityId>),
    Many(Vec<EntityId>),
}

/// Where a scoped record sits inside its owner.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentLink {
    pub id: EntityId,
    pub relation: String,
    pub position: usize,
}

/// Flat, identifier-based form of an entity as the store sees it.
///
/// `links` holds every relation of the kind when read from the store; when
/// written, only the non-owned relations present are rewritten. Owned
/// collections are derived from the children's parent links.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: EntityId,
    pub kind: EntityKind,
    pub short_label: String,
    pub identity: Option<String>,
    pub parent: Option<ParentLink>,
    pub attributes: BTreeMap<String, Value>,
    pub links: BTreeMap<String, StoredRelation>,
    #[serde(skip)]
    pub session: SessionToken,
}

impl Record {
    pub fn one(&self, relation: &str) -> Option<EntityId> {
        match self.links.get(relation)? {
            StoredRelation::One(target) => *target,
            StoredRelation::Many(_) => None,
        }
    }

    pub fn many(&self, relation: &str) -> &[EntityId] {
        match self.links.get(relation) {
            Some(StoredRelation::Many(targets)) => targets,
            _ => &[],
        }
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }
}

pub(crate) fn validate_record(record: &Record) -> Result<(), StoreError> {
    if !record.kind.is_scoped() && record.short_label.trim().is_empty() {
        return Err(StoreError::invalid_input(format!(
            "{} short label must not be empty",
            record.kind
        )));
    }
    for (name, value) in &record.links {
        let Some(spec) = record.kind.relation(name) else {
            return Err(StoreError::invalid_input(format!(
                "{} has no relation {name}",
                record.kind
            )));
        };
        if spec.owned {
            return Err(StoreError::invalid_input(format!(
                "{}.{name} is owned and cannot be written as links",
                record.kind
            )));
        }
        let matches_cardinality = matches!(
            (spec.cardinality, value),
            (crate::model::Cardinality::One, StoredRelation::One(_))
                | (crate::model::Cardinality::Many, StoredRelation::Many(_))
        );
        if !matches_cardinality {
            return Err(StoreError::invalid_input(format!(
                "{}.{name} has the wrong cardinality",
                record.kind
            )));
        }
    }
    Ok(())
}
