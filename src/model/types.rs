use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier assigned by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub i64);

impl EntityId {
    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId(value)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable slot of an entity inside an [`EntityGraph`](super::EntityGraph).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(pub(crate) usize);

impl Handle {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Store session in which a record was loaded. Records loaded in an older
/// session are no longer tracked by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SessionToken(pub(crate) u64);

/// Relation state that distinguishes "known to be empty" from "never fetched".
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Loaded<T> {
    Loaded(T),
    NotLoaded,
}

impl<T> Loaded<T> {
    pub fn is_loaded(&self) -> bool {
        matches!(self, Loaded::Loaded(_))
    }

    pub fn get(&self) -> Option<&T> {
        match self {
            Loaded::Loaded(value) => Some(value),
            Loaded::NotLoaded => None,
        }
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Loaded::Loaded(value) => Some(value),
            Loaded::NotLoaded => None,
        }
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            Loaded::Loaded(value) => Some(value),
            Loaded::NotLoaded => None,
        }
    }
}
