use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::EntityKind;

/// Per-kind counters of what a synchronization did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub inserted: BTreeMap<EntityKind, u64>,
    pub updated: BTreeMap<EntityKind, u64>,
    pub duplicates: BTreeMap<EntityKind, u64>,
    /// Identified entities that were not tracked by the store and had to be reloaded.
    pub transient: BTreeMap<EntityKind, u64>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_insert(&mut self, kind: EntityKind) {
        *self.inserted.entry(kind).or_default() += 1;
    }

    pub fn record_update(&mut self, kind: EntityKind) {
        *self.updated.entry(kind).or_default() += 1;
    }

    pub fn record_duplicate(&mut self, kind: EntityKind) {
        *self.duplicates.entry(kind).or_default() += 1;
    }

    pub fn record_transient(&mut self, kind: EntityKind) {
        *self.transient.entry(kind).or_default() += 1;
    }

    pub fn inserted(&self, kind: EntityKind) -> u64 {
        self.inserted.get(&kind).copied().unwrap_or_default()
    }

    pub fn updated(&self, kind: EntityKind) -> u64 {
        self.updated.get(&kind).copied().unwrap_or_default()
    }

    pub fn duplicates(&self, kind: EntityKind) -> u64 {
        self.duplicates.get(&kind).copied().unwrap_or_default()
    }

    pub fn transient(&self, kind: EntityKind) -> u64 {
        self.transient.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_inserted(&self) -> u64 {
        self.inserted.values().sum()
    }

    pub fn total_updated(&self) -> u64 {
        self.updated.values().sum()
    }

    pub fn total_duplicates(&self) -> u64 {
        self.duplicates.values().sum()
    }

    pub fn total_transient(&self) -> u64 {
        self.transient.values().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty()
            && self.updated.is_empty()
            && self.duplicates.is_empty()
            && self.transient.is_empty()
    }

    /// Adds the counters of `other` to this instance.
    pub fn absorb(&mut self, other: &Statistics) {
        fn add(into: &mut BTreeMap<EntityKind, u64>, from: &BTreeMap<EntityKind, u64>) {
            for (kind, count) in from {
                *into.entry(*kind).or_default() += count;
            }
        }
        add(&mut self.inserted, &other.inserted);
        add(&mut self.updated, &other.updated);
        add(&mut self.duplicates, &other.duplicates);
        add(&mut self.transient, &other.transient);
    }

    pub fn reset(&mut self) {
        self.inserted.clear();
        self.updated.clear();
        self.duplicates.clear();
        self.transient.clear();
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "inserted={} updated={} duplicates={} transient={}",
            self.total_inserted(),
            self.total_updated(),
            self.total_duplicates(),
            self.total_transient()
        )
    }
}
