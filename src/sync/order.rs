use std::cmp::Ordering;

use crate::model::EntityKind;

/// Write order for a batch: referenced records before the records that
/// point at them, parents before their scoped children.
pub struct PersistenceOrderPolicy;

impl PersistenceOrderPolicy {
    /// Higher values are persisted first.
    pub fn priority(kind: EntityKind) -> u8 {
        match kind {
            EntityKind::Institution => 100,
            EntityKind::CvTerm => 90,
            EntityKind::BioSource => 80,
            EntityKind::Publication => 70,
            EntityKind::Experiment => 60,
            EntityKind::Interactor => 50,
            EntityKind::Interaction => 40,
            EntityKind::Participant => 30,
            EntityKind::Feature => 20,
            EntityKind::Xref | EntityKind::Alias | EntityKind::Annotation => 10,
        }
    }

    pub fn compare(a: EntityKind, b: EntityKind) -> Ordering {
        Self::priority(b).cmp(&Self::priority(a))
    }

    /// Stable sort, so equal priorities keep their discovery order.
    pub fn sort<T>(items: &mut [T], kind_of: impl Fn(&T) -> EntityKind) {
        items.sort_by(|a, b| Self::compare(kind_of(a), kind_of(b)));
    }
}
