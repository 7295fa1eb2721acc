//! Entity model: kinds, relation tables and the handle-addressed graph arena.

mod entity;
mod graph;
mod kinds;
mod types;

pub use entity::{Entity, Relation};
pub use graph::EntityGraph;
pub use kinds::{Cardinality, EntityKind, RelationSpec, attribute, relation};
pub use types::{EntityId, Handle, Loaded, SessionToken};
