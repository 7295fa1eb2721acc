//! Entity graph synchronization and deduplication for molecular-interaction
//! curation records, persisted in SQLite.
//!
//! Build an [`EntityGraph`], hand it to [`SyncEngine::synchronize`] with the
//! handles of its roots, and read back the stored identifiers. New records
//! are inserted in dependency order, records already present are reused or
//! updated, and nothing is written when any part of the batch fails.
//!
//! ```rust
//! use interactsync::{Entity, EntityGraph, EntityKind, SqliteStore, SyncEngine, relation};
//!
//! let mut graph = EntityGraph::new();
//! let human = graph.add(Entity::bio_source("human", 9606));
//! let p53 = graph.add(Entity::new(EntityKind::Interactor, "p53_human"));
//! graph.link(p53, relation::ORGANISM, Some(human))?;
//!
//! let mut engine = SyncEngine::new(SqliteStore::open_in_memory()?);
//! let result = engine.synchronize(&graph, &[p53])?;
//! assert_eq!(result.statistics.inserted(EntityKind::Interactor), 1);
//! assert!(result.id_of(human).is_some());
//! # Ok::<(), interactsync::SyncError>(())
//! ```

pub mod config;
pub mod errors;
pub mod fault_injection;
pub mod model;
pub mod store;
pub mod sync;

pub use crate::config::{StoreConfig, SyncConfig, open_store, open_store_in_memory};
pub use crate::errors::{CommitStage, StoreError, SyncError};
pub use crate::model::{
    Cardinality, Entity, EntityGraph, EntityId, EntityKind, Handle, Loaded, Relation,
    RelationSpec, attribute, relation,
};
pub use crate::store::{Record, SqliteStore, StoredRelation, SyncBackend};
pub use crate::sync::{
    EngineState, IdentifyingAttributes, IdentityKey, IdentityKeyBuilder, Statistics, SyncEngine,
    Synchronized,
};
