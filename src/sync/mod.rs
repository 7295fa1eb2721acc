//! The synchronization engine and its parts: identity keys, duplicate
//! lookup, state merging, write ordering and statistics.

mod batch;
mod engine;
mod finder;
mod identity;
mod merge;
mod order;
mod stats;

pub use engine::{EngineState, SyncEngine, Synchronized};
pub use finder::DuplicateFinder;
pub use identity::{IdentifyingAttributes, IdentityKey, IdentityKeyBuilder};
pub use merge::{MergeReport, StateMerger};
pub use order::PersistenceOrderPolicy;
pub use stats::Statistics;
