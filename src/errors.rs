use std::fmt;

use thiserror::Error;

use crate::model::{EntityId, EntityKind};
use crate::sync::Statistics;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("schema error: {0}")]
    SchemaError(String),
    #[error("query error: {0}")]
    QueryError(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("transaction error: {0}")]
    TransactionError(String),
    #[error("fault injected: {0}")]
    FaultInjected(String),
    #[error("record {record} references missing record {referenced}")]
    ForeignKey { record: i64, referenced: i64 },
}

impl StoreError {
    pub fn connection<T: Into<String>>(msg: T) -> Self {
        StoreError::ConnectionError(msg.into())
    }

    pub fn schema<T: Into<String>>(msg: T) -> Self {
        StoreError::SchemaError(msg.into())
    }

    pub fn query<T: Into<String>>(msg: T) -> Self {
        StoreError::QueryError(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        StoreError::NotFound(msg.into())
    }

    pub fn invalid_input<T: Into<String>>(msg: T) -> Self {
        StoreError::InvalidInput(msg.into())
    }

    pub fn transaction<T: Into<String>>(msg: T) -> Self {
        StoreError::TransactionError(msg.into())
    }

    pub fn fault_injection<T: Into<String>>(msg: T) -> Self {
        StoreError::FaultInjected(msg.into())
    }
}

/// Phase of the commit in which a backend call failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitStage {
    Insert,
    Update,
    Flush,
}

impl fmt::Display for CommitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            CommitStage::Insert => "insert",
            CommitStage::Update => "update",
            CommitStage::Flush => "flush",
        };
        f.write_str(stage)
    }
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{kind} {key} could not be resolved to a stored identifier")]
    DuplicateResolution { kind: EntityKind, key: String },
    #[error("merge into {target} rejected: it would erase {relation}")]
    InvalidMerge {
        kind: EntityKind,
        target: String,
        relation: String,
    },
    #[error("unsupported entity type: {0}")]
    UnsupportedEntityType(String),
    #[error("{record} references {dependency}, which is not persisted")]
    UnpersistedDependency {
        record: String,
        dependency: String,
        statistics: Box<Statistics>,
    },
    #[error("backend failure during {stage} of {record}: {source}")]
    BackendIntegrity {
        stage: CommitStage,
        record: String,
        #[source]
        source: StoreError,
        statistics: Box<Statistics>,
    },
    #[error("{kind} {id} is not present in the store")]
    UnknownIdentifier { kind: EntityKind, id: EntityId },
    #[error("invalid graph: {0}")]
    InvalidGraph(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SyncError {
    pub fn invalid_graph<T: Into<String>>(msg: T) -> Self {
        SyncError::InvalidGraph(msg.into())
    }

    /// Statistics gathered by the failed batch up to the point of failure.
    pub fn statistics(&self) -> Option<&Statistics> {
        match self {
            SyncError::UnpersistedDependency { statistics, .. }
            | SyncError::BackendIntegrity { statistics, .. } => Some(&**statistics),
            _ => None,
        }
    }
}
