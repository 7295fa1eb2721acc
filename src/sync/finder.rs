use tracing::trace;

use super::identity::{IdentifyingAttributes, IdentityKeyBuilder};
use crate::errors::SyncError;
use crate::model::{EntityGraph, EntityId, Handle};
use crate::store::SyncBackend;

/// Read-only lookup of stored equivalents of unidentified entities.
pub struct DuplicateFinder<'b, B: ?Sized> {
    backend: &'b B,
}

impl<'b, B> DuplicateFinder<'b, B>
where
    B: SyncBackend + ?Sized,
{
    pub fn new(backend: &'b B) -> Self {
        Self { backend }
    }

    /// Stored identifier of a record equivalent to `handle`, if any. Scoped
    /// entities are never looked up on their own.
    pub fn find_stored_identifier(
        &self,
        keys: &mut IdentityKeyBuilder,
        graph: &EntityGraph,
        handle: Handle,
    ) -> Result<Option<EntityId>, SyncError> {
        if graph.entity(handle)?.kind.is_scoped() {
            return Ok(None);
        }
        let attributes = keys.identifying_attributes(graph, handle)?;
        self.find_by_attributes(&attributes)
    }

    pub fn find_by_attributes(
        &self,
        attributes: &IdentifyingAttributes,
    ) -> Result<Option<EntityId>, SyncError> {
        let found = self
            .backend
            .find_by_identifying_attributes(attributes.kind(), attributes)?;
        trace!(kind = %attributes.kind(), identity = %attributes.canonical(), ?found, "duplicate lookup");
        Ok(found)
    }
}
