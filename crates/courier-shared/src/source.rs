//! The local cache seam.
//!
//! Queries read pages from a [`LocalSource`] in parallel with the server. The
//! client runs on a single thread, so futures are `!Send` boxed futures.

use futures::future::LocalBoxFuture;

use crate::error::Result;
use crate::record::Record;
use crate::types::{EntityId, EntityKind, SortField};

/// One page request against the local cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub kind: EntityKind,
    /// Container the results must belong to (messages, members).
    pub parent: Option<EntityId>,
    pub sort: Option<SortField>,
    /// Return records strictly after this one in sort order.
    pub from_id: Option<EntityId>,
    pub page_size: usize,
}

/// A persistent cache of server records.
pub trait LocalSource {
    fn load_page(&self, request: PageRequest) -> LocalBoxFuture<'static, Result<Vec<Record>>>;

    fn load_record(&self, id: &EntityId) -> LocalBoxFuture<'static, Result<Option<Record>>>;

    /// Persist records received from the server. Caches that are read-only
    /// may ignore this.
    fn store_records(&self, _kind: EntityKind, _records: &[Record]) -> Result<()> {
        Ok(())
    }

    fn remove_record(&self, _id: &EntityId) -> Result<()> {
        Ok(())
    }
}
