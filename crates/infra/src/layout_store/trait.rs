use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use citylayout_core::{LayoutId, LayoutRecord, OwnerId};

/// Layout store operation error.
///
/// These are infrastructure errors only. An owner without layouts, or a
/// delete that matched nothing, is not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Backend could not be reached (connection, pool, timeout).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// Backend was reached but refused the statement.
    #[error("storage rejected the operation: {0}")]
    Rejected(String),

    /// A stored row could not be turned back into a record.
    #[error("failed to decode stored row: {0}")]
    Decode(String),
}

/// Append-only store of layout versions.
///
/// ## Latest semantics
///
/// `latest_per_entity` returns exactly one record per distinct entity of the
/// owner: the one with the greatest `recorded_at`. When several rows of an
/// entity share that timestamp, the one inserted last wins. Results are
/// ordered by entity id.
#[async_trait]
pub trait LayoutStore: Send + Sync {
    /// Append one record. Never overwrites.
    async fn insert(&self, record: &LayoutRecord) -> Result<(), StoreError>;

    /// Remove every record of `(owner, entity)`; returns how many went away.
    async fn delete_all(&self, owner: OwnerId, entity: LayoutId) -> Result<u64, StoreError>;

    /// Newest record of every entity the owner has.
    async fn latest_per_entity(&self, owner: OwnerId) -> Result<Vec<LayoutRecord>, StoreError>;
}

#[async_trait]
impl<S> LayoutStore for Arc<S>
where
    S: LayoutStore + ?Sized,
{
    async fn insert(&self, record: &LayoutRecord) -> Result<(), StoreError> {
        (**self).insert(record).await
    }

    async fn delete_all(&self, owner: OwnerId, entity: LayoutId) -> Result<u64, StoreError> {
        (**self).delete_all(owner, entity).await
    }

    async fn latest_per_entity(&self, owner: OwnerId) -> Result<Vec<LayoutRecord>, StoreError> {
        (**self).latest_per_entity(owner).await
    }
}
