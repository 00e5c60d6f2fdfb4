use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::{LayoutId, OwnerId};
use crate::payload::Payload;

/// One persisted version of a layout.
///
/// Records are append-only: an update is a new record with a later
/// `recorded_at`, never a mutation of an existing one. The record with the
/// greatest `recorded_at` for an `(owner, entity)` pair is that layout's
/// current version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub owner: OwnerId,
    pub entity: LayoutId,
    /// Server-assigned write time; the version discriminator.
    pub recorded_at: DateTime<Utc>,
    pub payload: Payload,
}

impl LayoutRecord {
    pub fn new(
        owner: OwnerId,
        entity: LayoutId,
        recorded_at: DateTime<Utc>,
        payload: Payload,
    ) -> Self {
        Self {
            owner,
            entity,
            recorded_at,
            payload,
        }
    }
}
