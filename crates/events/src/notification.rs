use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use citylayout_core::{LayoutId, LayoutRecord, OwnerId, Payload};

use crate::routing::RoutingKey;

/// What happened to a layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Updated,
    Deleted,
}

impl ChangeKind {
    /// Last word of the routing key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

impl core::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory announcement of a layout change.
///
/// Transient: never persisted by the service. Subscribers filter on the
/// routing key derived from `(owner, entity, kind)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub owner: OwnerId,
    pub entity: LayoutId,
    pub kind: ChangeKind,
    pub at: DateTime<Utc>,
    /// The new document. Present only for [`ChangeKind::Updated`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
}

impl ChangeNotification {
    /// Announcement for a freshly stored version.
    pub fn updated(record: &LayoutRecord) -> Self {
        Self {
            owner: record.owner,
            entity: record.entity,
            kind: ChangeKind::Updated,
            at: record.recorded_at,
            payload: Some(record.payload.clone()),
        }
    }

    /// Announcement for an erased layout.
    pub fn deleted(owner: OwnerId, entity: LayoutId, at: DateTime<Utc>) -> Self {
        Self {
            owner,
            entity,
            kind: ChangeKind::Deleted,
            at,
            payload: None,
        }
    }

    pub fn routing_key(&self) -> RoutingKey {
        RoutingKey::for_change(self.owner, self.entity, self.kind)
    }
}
