//! Write path: persist a layout version, then tell subscribers about it.
//!
//! ```text
//! upsert(owner, entity, payload)       remove(owner, entity)
//!   ↓                                    ↓
//! 1. stamp with Clock::now()           1. LayoutStore::delete_all
//!   ↓                                    ↓
//! 2. LayoutStore::insert               2. Broadcaster::announce(deleted)
//!   ↓                                      (always, even if nothing matched)
//! 3. Broadcaster::announce(updated)
//! ```
//!
//! Persistence failures stop the pipeline and surface to the caller.
//! Announcement is best-effort: a failure is logged and the write still
//! counts as done. There is no transaction spanning both steps.

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tracing::{error, info, instrument};

use citylayout_core::{LayoutId, LayoutRecord, OwnerId, Payload};
use citylayout_events::{Broadcaster, ChangeNotification};

use crate::layout_store::{LayoutStore, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutServiceError {
    #[error("layout storage unavailable: {0}")]
    StorageUnavailable(#[from] StoreError),
}

/// Source of write timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, truncated to microseconds (the precision Postgres keeps), so
/// the timestamp handed back by `upsert` equals the one read back later.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }
}

/// Mutation facade over a store and a broadcaster.
#[derive(Debug)]
pub struct LayoutService<S, B, C = SystemClock> {
    store: S,
    broadcaster: B,
    clock: C,
}

impl<S, B> LayoutService<S, B, SystemClock> {
    pub fn new(store: S, broadcaster: B) -> Self {
        Self::with_clock(store, broadcaster, SystemClock)
    }
}

impl<S, B, C> LayoutService<S, B, C> {
    pub fn with_clock(store: S, broadcaster: B, clock: C) -> Self {
        Self {
            store,
            broadcaster,
            clock,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S, B, C> LayoutService<S, B, C>
where
    S: LayoutStore,
    B: Broadcaster,
    C: Clock,
{
    /// Record a new version of `(owner, entity)` and announce it.
    #[instrument(skip(self, payload), fields(owner = %owner, entity = %entity), err)]
    pub async fn upsert(
        &self,
        owner: OwnerId,
        entity: LayoutId,
        payload: Payload,
    ) -> Result<LayoutRecord, LayoutServiceError> {
        let record = LayoutRecord::new(owner, entity, self.clock.now(), payload);
        self.store.insert(&record).await?;

        let notification = ChangeNotification::updated(&record);
        if let Err(err) = self.broadcaster.announce(&notification).await {
            error!(
                routing_key = %notification.routing_key(),
                error = %err,
                "failed to announce layout update"
            );
        }

        info!(recorded_at = %record.recorded_at, "layout stored");
        Ok(record)
    }

    /// Erase every version of `(owner, entity)` and announce the deletion.
    ///
    /// Succeeds when nothing was stored for the pair.
    #[instrument(skip(self), fields(owner = %owner, entity = %entity), err)]
    pub async fn remove(&self, owner: OwnerId, entity: LayoutId) -> Result<(), LayoutServiceError> {
        let removed = self.store.delete_all(owner, entity).await?;

        let notification = ChangeNotification::deleted(owner, entity, self.clock.now());
        if let Err(err) = self.broadcaster.announce(&notification).await {
            error!(
                routing_key = %notification.routing_key(),
                error = %err,
                "failed to announce layout deletion"
            );
        }

        info!(removed, "layout removed");
        Ok(())
    }
}
