//! Broadcast of layout changes (publishing side).
//!
//! ## Delivery Semantics
//!
//! Announcements are **advisory**. The store is the durability boundary: a
//! change is committed once it is persisted, whether or not the announcement
//! reaches anyone. Callers log announce failures and move on; nothing retries.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::notification::ChangeNotification;

#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("broker transport error: {0}")]
    Transport(String),

    #[error("failed to encode notification: {0}")]
    Encode(String),
}

/// Topic-exchange publisher for [`ChangeNotification`]s.
///
/// Implementations route each notification by
/// [`ChangeNotification::routing_key`] and mark it for durable delivery where
/// the broker supports it. They must be safe to share across tasks.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn announce(&self, notification: &ChangeNotification) -> Result<(), BroadcastError>;
}

#[async_trait]
impl<B> Broadcaster for Arc<B>
where
    B: Broadcaster + ?Sized,
{
    async fn announce(&self, notification: &ChangeNotification) -> Result<(), BroadcastError> {
        (**self).announce(notification).await
    }
}
