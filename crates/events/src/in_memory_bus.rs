//! In-memory topic exchange for tests/dev.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broadcast::{BroadcastError, Broadcaster};
use crate::bus::Subscription;
use crate::notification::ChangeNotification;
use crate::routing::TopicPattern;

/// In-memory topic exchange.
///
/// - No IO
/// - Best-effort fan-out to every binding whose pattern matches
/// - Subscribers that went away are pruned on the next announce
#[derive(Debug, Default)]
pub struct InMemoryBroadcaster {
    bindings: Mutex<Vec<Binding>>,
}

#[derive(Debug)]
struct Binding {
    pattern: TopicPattern,
    tx: mpsc::UnboundedSender<ChangeNotification>,
}

impl InMemoryBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a new subscriber. Only notifications announced afterwards are seen.
    pub fn subscribe(&self, pattern: TopicPattern) -> Subscription<ChangeNotification> {
        let (tx, rx) = mpsc::unbounded_channel();

        // If the lock is poisoned, we still return a subscription;
        // it just won't receive messages until the process restarts.
        if let Ok(mut bindings) = self.bindings.lock() {
            bindings.push(Binding { pattern, tx });
        }

        Subscription::new(rx)
    }

    pub fn subscriber_count(&self) -> usize {
        self.bindings.lock().map(|b| b.len()).unwrap_or(0)
    }
}

#[async_trait]
impl Broadcaster for InMemoryBroadcaster {
    async fn announce(&self, notification: &ChangeNotification) -> Result<(), BroadcastError> {
        let routing_key = notification.routing_key();
        let mut bindings = self
            .bindings
            .lock()
            .map_err(|_| BroadcastError::Transport("exchange lock poisoned".to_string()))?;

        bindings.retain(|b| {
            if !b.pattern.matches(&routing_key) {
                return !b.tx.is_closed();
            }
            b.tx.send(notification.clone()).is_ok()
        });

        debug!(%routing_key, bindings = bindings.len(), "notification announced");
        Ok(())
    }
}
