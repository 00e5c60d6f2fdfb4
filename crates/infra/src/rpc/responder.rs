//! Answers "latest layouts of an owner" requests arriving on the RPC queue.
//!
//! Per delivery:
//!
//! ```text
//! Received ─▶ Decoded ─▶ Queried ─▶ Replied ─▶ Acknowledged
//!               │          │          │
//!               └──────────┴──────────┴──▶ Acknowledged-Dropped (no reply)
//! ```
//!
//! The acknowledgment is always the last step. A worker that dies before it
//! leaves the request unacknowledged, and the transport delivers it again.

use std::time::Duration;

use tracing::{error, info, warn};

use citylayout_events::{Delivery, LatestQueryRequest, Reply, RequestConsumer};

use crate::layout_store::LayoutStore;

/// Default bounded wait of one `poll`.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Why a delivery was acknowledged without a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Body is not a latest-query request.
    MalformedRequest,
    /// The store failed to answer.
    StorageUnavailable,
    /// The request names no reply destination.
    NoReplyDestination,
    /// The result could not be encoded or sent.
    ReplyFailed,
}

/// Terminal state of one handled delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply sent, then acknowledged.
    Replied { records: usize },
    /// Acknowledged without a reply.
    Dropped(DropReason),
}

/// One worker's request handler: a store to query and a consumer to read
/// requests from and answer through.
#[derive(Debug)]
pub struct LatestResponder<S, Q> {
    store: S,
    consumer: Q,
    poll_interval: Duration,
}

impl<S, Q> LatestResponder<S, Q>
where
    S: LayoutStore,
    Q: RequestConsumer,
{
    pub fn new(store: S, consumer: Q) -> Self {
        Self {
            store,
            consumer,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Wait up to one poll interval for a request and handle it.
    ///
    /// `Ok(None)` means the queue stayed idle. Errors come from the
    /// transport only (poll or ack); request-level failures are outcomes.
    pub async fn run_once(&mut self) -> Result<Option<Outcome>, Q::Error> {
        match self.consumer.poll(self.poll_interval).await? {
            Some(delivery) => self.handle(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Drive one delivery to a terminal state and acknowledge it.
    pub async fn handle(&mut self, delivery: Delivery) -> Result<Outcome, Q::Error> {
        let outcome = self.answer(&delivery).await;

        if let Err(err) = self.consumer.ack(delivery.clone()).await {
            error!(
                delivery = delivery.tag(),
                correlation_id = delivery.correlation_id().unwrap_or_default(),
                error = %err,
                "failed to acknowledge rpc request"
            );
            return Err(err);
        }
        Ok(outcome)
    }

    async fn answer(&mut self, delivery: &Delivery) -> Outcome {
        let correlation_id = delivery.correlation_id().unwrap_or_default();

        let request: LatestQueryRequest = match serde_json::from_slice(delivery.body()) {
            Ok(r) => r,
            Err(err) => {
                warn!(
                    delivery = delivery.tag(),
                    correlation_id,
                    error = %err,
                    "dropping malformed rpc request"
                );
                return Outcome::Dropped(DropReason::MalformedRequest);
            }
        };

        info!(
            delivery = delivery.tag(),
            correlation_id,
            owner = %request.owner,
            redelivered = delivery.redelivered(),
            "latest layouts requested"
        );

        let records = match self.store.latest_per_entity(request.owner).await {
            Ok(records) => records,
            Err(err) => {
                error!(
                    correlation_id,
                    owner = %request.owner,
                    error = %err,
                    "latest query failed; dropping rpc request"
                );
                return Outcome::Dropped(DropReason::StorageUnavailable);
            }
        };

        let Some(reply_to) = delivery.reply_to().filter(|r| !r.is_empty()) else {
            warn!(correlation_id, "rpc request has no reply destination; dropping");
            return Outcome::Dropped(DropReason::NoReplyDestination);
        };

        let body = match serde_json::to_vec(&records) {
            Ok(body) => body,
            Err(err) => {
                error!(correlation_id, error = %err, "failed to encode rpc reply");
                return Outcome::Dropped(DropReason::ReplyFailed);
            }
        };

        let reply = Reply::json(delivery.correlation_id().map(str::to_owned), body);
        if let Err(err) = self.consumer.reply(reply_to, reply).await {
            error!(correlation_id, reply_to, error = %err, "failed to send rpc reply");
            return Outcome::Dropped(DropReason::ReplyFailed);
        }

        Outcome::Replied {
            records: records.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use citylayout_core::{LayoutId, LayoutRecord, OwnerId, Payload};
    use citylayout_events::{InMemoryRpcBroker, RequestEnvelope};

    use super::*;
    use crate::layout_store::InMemoryLayoutStore;

    const SHORT: Duration = Duration::from_millis(20);

    fn request(reply_to: Option<&str>, body: impl Into<Vec<u8>>) -> RequestEnvelope {
        RequestEnvelope {
            reply_to: reply_to.map(str::to_owned),
            correlation_id: Some("corr-1".to_string()),
            content_type: Some("application/json".to_string()),
            body: body.into(),
        }
    }

    fn query_body(owner: OwnerId) -> Vec<u8> {
        format!(r#"{{"owner":"{owner}"}}"#).into_bytes()
    }

    #[tokio::test]
    async fn replies_with_latest_records_and_echoes_correlation() {
        let broker = InMemoryRpcBroker::new();
        let mut replies = broker.reply_queue("caller").unwrap();
        let store = Arc::new(InMemoryLayoutStore::new());
        let owner = OwnerId::new();
        let record = LayoutRecord::new(owner, LayoutId::new(), Utc::now(), Payload::from(r#"{"x":1}"#));
        store.insert(&record).await.unwrap();

        broker.publish(request(Some("caller"), query_body(owner))).unwrap();
        let mut responder =
            LatestResponder::new(store, broker.consumer()).with_poll_interval(SHORT);

        assert_eq!(
            responder.run_once().await.unwrap(),
            Some(Outcome::Replied { records: 1 })
        );
        assert_eq!(broker.acknowledged(), 1);

        let reply = replies.try_recv().unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("corr-1"));
        assert_eq!(reply.content_type, "application/json");
        let got: Vec<LayoutRecord> = serde_json::from_slice(&reply.body).unwrap();
        assert_eq!(got, vec![record]);
    }

    #[tokio::test]
    async fn unknown_owner_gets_an_empty_array() {
        let broker = InMemoryRpcBroker::new();
        let mut replies = broker.reply_queue("caller").unwrap();
        broker.publish(request(Some("caller"), query_body(OwnerId::new()))).unwrap();

        let mut responder = LatestResponder::new(Arc::new(InMemoryLayoutStore::new()), broker.consumer())
            .with_poll_interval(SHORT);
        responder.run_once().await.unwrap();

        assert_eq!(replies.try_recv().unwrap().body, b"[]");
    }

    #[tokio::test]
    async fn malformed_body_is_acked_without_reply() {
        let broker = InMemoryRpcBroker::new();
        let mut replies = broker.reply_queue("caller").unwrap();
        broker.publish(request(Some("caller"), "not json")).unwrap();
        broker.publish(request(Some("caller"), r#"{"owner":"nope"}"#)).unwrap();

        let mut responder = LatestResponder::new(Arc::new(InMemoryLayoutStore::new()), broker.consumer())
            .with_poll_interval(SHORT);

        for _ in 0..2 {
            assert_eq!(
                responder.run_once().await.unwrap(),
                Some(Outcome::Dropped(DropReason::MalformedRequest))
            );
        }
        assert_eq!(broker.acknowledged(), 2);
        assert_eq!(broker.queued(), 0);
        assert!(replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn storage_failure_is_acked_without_reply() {
        let broker = InMemoryRpcBroker::new();
        let mut replies = broker.reply_queue("caller").unwrap();
        let store = Arc::new(InMemoryLayoutStore::new());
        store.set_unavailable(true);
        broker.publish(request(Some("caller"), query_body(OwnerId::new()))).unwrap();

        let mut responder = LatestResponder::new(store, broker.consumer()).with_poll_interval(SHORT);
        assert_eq!(
            responder.run_once().await.unwrap(),
            Some(Outcome::Dropped(DropReason::StorageUnavailable))
        );
        assert_eq!(broker.acknowledged(), 1);
        assert!(replies.try_recv().is_err());
    }

    #[tokio::test]
    async fn missing_reply_destination_is_acked_and_dropped() {
        let broker = InMemoryRpcBroker::new();
        broker.publish(request(None, query_body(OwnerId::new()))).unwrap();
        broker.publish(request(Some(""), query_body(OwnerId::new()))).unwrap();

        let mut responder = LatestResponder::new(Arc::new(InMemoryLayoutStore::new()), broker.consumer())
            .with_poll_interval(SHORT);
        for _ in 0..2 {
            assert_eq!(
                responder.run_once().await.unwrap(),
                Some(Outcome::Dropped(DropReason::NoReplyDestination))
            );
        }
        assert_eq!(broker.acknowledged(), 2);
    }

    #[tokio::test]
    async fn idle_queue_yields_none() {
        let broker = InMemoryRpcBroker::new();
        let mut responder = LatestResponder::new(Arc::new(InMemoryLayoutStore::new()), broker.consumer())
            .with_poll_interval(SHORT);
        assert_eq!(responder.run_once().await.unwrap(), None);
    }
}
