//! Caller side of the latest-layouts RPC.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, instrument};
use uuid::Uuid;

use citylayout_core::{LayoutRecord, OwnerId};
use citylayout_events::{JSON_CONTENT_TYPE, LatestQueryRequest, ReplyChannel, RequestEnvelope};

#[derive(Debug, Error)]
pub enum RpcCallError {
    #[error("rpc transport error: {0}")]
    Transport(String),

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("malformed rpc reply: {0}")]
    MalformedResponse(String),
}

/// Synchronous-looking call on top of the request queue.
///
/// Each call carries a fresh correlation token. Replies carrying any other
/// token (late answers to calls that already timed out) are discarded.
#[derive(Debug)]
pub struct LatestClient<C> {
    channel: C,
}

impl<C> LatestClient<C>
where
    C: ReplyChannel,
{
    pub fn new(channel: C) -> Self {
        Self { channel }
    }

    pub fn into_inner(self) -> C {
        self.channel
    }

    /// Ask for the newest record of every layout `owner` has.
    #[instrument(skip(self), fields(owner = %owner, correlation_id = tracing::field::Empty), err)]
    pub async fn call(&mut self, owner: OwnerId, timeout: Duration) -> Result<Vec<LayoutRecord>, RpcCallError> {
        let correlation_id = Uuid::now_v7().to_string();
        tracing::Span::current().record("correlation_id", correlation_id.as_str());

        let body = serde_json::to_vec(&LatestQueryRequest { owner })
            .map_err(|e| RpcCallError::Transport(format!("failed to encode request: {e}")))?;

        self.channel
            .send_request(RequestEnvelope {
                reply_to: Some(self.channel.address().to_string()),
                correlation_id: Some(correlation_id.clone()),
                content_type: Some(JSON_CONTENT_TYPE.to_string()),
                body,
            })
            .await
            .map_err(|e| RpcCallError::Transport(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RpcCallError::Timeout(timeout));
            }

            let Some(reply) = self
                .channel
                .next_reply(remaining)
                .await
                .map_err(|e| RpcCallError::Transport(e.to_string()))?
            else {
                continue;
            };

            if reply.correlation_id.as_deref() != Some(correlation_id.as_str()) {
                debug!(
                    stale = reply.correlation_id.as_deref().unwrap_or_default(),
                    "discarding reply for another call"
                );
                continue;
            }

            return serde_json::from_slice(&reply.body)
                .map_err(|e| RpcCallError::MalformedResponse(e.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use citylayout_core::{LayoutId, Payload};
    use citylayout_events::{InMemoryRpcBroker, Reply, RequestConsumer};

    use super::*;
    use crate::layout_store::{InMemoryLayoutStore, LayoutStore};
    use crate::rpc::LatestResponder;

    #[tokio::test]
    async fn call_times_out_without_a_responder() {
        let broker = InMemoryRpcBroker::new();
        let mut client = LatestClient::new(broker.reply_channel().unwrap());

        let err = client
            .call(OwnerId::new(), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcCallError::Timeout(_)));
        assert_eq!(broker.queued(), 1);
    }

    #[tokio::test]
    async fn stale_replies_are_discarded() {
        let broker = InMemoryRpcBroker::new();
        let store = Arc::new(InMemoryLayoutStore::new());
        let owner = OwnerId::new();
        store
            .insert(&LayoutRecord::new(owner, LayoutId::new(), Utc::now(), Payload::from("{}")))
            .await
            .unwrap();

        let channel = broker.reply_channel().unwrap();
        let address = channel.address().to_string();
        let mut client = LatestClient::new(channel);

        // A late answer to some earlier call is already waiting on our reply queue.
        let mut stray = broker.consumer();
        stray
            .reply(&address, Reply::json(Some("old-call".to_string()), b"[1,2,3]".to_vec()))
            .await
            .unwrap();

        let server = tokio::spawn(async move {
            let mut responder = LatestResponder::new(store, broker.consumer())
                .with_poll_interval(Duration::from_secs(2));
            responder.run_once().await
        });

        let records = client.call(owner, Duration::from_secs(2)).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].owner, owner);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn undecodable_reply_is_malformed() {
        let broker = InMemoryRpcBroker::new();
        let mut client = LatestClient::new(broker.reply_channel().unwrap());

        let responder_broker = broker.clone();
        tokio::spawn(async move {
            let mut consumer = responder_broker.consumer();
            if let Ok(Some(delivery)) = consumer.poll(Duration::from_secs(2)).await {
                let reply = Reply::json(delivery.correlation_id().map(str::to_owned), b"{oops".to_vec());
                let _ = consumer.reply(delivery.reply_to().unwrap_or_default(), reply).await;
                let _ = consumer.ack(delivery).await;
            }
        });

        let err = client.call(OwnerId::new(), Duration::from_secs(2)).await.unwrap_err();
        assert!(matches!(err, RpcCallError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn non_json_and_binary_payloads_survive_a_call() {
        let broker = InMemoryRpcBroker::new();
        let store = Arc::new(InMemoryLayoutStore::new());
        let owner = OwnerId::new();
        let stored: Vec<(LayoutId, Vec<u8>)> = vec![
            (LayoutId::new(), b"abc".to_vec()),
            (LayoutId::new(), br#""abc""#.to_vec()),
            (LayoutId::new(), vec![0xff, 0xfe]),
            (LayoutId::new(), br#"{"x":1}"#.to_vec()),
        ];
        for (entity, bytes) in &stored {
            store
                .insert(&LayoutRecord::new(owner, *entity, Utc::now(), Payload::new(bytes.clone())))
                .await
                .unwrap();
        }

        let mut client = LatestClient::new(broker.reply_channel().unwrap());
        let server = tokio::spawn(async move {
            let mut responder = LatestResponder::new(store, broker.consumer())
                .with_poll_interval(Duration::from_secs(2));
            responder.run_once().await
        });

        let records = client.call(owner, Duration::from_secs(2)).await.unwrap();
        server.await.unwrap().unwrap();

        assert_eq!(records.len(), stored.len());
        for (entity, bytes) in &stored {
            let record = records.iter().find(|r| r.entity == *entity).unwrap();
            assert_eq!(record.payload.as_bytes(), bytes.as_slice());
        }
    }
}
