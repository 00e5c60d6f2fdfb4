//! Request/reply over a shared work queue.
//!
//! Callers put a request on a well-known queue, naming a private reply
//! destination and an opaque correlation token. A worker takes requests one
//! at a time, answers on the named destination echoing the token, and only
//! then acknowledges the request. A request that is never acknowledged (the
//! worker crashed) is delivered again, possibly to another worker.
//!
//! ```text
//! caller ──send_request──▶ [queue] ──poll──▶ worker
//!   ▲                                          │
//!   └──next_reply── [reply_to] ◀──reply────────┤
//!                                  ack ────────┘
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use citylayout_core::OwnerId;

/// Content type of every JSON body the service emits.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Request body of the "latest layouts of an owner" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestQueryRequest {
    /// `aid` is the field name older callers send.
    #[serde(alias = "aid")]
    pub owner: OwnerId,
}

/// A request message plus its transport-level envelope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RequestEnvelope {
    /// Destination the reply must be sent to.
    pub reply_to: Option<String>,
    /// Opaque token echoed back unchanged in the reply.
    pub correlation_id: Option<String>,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// One received request, owned by the consumer that polled it until acked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    tag: String,
    redelivered: bool,
    envelope: RequestEnvelope,
}

impl Delivery {
    pub fn new(tag: impl Into<String>, redelivered: bool, envelope: RequestEnvelope) -> Self {
        Self {
            tag: tag.into(),
            redelivered,
            envelope,
        }
    }

    /// Transport handle used to acknowledge this delivery.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// True if an earlier consumer received this request and never acked it.
    pub fn redelivered(&self) -> bool {
        self.redelivered
    }

    pub fn reply_to(&self) -> Option<&str> {
        self.envelope.reply_to.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.envelope.correlation_id.as_deref()
    }

    pub fn body(&self) -> &[u8] {
        &self.envelope.body
    }

    pub fn envelope(&self) -> &RequestEnvelope {
        &self.envelope
    }
}

/// Answer to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub correlation_id: Option<String>,
    pub content_type: String,
    pub body: Vec<u8>,
}

impl Reply {
    pub fn json(correlation_id: Option<String>, body: Vec<u8>) -> Self {
        Self {
            correlation_id,
            content_type: JSON_CONTENT_TYPE.to_string(),
            body,
        }
    }
}

/// Worker side of the queue.
///
/// Implementations deliver at most one unacknowledged request at a time
/// (prefetch of one): `poll` must not be called again before the previous
/// delivery was passed to `ack`.
#[async_trait]
pub trait RequestConsumer: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Wait up to `wait` for the next request. `Ok(None)` means the queue
    /// stayed idle.
    async fn poll(&mut self, wait: Duration) -> Result<Option<Delivery>, Self::Error>;

    /// Send `reply` to the destination `reply_to`.
    async fn reply(&mut self, reply_to: &str, reply: Reply) -> Result<(), Self::Error>;

    /// Remove the delivery from the queue for good.
    async fn ack(&mut self, delivery: Delivery) -> Result<(), Self::Error>;
}

/// Caller side: a private reply destination plus the ability to send requests.
#[async_trait]
pub trait ReplyChannel: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name of this channel's reply destination, for `RequestEnvelope::reply_to`.
    fn address(&self) -> &str;

    async fn send_request(&mut self, request: RequestEnvelope) -> Result<(), Self::Error>;

    /// Wait up to `wait` for the next reply addressed to this channel.
    async fn next_reply(&mut self, wait: Duration) -> Result<Option<Reply>, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_query_accepts_owner_and_legacy_aid() {
        let owner = OwnerId::new();
        let a: LatestQueryRequest =
            serde_json::from_str(&format!(r#"{{"owner":"{owner}"}}"#)).unwrap();
        let b: LatestQueryRequest = serde_json::from_str(&format!(r#"{{"aid":"{owner}"}}"#)).unwrap();
        assert_eq!(a.owner, owner);
        assert_eq!(b.owner, owner);
    }

    #[test]
    fn latest_query_rejects_non_uuid_owner() {
        assert!(serde_json::from_str::<LatestQueryRequest>(r#"{"owner":"bob"}"#).is_err());
        assert!(serde_json::from_str::<LatestQueryRequest>("{}").is_err());
    }
}
