//! Redis-backed topic exchange for layout change notifications.
//!
//! Each announcement goes out twice, in one pipeline:
//!
//! - `XADD <exchange> MAXLEN ~ <n> * routing_key .. timestamp .. content_type .. body ..`
//!   keeps a capped, durable backlog for consumers that were offline
//! - `PUBLISH <exchange>.<routing key> <body>` for live subscribers
//!
//! Redis channel globs cannot express `*`/`#` word semantics, so subscribers
//! `PSUBSCRIBE` on the pattern's literal prefix and filter each message with
//! [`TopicPattern::matches`].

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tracing::{debug, instrument, warn};

use citylayout_events::{
    BroadcastError, Broadcaster, ChangeNotification, JSON_CONTENT_TYPE, RoutingKey, Subscription,
    TopicPattern,
};

/// Default exchange name.
pub const DEFAULT_EXCHANGE: &str = "ui.layout";

/// Default approximate cap of the backlog stream.
pub const DEFAULT_MAX_LEN: usize = 10_000;

pub struct RedisBroadcaster {
    client: redis::Client,
    conn: MultiplexedConnection,
    exchange: String,
    max_len: usize,
}

impl RedisBroadcaster {
    pub async fn connect(
        client: redis::Client,
        exchange: impl Into<String>,
        max_len: usize,
    ) -> Result<Self, BroadcastError> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| BroadcastError::Transport(format!("Redis connection error: {e}")))?;

        Ok(Self {
            client,
            conn,
            exchange: exchange.into(),
            max_len,
        })
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Pub/sub channel a notification with `key` is published on.
    pub fn channel_for(&self, key: &RoutingKey) -> String {
        format!("{}.{}", self.exchange, key)
    }

    /// Live subscription to notifications whose routing key matches
    /// `pattern`. Only notifications published afterwards are seen.
    pub async fn subscribe(
        &self,
        pattern: TopicPattern,
    ) -> Result<Subscription<ChangeNotification>, BroadcastError> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| BroadcastError::Transport(format!("Redis connection error: {e}")))?;

        let glob = channel_glob(&self.exchange, &pattern);
        pubsub
            .psubscribe(&glob)
            .await
            .map_err(|e| BroadcastError::Transport(format!("PSUBSCRIBE {glob} failed: {e}")))?;

        let (tx, rx) = mpsc::unbounded_channel();

        // Forwarder task; ends when the subscriber drops its end or the
        // connection goes away.
        tokio::spawn(async move {
            let mut messages = Box::pin(pubsub.into_on_message());
            while let Some(msg) = messages.next().await {
                let body: Vec<u8> = match msg.get_payload() {
                    Ok(b) => b,
                    Err(_) => continue,
                };
                let notification: ChangeNotification = match serde_json::from_slice(&body) {
                    Ok(n) => n,
                    Err(err) => {
                        warn!(channel = msg.get_channel_name(), error = %err, "skipping undecodable notification");
                        continue;
                    }
                };
                if !pattern.matches(&notification.routing_key()) {
                    continue;
                }
                if tx.send(notification).is_err() {
                    return;
                }
            }
            debug!(%pattern, "notification subscription closed");
        });

        Ok(Subscription::new(rx))
    }
}

#[async_trait]
impl Broadcaster for RedisBroadcaster {
    #[instrument(
        skip(self, notification),
        fields(exchange = %self.exchange, routing_key = tracing::field::Empty),
        err
    )]
    async fn announce(&self, notification: &ChangeNotification) -> Result<(), BroadcastError> {
        let routing_key = notification.routing_key();
        tracing::Span::current().record("routing_key", routing_key.as_str());

        let body = serde_json::to_vec(notification).map_err(|e| BroadcastError::Encode(e.to_string()))?;

        let mut conn = self.conn.clone();
        redis::pipe()
            .cmd("XADD")
            .arg(&self.exchange)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.max_len)
            .arg("*")
            .arg("routing_key")
            .arg(routing_key.as_str())
            .arg("timestamp")
            .arg(notification.at.to_rfc3339())
            .arg("content_type")
            .arg(JSON_CONTENT_TYPE)
            .arg("body")
            .arg(&body)
            .ignore()
            .cmd("PUBLISH")
            .arg(self.channel_for(&routing_key))
            .arg(&body)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| BroadcastError::Transport(format!("XADD/PUBLISH failed: {e}")))
    }
}

impl core::fmt::Debug for RedisBroadcaster {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisBroadcaster")
            .field("exchange", &self.exchange)
            .field("max_len", &self.max_len)
            .finish_non_exhaustive()
    }
}

/// Narrowest Redis channel glob covering every key `pattern` can match.
fn channel_glob(exchange: &str, pattern: &TopicPattern) -> String {
    if pattern.is_exact() {
        return format!("{exchange}.{pattern}");
    }
    let prefix = pattern.literal_prefix();
    if prefix.is_empty() {
        format!("{exchange}.*")
    } else {
        format!("{exchange}.{}.*", prefix.join("."))
    }
}

#[cfg(test)]
mod tests {
    use citylayout_core::{LayoutId, OwnerId};
    use citylayout_events::ChangeKind;

    use super::*;

    #[test]
    fn glob_uses_the_literal_prefix() {
        let owner = OwnerId::new();
        let entity = LayoutId::new();

        assert_eq!(channel_glob("ui.layout", &TopicPattern::all()), "ui.layout.*");
        assert_eq!(
            channel_glob("ui.layout", &TopicPattern::owner(owner)),
            format!("ui.layout.{owner}.*")
        );
        assert_eq!(
            channel_glob("ui.layout", &TopicPattern::layout(owner, entity)),
            format!("ui.layout.{owner}.{entity}.*")
        );
        assert_eq!(
            channel_glob("ui.layout", &TopicPattern::kind(ChangeKind::Deleted)),
            "ui.layout.*"
        );

        let exact: TopicPattern = format!("{owner}.{entity}.updated").parse().unwrap();
        assert_eq!(
            channel_glob("ui.layout", &exact),
            format!("ui.layout.{owner}.{entity}.updated")
        );
    }
}
