//! Redis Streams transport for the latest-layouts RPC.
//!
//! ## Architecture
//!
//! - **Request queue**: stream `<queue>` (default `rpc_ui_latest`), entry
//!   fields `reply_to`, `correlation_id`, `content_type`, `body`
//! - **Consumer group**: shared by every responder instance (default
//!   `ui-endpoint`); each instance reads with `COUNT 1` (prefetch of one)
//! - **Acknowledgment**: `XACK` + `XDEL` in one `MULTI`, so a handled request
//!   leaves the queue for good
//! - **Redelivery**: entries left pending by a dead consumer for longer than
//!   the claim idle time are taken over with `XAUTOCLAIM`
//! - **Replies**: `XADD <reply_to>` with `correlation_id`, `content_type`,
//!   `body`; the reply stream gets a TTL so abandoned destinations expire
//!
//! Blocking reads (`XREADGROUP BLOCK`, `XREAD BLOCK`) hold their connection,
//! so consumers and reply channels each own a dedicated connection.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use citylayout_events::{
    Delivery, JSON_CONTENT_TYPE, Reply, ReplyChannel, RequestConsumer, RequestEnvelope,
};

pub const DEFAULT_QUEUE: &str = "rpc_ui_latest";
pub const DEFAULT_GROUP: &str = "ui-endpoint";
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);
const DEFAULT_REPLY_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum RedisTransportError {
    #[error("Redis connection error: {0}")]
    Connection(String),

    #[error("Redis command error: {0}")]
    Command(String),

    #[error("malformed stream reply: {0}")]
    Deserialization(String),

    #[error("previous delivery {0} has not been acknowledged")]
    PrefetchExceeded(String),

    #[error("delivery {0} is not held by this consumer")]
    UnknownDelivery(String),
}

fn command_error(command: &'static str) -> impl Fn(redis::RedisError) -> RedisTransportError {
    move |e| RedisTransportError::Command(format!("{command} failed: {e}"))
}

/// Where the responder reads requests from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcQueueSettings {
    pub queue: String,
    pub group: String,
    /// Unique per responder instance.
    pub consumer: String,
    /// How long a request may sit unacknowledged before another consumer
    /// takes it over.
    pub claim_idle: Duration,
    pub reply_ttl: Duration,
}

impl Default for RpcQueueSettings {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            group: DEFAULT_GROUP.to_string(),
            consumer: format!("{DEFAULT_GROUP}-{}", Uuid::now_v7()),
            claim_idle: DEFAULT_CLAIM_IDLE,
            reply_ttl: DEFAULT_REPLY_TTL,
        }
    }
}

/// Worker side: consumer-group reader on the request stream.
pub struct RedisRequestConsumer {
    conn: MultiplexedConnection,
    settings: RpcQueueSettings,
    claim_cursor: String,
    in_flight: Option<String>,
}

impl RedisRequestConsumer {
    /// Open a dedicated connection and make sure the consumer group exists.
    pub async fn connect(
        client: &redis::Client,
        settings: RpcQueueSettings,
    ) -> Result<Self, RedisTransportError> {
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisTransportError::Connection(e.to_string()))?;

        ensure_consumer_group(&mut conn, &settings.queue, &settings.group).await?;

        Ok(Self {
            conn,
            settings,
            claim_cursor: "0-0".to_string(),
            in_flight: None,
        })
    }

    pub fn settings(&self) -> &RpcQueueSettings {
        &self.settings
    }

    /// Take over one request another consumer left pending for too long.
    async fn reclaim(&mut self) -> Result<Option<Delivery>, RedisTransportError> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(&self.settings.queue)
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg(self.settings.claim_idle.as_millis() as u64)
            .arg(&self.claim_cursor)
            .arg("COUNT")
            .arg(1)
            .query_async(&mut self.conn)
            .await
            .map_err(command_error("XAUTOCLAIM"))?;

        let (cursor, entries) = parse_autoclaim_reply(&reply)?;
        self.claim_cursor = cursor;
        Ok(entries.into_iter().next().map(|e| e.into_delivery(true)))
    }

    /// Wait up to `wait` for a request nobody has seen yet.
    async fn read_new(&mut self, wait: Duration) -> Result<Option<Delivery>, RedisTransportError> {
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.settings.group)
            .arg(&self.settings.consumer)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_millis(wait))
            .arg("STREAMS")
            .arg(&self.settings.queue)
            .arg(">")
            .query_async(&mut self.conn)
            .await
            .map_err(command_error("XREADGROUP"))?;

        let entries = parse_read_reply(&reply, &self.settings.queue)?;
        Ok(entries.into_iter().next().map(|e| e.into_delivery(false)))
    }
}

#[async_trait]
impl RequestConsumer for RedisRequestConsumer {
    type Error = RedisTransportError;

    async fn poll(&mut self, wait: Duration) -> Result<Option<Delivery>, Self::Error> {
        if let Some(held) = &self.in_flight {
            return Err(RedisTransportError::PrefetchExceeded(held.clone()));
        }

        let delivery = match self.reclaim().await? {
            Some(d) => Some(d),
            None => self.read_new(wait).await?,
        };

        if let Some(d) = &delivery {
            self.in_flight = Some(d.tag().to_string());
        }
        Ok(delivery)
    }

    #[instrument(skip(self, reply), err)]
    async fn reply(&mut self, reply_to: &str, reply: Reply) -> Result<(), Self::Error> {
        let mut pipe = redis::pipe();
        pipe.cmd("XADD").arg(reply_to).arg("*");
        if let Some(correlation_id) = &reply.correlation_id {
            pipe.arg("correlation_id").arg(correlation_id);
        }
        pipe.arg("content_type")
            .arg(&reply.content_type)
            .arg("body")
            .arg(&reply.body)
            .ignore();
        pipe.cmd("EXPIRE")
            .arg(reply_to)
            .arg(self.settings.reply_ttl.as_secs().max(1))
            .ignore();

        pipe.query_async::<_, ()>(&mut self.conn)
            .await
            .map_err(command_error("XADD reply"))
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), Self::Error> {
        if self.in_flight.as_deref() != Some(delivery.tag()) {
            return Err(RedisTransportError::UnknownDelivery(delivery.tag().to_string()));
        }
        // Released either way: if the ack below fails the entry stays pending
        // and is reclaimed after the idle timeout.
        self.in_flight = None;

        redis::pipe()
            .atomic()
            .cmd("XACK")
            .arg(&self.settings.queue)
            .arg(&self.settings.group)
            .arg(delivery.tag())
            .ignore()
            .cmd("XDEL")
            .arg(&self.settings.queue)
            .arg(delivery.tag())
            .ignore()
            .query_async::<_, ()>(&mut self.conn)
            .await
            .map_err(command_error("XACK"))?;

        debug!(delivery = delivery.tag(), "rpc request acknowledged");
        Ok(())
    }
}

impl core::fmt::Debug for RedisRequestConsumer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisRequestConsumer")
            .field("settings", &self.settings)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

/// Caller side: publishes requests and reads a private reply stream.
pub struct RedisReplyChannel {
    conn: MultiplexedConnection,
    queue: String,
    address: String,
    last_id: String,
}

impl RedisReplyChannel {
    /// Open a dedicated connection with a freshly named reply stream.
    pub async fn connect(client: &redis::Client, queue: impl Into<String>) -> Result<Self, RedisTransportError> {
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RedisTransportError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            queue: queue.into(),
            address: format!("rpc.reply.{}", Uuid::now_v7()),
            last_id: "0-0".to_string(),
        })
    }
}

#[async_trait]
impl ReplyChannel for RedisReplyChannel {
    type Error = RedisTransportError;

    fn address(&self) -> &str {
        &self.address
    }

    async fn send_request(&mut self, request: RequestEnvelope) -> Result<(), Self::Error> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.queue).arg("*");
        if let Some(reply_to) = &request.reply_to {
            cmd.arg("reply_to").arg(reply_to);
        }
        if let Some(correlation_id) = &request.correlation_id {
            cmd.arg("correlation_id").arg(correlation_id);
        }
        if let Some(content_type) = &request.content_type {
            cmd.arg("content_type").arg(content_type);
        }
        cmd.arg("body").arg(&request.body);

        let _: String = cmd
            .query_async(&mut self.conn)
            .await
            .map_err(command_error("XADD request"))?;
        Ok(())
    }

    async fn next_reply(&mut self, wait: Duration) -> Result<Option<Reply>, Self::Error> {
        let reply: Value = redis::cmd("XREAD")
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(block_millis(wait))
            .arg("STREAMS")
            .arg(&self.address)
            .arg(&self.last_id)
            .query_async(&mut self.conn)
            .await
            .map_err(command_error("XREAD"))?;

        let Some(entry) = parse_read_reply(&reply, &self.address)?.into_iter().next() else {
            return Ok(None);
        };
        self.last_id = entry.id.clone();
        Ok(Some(entry.into_reply()))
    }
}

impl core::fmt::Debug for RedisReplyChannel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisReplyChannel")
            .field("queue", &self.queue)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// Create the consumer group (and the stream) unless it already exists.
async fn ensure_consumer_group(
    conn: &mut MultiplexedConnection,
    queue: &str,
    group: &str,
) -> Result<(), RedisTransportError> {
    // "0": requests queued before the group existed are still served.
    let created: redis::RedisResult<()> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(queue)
        .arg(group)
        .arg("0")
        .arg("MKSTREAM")
        .query_async(conn)
        .await;

    match created {
        Ok(()) => Ok(()),
        Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
        Err(e) => Err(RedisTransportError::Command(format!("XGROUP CREATE failed: {e}"))),
    }
}

/// `BLOCK 0` waits forever; never send it.
fn block_millis(wait: Duration) -> u64 {
    (wait.as_millis() as u64).max(1)
}

/// One stream entry: `[id, [field, value, ...]]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct StreamEntry {
    id: String,
    fields: HashMap<String, Vec<u8>>,
}

impl StreamEntry {
    fn text(&self, field: &str) -> Option<String> {
        self.fields
            .get(field)
            .map(|v| String::from_utf8_lossy(v).into_owned())
    }

    fn into_envelope(mut self) -> RequestEnvelope {
        RequestEnvelope {
            reply_to: self.text("reply_to"),
            correlation_id: self.text("correlation_id"),
            content_type: self.text("content_type"),
            body: self.fields.remove("body").unwrap_or_default(),
        }
    }

    fn into_delivery(self, redelivered: bool) -> Delivery {
        let tag = self.id.clone();
        Delivery::new(tag, redelivered, self.into_envelope())
    }

    fn into_reply(mut self) -> Reply {
        Reply {
            correlation_id: self.text("correlation_id"),
            content_type: self
                .text("content_type")
                .unwrap_or_else(|| JSON_CONTENT_TYPE.to_string()),
            body: self.fields.remove("body").unwrap_or_default(),
        }
    }
}

fn bytes_of(value: &Value) -> Option<Vec<u8>> {
    match value {
        Value::Data(data) => Some(data.clone()),
        Value::Status(s) => Some(s.clone().into_bytes()),
        _ => None,
    }
}

fn parse_stream_entry(entry: &Value) -> Result<StreamEntry, RedisTransportError> {
    let Value::Bulk(parts) = entry else {
        return Err(RedisTransportError::Deserialization("invalid entry format".to_string()));
    };
    let [id, fields, ..] = parts.as_slice() else {
        return Err(RedisTransportError::Deserialization("entry too short".to_string()));
    };

    let id = bytes_of(id)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .ok_or_else(|| RedisTransportError::Deserialization("invalid message id format".to_string()))?;

    let fields = match fields {
        Value::Bulk(values) => values
            .chunks(2)
            .filter_map(|chunk| match chunk {
                [k, v] => Some((String::from_utf8_lossy(&bytes_of(k)?).into_owned(), bytes_of(v)?)),
                _ => None,
            })
            .collect(),
        // Claimed entry whose content was deleted meanwhile.
        Value::Nil => HashMap::new(),
        _ => return Err(RedisTransportError::Deserialization("invalid fields format".to_string())),
    };

    Ok(StreamEntry { id, fields })
}

/// Entry list; `nil` items (entries deleted while pending) are skipped.
fn parse_entries(value: &Value) -> Result<Vec<StreamEntry>, RedisTransportError> {
    match value {
        Value::Nil => Ok(vec![]),
        Value::Bulk(entries) => entries
            .iter()
            .filter(|e| !matches!(e, Value::Nil))
            .map(parse_stream_entry)
            .collect(),
        _ => Err(RedisTransportError::Deserialization("invalid entry list".to_string())),
    }
}

/// `XREAD`/`XREADGROUP` reply: `nil` on timeout, else `[[stream, entries], ...]`.
fn parse_read_reply(value: &Value, stream: &str) -> Result<Vec<StreamEntry>, RedisTransportError> {
    let streams = match value {
        Value::Nil => return Ok(vec![]),
        Value::Bulk(streams) => streams,
        _ => return Err(RedisTransportError::Deserialization("invalid read reply".to_string())),
    };

    for item in streams {
        if let Value::Bulk(pair) = item {
            if let [name, entries] = pair.as_slice() {
                if bytes_of(name).as_deref() == Some(stream.as_bytes()) {
                    return parse_entries(entries);
                }
            }
        }
    }
    Ok(vec![])
}

/// `XAUTOCLAIM` reply: `[next_cursor, entries]` (plus deleted ids on Redis 7).
fn parse_autoclaim_reply(value: &Value) -> Result<(String, Vec<StreamEntry>), RedisTransportError> {
    let Value::Bulk(parts) = value else {
        return Err(RedisTransportError::Deserialization("invalid XAUTOCLAIM reply".to_string()));
    };
    let [cursor, entries, ..] = parts.as_slice() else {
        return Err(RedisTransportError::Deserialization("XAUTOCLAIM reply too short".to_string()));
    };

    let cursor = bytes_of(cursor)
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .ok_or_else(|| RedisTransportError::Deserialization("invalid XAUTOCLAIM cursor".to_string()))?;
    Ok((cursor, parse_entries(entries)?))
}
