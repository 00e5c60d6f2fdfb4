//! Latest-layouts RPC: worker-side responder, caller-side client, and the
//! Redis transport for both.

pub mod client;
#[cfg(feature = "redis")]
pub mod redis;
pub mod responder;

pub use client::{LatestClient, RpcCallError};
#[cfg(feature = "redis")]
pub use self::redis::{RedisReplyChannel, RedisRequestConsumer, RedisTransportError, RpcQueueSettings};
pub use responder::{DEFAULT_POLL_INTERVAL, DropReason, LatestResponder, Outcome};
