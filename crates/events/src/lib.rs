//! Change notifications and messaging mechanics.
//!
//! Transport-agnostic contracts for the two messaging patterns the service
//! uses: topic-routed broadcast of layout changes, and request/reply RPC over
//! a shared work queue. In-memory implementations live here too; broker-backed
//! ones live in `citylayout-infra`.

pub mod broadcast;
pub mod bus;
pub mod in_memory_bus;
pub mod in_memory_rpc;
pub mod notification;
pub mod routing;
pub mod rpc;

pub use broadcast::{BroadcastError, Broadcaster};
pub use bus::{RecvTimeoutError, Subscription};
pub use in_memory_bus::InMemoryBroadcaster;
pub use in_memory_rpc::{InMemoryConsumer, InMemoryReplyChannel, InMemoryRpcBroker, InMemoryRpcError};
pub use notification::{ChangeKind, ChangeNotification};
pub use routing::{RoutingKey, TopicPattern};
pub use rpc::{
    Delivery, JSON_CONTENT_TYPE, LatestQueryRequest, Reply, ReplyChannel, RequestConsumer,
    RequestEnvelope,
};
