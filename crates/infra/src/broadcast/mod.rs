//! Infrastructure-backed broadcasters.
//!
//! The `Broadcaster` abstraction and the in-memory exchange live in
//! `citylayout-events`. This module provides the Redis implementation.

#[cfg(feature = "redis")]
pub mod redis;

#[cfg(feature = "redis")]
pub use self::redis::{DEFAULT_EXCHANGE, DEFAULT_MAX_LEN, RedisBroadcaster};
