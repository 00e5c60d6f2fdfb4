//! Service configuration, read from environment variables.
//!
//! Every setting has a default except the database URL, which is required
//! only when persistent stores are enabled. Values that are present but do
//! not parse are reported instead of silently falling back.

use core::fmt::Display;
use core::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::layout_store::PoolSettings;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// HTTP listen port (`PORT`).
    pub port: u16,
    /// Postgres + Redis when true, in-memory otherwise (`USE_PERSISTENT_STORES`).
    pub use_persistent_stores: bool,
    /// `DATABASE_URL`, or the older `POSTGRESQL_URI`.
    pub database_url: Option<String>,
    pub redis_url: String,
    /// `JWT_SECRET`; `None` when unset.
    pub jwt_secret: Option<String>,
    /// Role a token needs to write layouts (`REQUIRED_ROLE`).
    pub required_role: String,
    pub layout_exchange: String,
    pub broadcast_max_len: usize,
    pub rpc_queue: String,
    pub rpc_consumer_group: String,
    pub rpc_poll_interval: Duration,
    pub rpc_claim_idle: Duration,
    pub rpc_reply_ttl: Duration,
    pub db: PoolSettings,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            use_persistent_stores: false,
            database_url: None,
            redis_url: "redis://localhost:6379".to_string(),
            jwt_secret: None,
            required_role: "ui:rw".to_string(),
            layout_exchange: "ui.layout".to_string(),
            broadcast_max_len: 10_000,
            rpc_queue: "rpc_ui_latest".to_string(),
            rpc_consumer_group: "ui-endpoint".to_string(),
            rpc_poll_interval: Duration::from_millis(1_000),
            rpc_claim_idle: Duration::from_millis(60_000),
            rpc_reply_ttl: Duration::from_secs(60),
            db: PoolSettings::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let d = Self::default();

        let config = Self {
            port: parse_or(&get, "PORT", d.port)?,
            use_persistent_stores: match get("USE_PERSISTENT_STORES") {
                Some(v) => parse_bool("USE_PERSISTENT_STORES", &v)?,
                None => d.use_persistent_stores,
            },
            database_url: get("DATABASE_URL").or_else(|| get("POSTGRESQL_URI")),
            redis_url: get("REDIS_URL").unwrap_or(d.redis_url),
            jwt_secret: get("JWT_SECRET"),
            required_role: get("REQUIRED_ROLE").unwrap_or(d.required_role),
            layout_exchange: get("LAYOUT_EXCHANGE").unwrap_or(d.layout_exchange),
            broadcast_max_len: parse_or(&get, "BROADCAST_MAX_LEN", d.broadcast_max_len)?,
            rpc_queue: get("RPC_QUEUE").unwrap_or(d.rpc_queue),
            rpc_consumer_group: get("RPC_CONSUMER_GROUP").unwrap_or(d.rpc_consumer_group),
            rpc_poll_interval: millis_or(&get, "RPC_POLL_MS", d.rpc_poll_interval)?,
            rpc_claim_idle: millis_or(&get, "RPC_CLAIM_IDLE_MS", d.rpc_claim_idle)?,
            rpc_reply_ttl: Duration::from_secs(parse_or(
                &get,
                "RPC_REPLY_TTL_SECS",
                d.rpc_reply_ttl.as_secs(),
            )?),
            db: PoolSettings {
                max_connections: parse_or(&get, "DB_MAX_CONNECTIONS", d.db.max_connections)?,
                acquire_timeout: millis_or(&get, "DB_ACQUIRE_TIMEOUT_MS", d.db.acquire_timeout)?,
                statement_timeout: millis_or(&get, "DB_STATEMENT_TIMEOUT_MS", d.db.statement_timeout)?,
            },
        };

        if config.use_persistent_stores && config.database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }
        Ok(config)
    }

    /// Consumer name of this process within the RPC consumer group.
    pub fn rpc_consumer_name(&self) -> String {
        format!("{}-{}", self.rpc_consumer_group, uuid::Uuid::now_v7())
    }

    #[cfg(feature = "redis")]
    pub fn rpc_queue_settings(&self) -> crate::rpc::RpcQueueSettings {
        crate::rpc::RpcQueueSettings {
            queue: self.rpc_queue.clone(),
            group: self.rpc_consumer_group.clone(),
            consumer: self.rpc_consumer_name(),
            claim_idle: self.rpc_claim_idle,
            reply_ttl: self.rpc_reply_ttl,
        }
    }
}

fn parse_or<G, T>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    match get(key) {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
        None => Ok(default),
    }
}

fn millis_or<G>(get: &G, key: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    parse_or(get, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
