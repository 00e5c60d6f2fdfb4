//! Infrastructure wiring: which store, broadcaster and RPC transport the
//! process runs on.
//!
//! - `USE_PERSISTENT_STORES=false` (default): in-memory store, exchange and
//!   broker; nothing survives a restart
//! - `USE_PERSISTENT_STORES=true`: Postgres store, Redis exchange and Redis
//!   RPC queue (requires the `redis` feature)

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use citylayout_core::{LayoutId, LayoutRecord, OwnerId, Payload};
use citylayout_events::{BroadcastError, InMemoryBroadcaster, InMemoryRpcBroker};
use citylayout_infra::layout_store::{InMemoryLayoutStore, StoreError};
use citylayout_infra::rpc::LatestResponder;
use citylayout_infra::workers::{RpcWorker, WorkerHandle};
use citylayout_infra::{LayoutService, LayoutServiceError, ServiceConfig};
#[cfg(feature = "redis")]
use citylayout_infra::{
    broadcast::RedisBroadcaster,
    layout_store::PostgresLayoutStore,
    rpc::{RedisRequestConsumer, RedisTransportError},
};

const RPC_WORKER_NAME: &str = "rpc-latest";

type InMemoryLayoutService = LayoutService<Arc<InMemoryLayoutStore>, Arc<InMemoryBroadcaster>>;

#[cfg(feature = "redis")]
type PersistentLayoutService = LayoutService<Arc<PostgresLayoutStore>, Arc<RedisBroadcaster>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("layout store: {0}")]
    Store(#[from] StoreError),

    #[error("broadcast: {0}")]
    Broadcast(#[from] BroadcastError),

    #[cfg(feature = "redis")]
    #[error("rpc transport: {0}")]
    Rpc(#[from] RedisTransportError),

    #[cfg(feature = "redis")]
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),
}

#[derive(Clone)]
pub enum AppServices {
    InMemory {
        layouts: Arc<InMemoryLayoutService>,
        broadcaster: Arc<InMemoryBroadcaster>,
        broker: InMemoryRpcBroker,
    },
    #[cfg(feature = "redis")]
    Persistent {
        layouts: Arc<PersistentLayoutService>,
        redis: redis::Client,
    },
}

pub async fn build_services(config: &ServiceConfig) -> Result<AppServices, ServicesError> {
    if config.use_persistent_stores {
        #[cfg(feature = "redis")]
        {
            return build_persistent_services(config).await;
        }
        #[cfg(not(feature = "redis"))]
        {
            tracing::warn!(
                "USE_PERSISTENT_STORES=true but redis feature not enabled, falling back to in-memory"
            );
        }
    }

    Ok(AppServices::in_memory())
}

#[cfg(feature = "redis")]
async fn build_persistent_services(config: &ServiceConfig) -> Result<AppServices, ServicesError> {
    let database_url = config
        .database_url
        .as_deref()
        .ok_or_else(|| StoreError::Unavailable("DATABASE_URL is not set".to_string()))?;

    let store = Arc::new(PostgresLayoutStore::connect(database_url, config.db).await?);
    store.ensure_schema().await?;

    let redis = redis::Client::open(config.redis_url.as_str())?;
    let broadcaster = Arc::new(
        RedisBroadcaster::connect(redis.clone(), config.layout_exchange.clone(), config.broadcast_max_len)
            .await?,
    );

    info!(exchange = %config.layout_exchange, "persistent layout services ready");

    Ok(AppServices::Persistent {
        layouts: Arc::new(LayoutService::new(store, broadcaster)),
        redis,
    })
}

impl AppServices {
    pub fn in_memory() -> Self {
        let broadcaster = Arc::new(InMemoryBroadcaster::new());
        Self::InMemory {
            layouts: Arc::new(LayoutService::new(
                Arc::new(InMemoryLayoutStore::new()),
                broadcaster.clone(),
            )),
            broadcaster,
            broker: InMemoryRpcBroker::new(),
        }
    }

    pub async fn upsert(
        &self,
        owner: OwnerId,
        entity: LayoutId,
        payload: Payload,
    ) -> Result<LayoutRecord, LayoutServiceError> {
        match self {
            AppServices::InMemory { layouts, .. } => layouts.upsert(owner, entity, payload).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { layouts, .. } => layouts.upsert(owner, entity, payload).await,
        }
    }

    pub async fn remove(&self, owner: OwnerId, entity: LayoutId) -> Result<(), LayoutServiceError> {
        match self {
            AppServices::InMemory { layouts, .. } => layouts.remove(owner, entity).await,
            #[cfg(feature = "redis")]
            AppServices::Persistent { layouts, .. } => layouts.remove(owner, entity).await,
        }
    }

    /// Start the latest-layouts responder on the configured transport.
    pub async fn spawn_rpc_worker(&self, config: &ServiceConfig) -> Result<WorkerHandle, ServicesError> {
        let handle = match self {
            AppServices::InMemory { layouts, broker, .. } => {
                let responder = LatestResponder::new(layouts.store().clone(), broker.consumer())
                    .with_poll_interval(config.rpc_poll_interval);
                RpcWorker::spawn(RPC_WORKER_NAME, responder)
            }
            #[cfg(feature = "redis")]
            AppServices::Persistent { layouts, redis } => {
                let consumer = RedisRequestConsumer::connect(redis, config.rpc_queue_settings()).await?;
                let responder = LatestResponder::new(layouts.store().clone(), consumer)
                    .with_poll_interval(config.rpc_poll_interval);
                RpcWorker::spawn(RPC_WORKER_NAME, responder)
            }
        };

        info!(queue = %config.rpc_queue, "rpc responder started");
        Ok(handle)
    }
}
