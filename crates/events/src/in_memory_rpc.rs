//! In-memory RPC broker for tests/dev.
//!
//! Models a shared, non-exclusive work queue with explicit acknowledgment and
//! a prefetch of one per consumer, plus named reply queues. A consumer that is
//! dropped while holding an unacknowledged delivery puts it back at the head
//! of the queue, flagged as redelivered (what a broker does when a worker's
//! connection dies).

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Notify, mpsc};
use tracing::debug;
use uuid::Uuid;

use crate::bus::{RecvTimeoutError, Subscription};
use crate::rpc::{Delivery, Reply, ReplyChannel, RequestConsumer, RequestEnvelope};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InMemoryRpcError {
    #[error("broker state lock poisoned")]
    Poisoned,

    #[error("previous delivery {0} has not been acknowledged")]
    PrefetchExceeded(String),

    #[error("delivery {0} is not held by this consumer")]
    UnknownDelivery(String),

    #[error("reply queue {0} was closed")]
    ReplyQueueClosed(String),
}

#[derive(Debug, Clone)]
struct Queued {
    tag: u64,
    redelivered: bool,
    envelope: RequestEnvelope,
}

impl Queued {
    fn to_delivery(&self) -> Delivery {
        Delivery::new(self.tag.to_string(), self.redelivered, self.envelope.clone())
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    queue: VecDeque<Queued>,
    next_tag: u64,
    acknowledged: u64,
    reply_queues: HashMap<String, mpsc::UnboundedSender<Reply>>,
}

#[derive(Debug, Default)]
struct BrokerInner {
    state: Mutex<BrokerState>,
    ready: Notify,
}

/// Shared handle to one in-memory broker. Clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRpcBroker {
    inner: Arc<BrokerInner>,
}

impl InMemoryRpcBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> Result<MutexGuard<'_, BrokerState>, InMemoryRpcError> {
        self.inner.state.lock().map_err(|_| InMemoryRpcError::Poisoned)
    }

    /// Put a request on the work queue.
    pub fn publish(&self, envelope: RequestEnvelope) -> Result<(), InMemoryRpcError> {
        {
            let mut state = self.state()?;
            state.next_tag += 1;
            let tag = state.next_tag;
            state.queue.push_back(Queued {
                tag,
                redelivered: false,
                envelope,
            });
        }
        self.inner.ready.notify_one();
        Ok(())
    }

    /// A new worker-side consumer on the shared queue.
    pub fn consumer(&self) -> InMemoryConsumer {
        InMemoryConsumer {
            broker: self.clone(),
            in_flight: None,
        }
    }

    /// Declare a named reply queue and subscribe to it.
    ///
    /// Declaring an existing name replaces the previous subscriber.
    pub fn reply_queue(&self, name: impl Into<String>) -> Result<Subscription<Reply>, InMemoryRpcError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.state()?.reply_queues.insert(name.into(), tx);
        Ok(Subscription::new(rx))
    }

    /// A caller-side channel with a freshly named private reply queue.
    pub fn reply_channel(&self) -> Result<InMemoryReplyChannel, InMemoryRpcError> {
        let address = format!("rpc.reply.{}", Uuid::now_v7());
        let replies = self.reply_queue(address.clone())?;
        Ok(InMemoryReplyChannel {
            broker: self.clone(),
            address,
            replies,
        })
    }

    /// Requests waiting in the queue (not counting ones held by consumers).
    pub fn queued(&self) -> usize {
        self.state().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Total number of acknowledged deliveries.
    pub fn acknowledged(&self) -> u64 {
        self.state().map(|s| s.acknowledged).unwrap_or(0)
    }

    fn take_next(&self) -> Result<Option<Queued>, InMemoryRpcError> {
        Ok(self.state()?.queue.pop_front())
    }

    fn requeue(&self, mut queued: Queued) {
        queued.redelivered = true;
        if let Ok(mut state) = self.inner.state.lock() {
            state.queue.push_front(queued);
        }
        self.inner.ready.notify_one();
    }

    fn route_reply(&self, reply_to: &str, reply: Reply) -> Result<(), InMemoryRpcError> {
        let mut state = self.state()?;
        let delivered = match state.reply_queues.get(reply_to) {
            Some(tx) => tx.send(reply).is_ok(),
            None => {
                // Same as a broker's default exchange: unroutable replies vanish.
                debug!(reply_to, "reply to undeclared queue dropped");
                return Ok(());
            }
        };
        if !delivered {
            state.reply_queues.remove(reply_to);
        }
        Ok(())
    }
}

/// Worker-side consumer with a prefetch of one.
#[derive(Debug)]
pub struct InMemoryConsumer {
    broker: InMemoryRpcBroker,
    in_flight: Option<Queued>,
}

#[async_trait]
impl RequestConsumer for InMemoryConsumer {
    type Error = InMemoryRpcError;

    async fn poll(&mut self, wait: Duration) -> Result<Option<Delivery>, Self::Error> {
        if let Some(held) = &self.in_flight {
            return Err(InMemoryRpcError::PrefetchExceeded(held.tag.to_string()));
        }

        let deadline = tokio::time::Instant::now() + wait;
        loop {
            let ready = self.broker.inner.ready.notified();
            if let Some(queued) = self.broker.take_next()? {
                let delivery = queued.to_delivery();
                self.in_flight = Some(queued);
                return Ok(Some(delivery));
            }
            if tokio::time::timeout_at(deadline, ready).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn reply(&mut self, reply_to: &str, reply: Reply) -> Result<(), Self::Error> {
        self.broker.route_reply(reply_to, reply)
    }

    async fn ack(&mut self, delivery: Delivery) -> Result<(), Self::Error> {
        let held = self.in_flight.as_ref().map(|q| q.tag.to_string());
        if held.as_deref() != Some(delivery.tag()) {
            return Err(InMemoryRpcError::UnknownDelivery(delivery.tag().to_string()));
        }

        self.in_flight = None;
        self.broker.state()?.acknowledged += 1;
        Ok(())
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        if let Some(queued) = self.in_flight.take() {
            debug!(tag = queued.tag, "consumer dropped with unacked delivery; requeueing");
            self.broker.requeue(queued);
        }
    }
}

/// Caller-side channel bound to a private reply queue.
#[derive(Debug)]
pub struct InMemoryReplyChannel {
    broker: InMemoryRpcBroker,
    address: String,
    replies: Subscription<Reply>,
}

#[async_trait]
impl ReplyChannel for InMemoryReplyChannel {
    type Error = InMemoryRpcError;

    fn address(&self) -> &str {
        &self.address
    }

    async fn send_request(&mut self, request: RequestEnvelope) -> Result<(), Self::Error> {
        self.broker.publish(request)
    }

    async fn next_reply(&mut self, wait: Duration) -> Result<Option<Reply>, Self::Error> {
        match self.replies.recv_timeout(wait).await {
            Ok(reply) => Ok(Some(reply)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(InMemoryRpcError::ReplyQueueClosed(self.address.clone()))
            }
        }
    }
}

impl Drop for InMemoryReplyChannel {
    fn drop(&mut self) {
        if let Ok(mut state) = self.broker.inner.state.lock() {
            state.reply_queues.remove(&self.address);
        }
    }
}
