use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use citylayout_events::RequestConsumer;

use crate::layout_store::LayoutStore;
use crate::rpc::LatestResponder;

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    ///
    /// A request being handled is finished and acknowledged first.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(()).await;
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(error = %err, "worker task ended abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(JoinHandle::is_finished)
    }
}

/// Long-lived RPC responder task.
///
/// - Handles one request at a time (the consumer's prefetch is one)
/// - Checks for shutdown between requests; each poll waits at most one
///   poll interval, so shutdown is noticed promptly
/// - Transport errors are logged and followed by one poll interval of
///   back-off; they never end the loop
#[derive(Debug)]
pub struct RpcWorker;

impl RpcWorker {
    /// Spawn the responder on the current tokio runtime.
    pub fn spawn<S, Q>(name: &'static str, responder: LatestResponder<S, Q>) -> WorkerHandle
    where
        S: LayoutStore + 'static,
        Q: RequestConsumer + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);
        let join = tokio::spawn(worker_loop(name, responder, shutdown_rx));

        WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        }
    }
}

async fn worker_loop<S, Q>(
    name: &'static str,
    mut responder: LatestResponder<S, Q>,
    mut shutdown_rx: mpsc::Receiver<()>,
) where
    S: LayoutStore,
    Q: RequestConsumer,
{
    info!(worker = name, "rpc worker ready, awaiting requests");

    loop {
        // Shutdown check (non-blocking)
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        match responder.run_once().await {
            Ok(Some(outcome)) => info!(worker = name, ?outcome, "rpc request handled"),
            Ok(None) => continue,
            Err(err) => {
                warn!(worker = name, error = %err, "rpc transport error; backing off");
                tokio::time::sleep(responder.poll_interval()).await;
            }
        }
    }

    info!(worker = name, "rpc worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use citylayout_core::OwnerId;
    use citylayout_events::{InMemoryRpcBroker, RequestEnvelope};

    use super::*;
    use crate::layout_store::InMemoryLayoutStore;

    #[tokio::test]
    async fn worker_answers_until_shut_down() {
        let broker = InMemoryRpcBroker::new();
        let mut replies = broker.reply_queue("caller").unwrap();
        let responder = LatestResponder::new(Arc::new(InMemoryLayoutStore::new()), broker.consumer())
            .with_poll_interval(Duration::from_millis(20));
        let handle = RpcWorker::spawn("test-rpc", responder);

        broker
            .publish(RequestEnvelope {
                reply_to: Some("caller".to_string()),
                correlation_id: Some("c".to_string()),
                content_type: None,
                body: format!(r#"{{"owner":"{}"}}"#, OwnerId::new()).into_bytes(),
            })
            .unwrap();

        let reply = replies.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply.correlation_id.as_deref(), Some("c"));

        tokio::time::timeout(Duration::from_secs(2), handle.shutdown())
            .await
            .unwrap();
        assert_eq!(broker.acknowledged(), 1);
    }

    #[tokio::test]
    async fn worker_survives_malformed_requests() {
        let broker = InMemoryRpcBroker::new();
        let mut replies = broker.reply_queue("caller").unwrap();
        let responder = LatestResponder::new(Arc::new(InMemoryLayoutStore::new()), broker.consumer())
            .with_poll_interval(Duration::from_millis(20));
        let handle = RpcWorker::spawn("test-rpc", responder);

        for body in [b"garbage".to_vec(), format!(r#"{{"owner":"{}"}}"#, OwnerId::new()).into_bytes()] {
            broker
                .publish(RequestEnvelope {
                    reply_to: Some("caller".to_string()),
                    correlation_id: Some("c".to_string()),
                    content_type: None,
                    body,
                })
                .unwrap();
        }

        // Only the well-formed request is answered, and the worker is still alive for it.
        let reply = replies.recv_timeout(Duration::from_secs(2)).await.unwrap();
        assert_eq!(reply.body, b"[]");
        assert!(!handle.is_finished());

        handle.shutdown().await;
        assert_eq!(broker.acknowledged(), 2);
    }
}
