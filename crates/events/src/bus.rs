//! Subscription handle shared by the broadcast and RPC transports.
//!
//! A subscription is the receiving end of a fan-out: each subscriber gets its
//! own copy of every message routed to it. Delivery is best-effort and
//! at-least-once; consumers must tolerate duplicates.

use std::time::Duration;

use tokio::sync::mpsc;

/// Why a bounded wait on a [`Subscription`] returned without a message.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// Nothing arrived before the deadline.
    Timeout,
    /// The sending side is gone; nothing will ever arrive.
    Disconnected,
}

/// Receiving end of a message stream.
///
/// ## Usage Pattern
///
/// ```ignore
/// let mut sub = broadcaster.subscribe(TopicPattern::parse("#")?);
///
/// loop {
///     match sub.recv_timeout(Duration::from_secs(1)).await {
///         Ok(notification) => process(notification),
///         Err(RecvTimeoutError::Timeout) => continue,  // check for shutdown
///         Err(RecvTimeoutError::Disconnected) => break,
///     }
/// }
/// ```
///
/// Subscriptions are designed for single-task consumption.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: mpsc::UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: mpsc::UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the sender is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Take a message if one is already buffered.
    pub fn try_recv(&mut self) -> Result<M, mpsc::error::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Wait for up to `timeout` for the next message.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<M, RecvTimeoutError> {
        match tokio::time::timeout(timeout, self.receiver.recv()).await {
            Ok(Some(message)) => Ok(message),
            Ok(None) => Err(RecvTimeoutError::Disconnected),
            Err(_) => Err(RecvTimeoutError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_timeout_distinguishes_idle_from_closed() {
        let (tx, rx) = mpsc::unbounded_channel::<u32>();
        let mut sub = Subscription::new(rx);

        assert_eq!(
            sub.recv_timeout(Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Timeout)
        );

        tx.send(7).unwrap();
        assert_eq!(sub.recv_timeout(Duration::from_millis(10)).await, Ok(7));

        drop(tx);
        assert_eq!(
            sub.recv_timeout(Duration::from_millis(10)).await,
            Err(RecvTimeoutError::Disconnected)
        );
    }
}
