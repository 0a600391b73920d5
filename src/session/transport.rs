//! Broadcast transport seam.
//!
//! A feed delivers change events and connection-status transitions for one
//! board over a channel-backed subscription. No delivery guarantee is
//! assumed; reconciliation exists to repair whatever the feed drops.

use crossbeam::channel::{Receiver, Sender, unbounded};
use thiserror::Error;

use crate::core::BoardId;
use crate::error::Transience;
use crate::session::event::{ChangeEvent, ConnectionStatus, FeedMessage};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("subscribe to {board} failed: {reason}")]
    SubscribeFailed { board: BoardId, reason: String },
    #[error("feed channel closed")]
    ChannelClosed,
}

impl TransportError {
    pub fn transience(&self) -> Transience {
        match self {
            TransportError::SubscribeFailed { .. } => Transience::Retryable,
            TransportError::ChannelClosed => Transience::Retryable,
        }
    }
}

/// Receiving half of a feed subscription.
pub struct EventSubscription {
    rx: Receiver<FeedMessage>,
}

impl EventSubscription {
    /// Build a connected sender/subscription pair. Transport
    /// implementations push into the sender; the session drains the
    /// subscription on its own thread.
    pub fn channel() -> (FeedSender, EventSubscription) {
        let (tx, rx) = unbounded();
        (FeedSender { tx }, EventSubscription { rx })
    }

    /// Drain one pending message without blocking.
    pub fn try_recv(&self) -> Option<FeedMessage> {
        self.rx.try_recv().ok()
    }

    /// Wait up to `timeout` for the next message. None on timeout or a
    /// disconnected sender.
    pub fn recv_timeout(&self, timeout: std::time::Duration) -> Option<FeedMessage> {
        self.rx.recv_timeout(timeout).ok()
    }
}

/// Sending half handed to transport implementations.
#[derive(Clone)]
pub struct FeedSender {
    tx: Sender<FeedMessage>,
}

impl FeedSender {
    pub fn send_event(&self, event: ChangeEvent) -> bool {
        self.tx.send(FeedMessage::Event(event)).is_ok()
    }

    pub fn send_status(&self, status: ConnectionStatus) -> bool {
        self.tx.send(FeedMessage::Status(status)).is_ok()
    }
}

/// A live subscription handle.
///
/// `take_subscription` yields the receiving half exactly once; `publish`
/// is fire-and-forget best-effort (retried delivery is reconciliation's
/// job, not the publisher's); `unsubscribe` must release transport-side
/// resources so repeated reconnects never stack duplicate listeners.
pub trait FeedHandle: Send {
    fn take_subscription(&mut self) -> Option<EventSubscription>;
    fn publish(&self, changes: &[ChangeEvent]);
    fn unsubscribe(self: Box<Self>);
}

/// Broadcast transport collaborator.
pub trait ChangeFeed: Send + Sync {
    fn subscribe(&self, board: &BoardId) -> Result<Box<dyn FeedHandle>, TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::event::ConnectionStatus;

    #[test]
    fn channel_delivers_in_order() {
        let (tx, rx) = EventSubscription::channel();
        assert!(tx.send_status(ConnectionStatus::Subscribed));
        assert!(tx.send_status(ConnectionStatus::Closed));

        assert_eq!(
            rx.try_recv(),
            Some(FeedMessage::Status(ConnectionStatus::Subscribed))
        );
        assert_eq!(
            rx.try_recv(),
            Some(FeedMessage::Status(ConnectionStatus::Closed))
        );
        assert_eq!(rx.try_recv(), None);
    }
}
