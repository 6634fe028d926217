use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use uuid::Uuid;

use super::signaling::ServerMessage;

/// Server-assigned identity of one connection, stable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PeerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Result of enqueueing one message for one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Queued,
    QueueFull,
    Closed,
}

impl Delivery {
    pub fn is_queued(self) -> bool {
        matches!(self, Delivery::Queued)
    }
}

/// The registry's view of a connected peer: its id and the sending half of
/// its outbound queue. Holding a handle never keeps the connection open.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: PeerId,
    sender: mpsc::Sender<ServerMessage>,
}

impl PeerHandle {
    pub fn id(&self) -> PeerId {
        self.id
    }

    /// Enqueues without waiting. A full or closed queue skips this delivery.
    pub fn deliver(&self, message: ServerMessage) -> Delivery {
        match self.sender.try_send(message) {
            Ok(()) => Delivery::Queued,
            Err(TrySendError::Full(message)) => {
                tracing::warn!(
                    peer_id = %self.id,
                    room_id = %message.room_id(),
                    message_type = message.kind(),
                    "Outbound queue full, skipping delivery"
                );
                Delivery::QueueFull
            }
            Err(TrySendError::Closed(message)) => {
                tracing::debug!(
                    peer_id = %self.id,
                    room_id = %message.room_id(),
                    message_type = message.kind(),
                    "Outbound queue closed, skipping delivery"
                );
                Delivery::Closed
            }
        }
    }
}

/// Connection-owned state: the peer's handle plus the room it occupies.
/// Only the registry moves the room pointer.
#[derive(Debug)]
pub struct PeerSession {
    handle: PeerHandle,
    room_id: Option<String>,
}

impl PeerSession {
    /// Creates a session with a fresh id and an outbound queue of
    /// `capacity` messages. The receiver belongs to the connection's writer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let session = Self {
            handle: PeerHandle {
                id: PeerId::new(),
                sender,
            },
            room_id: None,
        };
        (session, receiver)
    }

    pub fn id(&self) -> PeerId {
        self.handle.id
    }

    pub fn handle(&self) -> &PeerHandle {
        &self.handle
    }

    pub fn room_id(&self) -> Option<&str> {
        self.room_id.as_deref()
    }

    pub(crate) fn set_room(&mut self, room_id: String) {
        self.room_id = Some(room_id);
    }

    pub(crate) fn take_room(&mut self) -> Option<String> {
        self.room_id.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(count: usize) -> ServerMessage {
        ServerMessage::Joined {
            room_id: "lobby".to_string(),
            count,
        }
    }

    #[test]
    fn test_peer_ids_are_unique() {
        let (a, _rx_a) = PeerSession::new(4);
        let (b, _rx_b) = PeerSession::new(4);
        assert_ne!(a.id(), b.id());
        assert_eq!(a.handle().id(), a.id());
    }

    #[test]
    fn test_new_session_has_no_room() {
        let (session, _rx) = PeerSession::new(4);
        assert!(session.room_id().is_none());
    }

    #[tokio::test]
    async fn test_deliver_queues_message() {
        let (session, mut rx) = PeerSession::new(4);
        assert_eq!(session.handle().deliver(joined(1)), Delivery::Queued);
        assert_eq!(rx.recv().await, Some(joined(1)));
    }

    #[test]
    fn test_deliver_to_full_queue_is_skipped() {
        let (session, _rx) = PeerSession::new(1);
        assert!(session.handle().deliver(joined(1)).is_queued());
        assert_eq!(session.handle().deliver(joined(2)), Delivery::QueueFull);
    }

    #[test]
    fn test_deliver_to_closed_queue_is_skipped() {
        let (session, rx) = PeerSession::new(4);
        drop(rx);
        assert_eq!(session.handle().deliver(joined(1)), Delivery::Closed);
    }

    #[test]
    fn test_peer_id_serializes_as_plain_string() {
        let (session, _rx) = PeerSession::new(1);
        let value = serde_json::to_value(session.id()).unwrap();
        assert_eq!(value, serde_json::Value::String(session.id().to_string()));
    }
}
