use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::peer::{PeerId, PeerSession};
use super::registry::{LeaveOutcome, RoomRegistry};
use crate::error::{RelayError, Result};

/// Opaque signalling fields (sdp, candidate, ...) carried next to `roomId`.
pub type Payload = Map<String, Value>;

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    #[serde(rename_all = "camelCase")]
    Join { room_id: String },

    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: String,
        #[serde(flatten)]
        payload: Payload,
    },
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Sent to the joining peer; `count` includes the joiner.
    #[serde(rename_all = "camelCase")]
    Joined { room_id: String, count: usize },

    #[serde(rename_all = "camelCase")]
    NewPeer { room_id: String, peer: PeerId },

    /// Relayed unchanged from the sender.
    #[serde(rename_all = "camelCase")]
    Signal {
        room_id: String,
        #[serde(flatten)]
        payload: Payload,
    },

    #[serde(rename_all = "camelCase")]
    PeerLeft { room_id: String, peer: PeerId },
}

impl ServerMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Joined { .. } => "joined",
            ServerMessage::NewPeer { .. } => "new-peer",
            ServerMessage::Signal { .. } => "signal",
            ServerMessage::PeerLeft { .. } => "peer-left",
        }
    }

    pub fn room_id(&self) -> &str {
        match self {
            ServerMessage::Joined { room_id, .. }
            | ServerMessage::NewPeer { room_id, .. }
            | ServerMessage::Signal { room_id, .. }
            | ServerMessage::PeerLeft { room_id, .. } => room_id,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Decodes one inbound text frame. Anything that is not a JSON object with
/// a known `type` and its required fields is rejected as malformed.
pub fn decode(text: &str) -> Result<ClientMessage> {
    // Tagged enums also accept `[tag, fields..]`; only objects are messages.
    let fields: Map<String, Value> =
        serde_json::from_str(text).map_err(|e| RelayError::malformed(e.to_string()))?;

    ClientMessage::deserialize(Value::Object(fields))
        .map_err(|e| RelayError::malformed(e.to_string()))
}

/// Per-connection front end to the registry. Owns the connection's session
/// and turns decoded client messages into registry operations.
pub struct RelaySignalingHandler {
    registry: Arc<RoomRegistry>,
    session: PeerSession,
}

impl RelaySignalingHandler {
    pub fn new(registry: Arc<RoomRegistry>, channel_capacity: usize) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (session, receiver) = PeerSession::new(channel_capacity);
        (Self { registry, session }, receiver)
    }

    pub fn peer_id(&self) -> PeerId {
        self.session.id()
    }

    pub fn room_id(&self) -> Option<&str> {
        self.session.room_id()
    }

    /// Decodes and handles one text frame. Malformed frames are dropped.
    pub async fn handle_text(&mut self, text: &str) {
        match decode(text) {
            Ok(message) => self.handle_message(message).await,
            Err(e) => {
                tracing::warn!(
                    peer_id = %self.session.id(),
                    error = %e,
                    raw_message = %text,
                    "Dropping malformed signalling message"
                );
            }
        }
    }

    pub async fn handle_message(&mut self, message: ClientMessage) {
        let peer_id = self.session.id();

        let result = match message {
            ClientMessage::Join { room_id } => self
                .registry
                .join(&mut self.session, &room_id)
                .await
                .map(|outcome| {
                    tracing::info!(
                        peer_id = %peer_id,
                        room_id = %room_id,
                        count = outcome.count,
                        notified = outcome.notified,
                        "Peer joined room"
                    );
                }),
            ClientMessage::Signal { room_id, payload } => self
                .registry
                .signal(&self.session, &room_id, payload)
                .await
                .map(|outcome| {
                    tracing::debug!(
                        peer_id = %peer_id,
                        room_id = %room_id,
                        delivered = outcome.delivered,
                        skipped = outcome.skipped,
                        "Relayed signal"
                    );
                }),
        };

        match result {
            Err(e) if e.is_rejected_operation() => {
                tracing::debug!(peer_id = %peer_id, error = %e, "Rejected signalling operation");
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "Signalling operation failed");
            }
            Ok(()) => {}
        }
    }

    /// Leaves the current room, if any. Called once the connection is gone.
    pub async fn cleanup(&mut self) -> Option<LeaveOutcome> {
        let outcome = self.registry.leave(&mut self.session).await;

        if let Some(ref outcome) = outcome {
            tracing::info!(
                peer_id = %self.session.id(),
                room_id = %outcome.room_id,
                remaining = outcome.remaining,
                room_closed = outcome.room_closed,
                "Peer left room"
            );
        }

        outcome
    }
}
