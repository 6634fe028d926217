use thiserror::Error;

/// Error types for the signalling relay
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound frame errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Failed to serialize message: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Room membership errors
    #[error("Room identifier must not be empty")]
    EmptyRoomId,

    #[error("Peer {peer_id} already joined room {room_id}")]
    AlreadyJoined { peer_id: String, room_id: String },

    #[error("Peer {peer_id} is not in room {room_id}")]
    NotInRoom { peer_id: String, room_id: String },

    /// Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Convenience type alias for Results using RelayError
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// Helper to create MalformedMessage errors
    pub fn malformed(msg: impl Into<String>) -> Self {
        RelayError::MalformedMessage(msg.into())
    }

    /// Invalid operations are rejected as no-ops and never reach the client.
    pub fn is_rejected_operation(&self) -> bool {
        matches!(
            self,
            RelayError::EmptyRoomId | RelayError::AlreadyJoined { .. } | RelayError::NotInRoom { .. }
        )
    }
}
