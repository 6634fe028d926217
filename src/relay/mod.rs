//! Room membership and signal relay.
//!
//! Clients join named rooms and exchange opaque handshake messages with the
//! other members. The relay never looks inside a signal; it only decides
//! who receives it.

pub mod peer;
mod registry;
mod signaling;

pub use peer::{Delivery, PeerHandle, PeerId, PeerSession};
pub use registry::{JoinOutcome, LeaveOutcome, RoomRegistry, SignalOutcome};
pub use signaling::{decode, ClientMessage, Payload, RelaySignalingHandler, ServerMessage};
