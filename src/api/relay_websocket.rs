use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use warp::ws::{Message, WebSocket};

use crate::relay::{RelaySignalingHandler, RoomRegistry};

pub async fn handle_relay_websocket(
    websocket: WebSocket,
    registry: Arc<RoomRegistry>,
    channel_capacity: usize,
) {
    let (mut signaling_handler, mut rx) = RelaySignalingHandler::new(registry, channel_capacity);
    let peer_id = signaling_handler.peer_id();
    tracing::info!(peer_id = %peer_id, "New signalling connection established");

    let (mut ws_sender, mut ws_receiver) = websocket.split();

    // Drain this peer's outbound queue onto the socket
    let sender_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.to_text() {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(peer_id = %peer_id, error = %e, "Failed to serialize outbound message");
                    continue;
                }
            };

            if let Err(e) = ws_sender.send(Message::text(text)).await {
                tracing::debug!(peer_id = %peer_id, error = %e, "Failed to send WebSocket message");
                break;
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(message) => {
                if message.is_close() {
                    break;
                }
                handle_websocket_message(&mut signaling_handler, message).await;
            }
            Err(e) => {
                tracing::warn!(peer_id = %peer_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    signaling_handler.cleanup().await;
    sender_task.abort();
    tracing::info!(peer_id = %peer_id, "Signalling connection closed");
}

/// Text frames carry signalling messages; pings and binary frames are ignored.
async fn handle_websocket_message(signaling_handler: &mut RelaySignalingHandler, message: Message) {
    if let Ok(text) = message.to_str() {
        tracing::debug!(peer_id = %signaling_handler.peer_id(), "Received message: {}", text);
        signaling_handler.handle_text(text).await;
    }
}
