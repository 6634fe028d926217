use std::sync::Arc;
use warp::Filter;

use super::relay_websocket;
use crate::config::RelayConfig;
use crate::relay::RoomRegistry;

pub const LANDING_PAGE: &str = "WebSocket signalling server is running.\n";

/// All routes served by the relay: the signalling socket, the landing page
/// and the health check.
pub fn relay_routes(
    registry: Arc<RoomRegistry>,
    relay_config: RelayConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    relay_websocket_route(registry.clone(), relay_config)
        .or(landing_page())
        .or(relay_health_check(registry))
}

/// WebSocket upgrade on `/`
pub fn relay_websocket_route(
    registry: Arc<RoomRegistry>,
    relay_config: RelayConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let channel_capacity = relay_config.channel_capacity;

    warp::path::end()
        .and(warp::ws())
        .and(with_registry(registry))
        .map(move |ws: warp::ws::Ws, registry: Arc<RoomRegistry>| {
            ws.on_upgrade(move |websocket| {
                relay_websocket::handle_relay_websocket(websocket, registry, channel_capacity)
            })
        })
}

/// Plain `GET /` so that browsing to the server does not answer
/// "Upgrade Required".
pub fn landing_page() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end().and(warp::get()).map(|| LANDING_PAGE)
}

pub fn relay_health_check(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry))
        .then(|registry: Arc<RoomRegistry>| async move {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Room Relay",
                "version": env!("CARGO_PKG_VERSION"),
                "rooms": registry.room_count().await,
                "peers": registry.peer_count().await,
            }))
        })
}

fn with_registry(
    registry: Arc<RoomRegistry>,
) -> impl Filter<Extract = (Arc<RoomRegistry>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}
