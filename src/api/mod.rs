pub mod relay_routes;
pub mod relay_websocket;
