use room_relay::api;
use room_relay::config::{Config, LogFormat};
use room_relay::relay::RoomRegistry;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let (config, problems) = Config::from_env();
    init_tracing(config.log_format);

    for problem in &problems {
        tracing::warn!(error = %problem, "Ignoring invalid configuration value, using default");
    }

    let registry = RoomRegistry::new();
    let routes = api::relay_routes::relay_routes(registry, config.relay.clone());

    let (host, port) = config.bind_address();
    tracing::info!(
        host = ?host,
        port = port,
        channel_capacity = config.relay.channel_capacity,
        "Signalling relay listening"
    );

    warp::serve(routes)
        .run((host, port))
        .await;
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt().json().with_env_filter(filter).init(),
    }
}
