use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use artbot_hub::config::HubConfig;
use artbot_hub::{build_app, spawn_background_tasks};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("ARTBOT_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let config = HubConfig::load();
    if let Err(e) = config.validate() {
        tracing::error!("Invalid configuration: {e}");
        std::process::exit(1);
    }
    let listen_addr = config.listen_addr.clone();

    let (app, state) = build_app(config);
    spawn_background_tasks(&state);

    let listener = match tokio::net::TcpListener::bind(&listen_addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {listen_addr}: {e}");
            std::process::exit(1);
        },
    };
    tracing::info!("Artbot hub listening on {listen_addr}");

    let shutdown = state.shutdown.clone();
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {e}");
        }
        tracing::info!("Shutting down");
        shutdown.cancel();
    })
    .await;

    if let Err(e) = served {
        tracing::error!("Server error: {e}");
        std::process::exit(1);
    }
}
