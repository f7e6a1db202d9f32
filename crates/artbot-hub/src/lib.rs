pub mod alerts;
pub mod api;
pub mod auth;
pub mod channel;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod health;
pub mod history;
pub mod hub;
pub mod logs;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;
pub mod ws;

use std::time::{Duration, Instant};

use axum::Router;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;

use config::HubConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub fn build_app(config: HubConfig) -> (Router<()>, AppState) {
    let state = AppState::new(config);

    let api_routes = Router::new()
        .route("/robots", get(api::list_robots))
        .route(
            "/robots/{robot_id}",
            get(api::get_robot).delete(api::delete_robot),
        )
        .route("/robots/{robot_id}/logs", get(api::robot_logs))
        .route("/robots/{robot_id}/commands", get(api::robot_command_history))
        .route("/logs", get(api::fleet_logs))
        .route("/commands", post(api::post_command))
        .route("/commands/pending", get(api::list_pending))
        .route("/commands/stats", get(api::command_stats))
        .route("/agents", get(api::list_agents))
        .route("/agents/stats/connections", get(api::connection_stats))
        .route("/agents/{agent_id}", get(api::get_agent))
        .route("/exhibition", get(api::exhibition_status));

    // Agent sockets sit behind the shared-token check; dashboards trust the
    // role header set by the upstream gate.
    let agent_routes = Router::new()
        .route("/ws/agent/{agent_id}", get(ws::agent_ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_agent_token,
        ));

    let app = Router::new()
        .merge(agent_routes)
        .route("/ws/dashboard", get(ws::dashboard_ws_handler))
        .nest("/api/v1", api_routes)
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    (app, state)
}

/// Start the command-timeout and agent-liveness sweepers. Both stop when
/// `state.shutdown` is cancelled.
pub fn spawn_background_tasks(state: &AppState) {
    let sweep_every = Duration::from_millis(state.config.commands.sweep_interval_ms.max(10));
    let hub = std::sync::Arc::clone(&state.hub);
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    let expired = hub.expire_pending(Instant::now()).await;
                    if !expired.is_empty() {
                        tracing::debug!(count = expired.len(), "Expired pending commands");
                    }
                },
            }
        }
        tracing::info!("Command timeout sweeper stopped");
    });

    let check_every = Duration::from_secs(state.config.fleet.liveness_check_interval_secs.max(1));
    let hub = std::sync::Arc::clone(&state.hub);
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(check_every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    hub.sweep_stale_agents(Instant::now()).await;
                },
            }
        }
        tracing::info!("Liveness sweeper stopped");
    });
}
