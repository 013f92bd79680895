//! HTTP server implementation using Axum.

use axum::{
    Router,
    routing::{get, post, put},
};
use std::sync::Arc;
use tempo_core::config::ServerConfig;
use tempo_scheduler::ScheduleService;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    /// Scheduling engine; every call runs on the blocking pool.
    pub service: Arc<ScheduleService>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(service: Arc<ScheduleService>) -> Self {
        Self {
            service,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/events",
            get(super::routes::list_events).post(super::routes::create_event),
        )
        .route("/api/v1/events/conflicts", post(super::routes::check_conflicts))
        .route(
            "/api/v1/events/{id}",
            get(super::routes::get_event)
                .put(super::routes::update_event)
                .delete(super::routes::delete_event),
        )
        .route(
            "/api/v1/events/{id}/status",
            axum::routing::patch(super::routes::update_status),
        )
        .route(
            "/api/v1/events/{id}/attendees",
            get(super::routes::list_attendees).post(super::routes::add_attendee),
        )
        .route(
            "/api/v1/events/{id}/attendees/{attendee_id}",
            put(super::routes::update_attendee).delete(super::routes::remove_attendee),
        )
        .route("/api/v1/calendar", get(super::routes::calendar_view));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(super::routes::health_check))
        .merge(api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Start the HTTP server.
pub async fn start_server(config: &ServerConfig, service: Arc<ScheduleService>) -> anyhow::Result<()> {
    let app = build_router(AppState::new(service));

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Tempo gateway listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("🛑 Shutting down gateway");
}
