use crate::web::{handlers, AppState};
use anyhow::Result;
use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub async fn start_web_server(state: AppState) -> Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        // === LIVE DASHBOARD READS ===
        .route("/api/live-metrics", get(handlers::get_live_metrics))
        .route("/api/server/{id}/metrics", get(handlers::get_server_metrics))
        .route(
            "/api/server/{id}/metric-history",
            get(handlers::get_metric_history),
        )
        .route("/api/server/{id}/disk-io", get(handlers::get_disk_io))
        .route("/api/server/{id}/network-io", get(handlers::get_network_io))
        .route(
            "/api/server/{id}/anomaly-status",
            get(handlers::get_anomaly_status),
        )
        // === HEARTBEAT INGEST ===
        .route("/api/heartbeat/{id}", post(handlers::post_heartbeat))
        // === ANOMALY ACTIONS ===
        .route(
            "/api/anomaly/{id}/resolve",
            post(handlers::resolve_anomaly),
        )
        .route(
            "/api/anomalies/bulk-resolve",
            post(handlers::bulk_resolve_anomalies),
        )
        // === HOST MANAGEMENT ===
        .route("/api/servers", get(handlers::list_hosts).post(handlers::create_host))
        .route("/api/server/{id}", delete(handlers::delete_host))
        .route(
            "/api/server/{id}/alert-history",
            get(handlers::get_alert_history),
        )
        // === MONITORING CONFIGURATION ===
        .route(
            "/api/server/{id}/thresholds",
            post(handlers::update_thresholds),
        )
        .route(
            "/api/server/{id}/monitored-disks",
            post(handlers::update_monitored_disks),
        )
        .route(
            "/api/server/{id}/monitoring/{action}",
            post(handlers::toggle_monitoring),
        )
        .route(
            "/api/server/{id}/alerts/{action}",
            post(handlers::toggle_alert_suppression),
        )
        // === SERVICE MONITORING ===
        .route("/api/server/{id}/services", get(handlers::list_services))
        .route(
            "/api/server/{id}/services/{name}/monitoring/{action}",
            post(handlers::toggle_service_monitoring),
        )
        // Add middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
