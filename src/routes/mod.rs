/// Application routes configuration
use crate::handlers::{
    cancel_track, clear_position, get_settings, health, list_quakes, list_sessions,
    put_alert_limit, put_position, start_simulation, start_track, track_status, AppState,
};
use axum::{
    routing::{get, post, put},
    Router,
};

/// Build the application router with all routes
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health))
        // Feed listing
        .route("/quakes", get(list_quakes))
        // Tracking sessions
        .route("/sessions", get(list_sessions))
        .route(
            "/track/:event_id",
            get(track_status).post(start_track).delete(cancel_track),
        )
        .route("/simulate/:event_id", post(start_simulation))
        // Settings
        .route("/settings", get(get_settings))
        .route(
            "/settings/position",
            put(put_position).delete(clear_position),
        )
        .route("/settings/alert-limit", put(put_alert_limit))
        .with_state(state)
}
