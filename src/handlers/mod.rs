/// HTTP request handlers
use crate::config::Settings;
use crate::domain::{AlertLimit, ReferencePosition};
use crate::errors::{ApiError, ApiResult};
use crate::services::{BoardEntry, QuakeService};
use crate::tracker::SessionInfo;
use axum::{
    extract::{Path, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<QuakeService>,
}

/// Successful response wrapper
#[derive(Serialize)]
pub struct SuccessResponse<T: Serialize> {
    pub ok: bool,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self { ok: true, data }
    }
}

#[derive(Serialize)]
pub struct Health {
    pub status: &'static str,
    pub now: DateTime<Utc>,
    pub sessions: usize,
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        now: Utc::now(),
        sessions: state.service.sessions().len(),
    })
}

/// Recent events with exposure estimates
pub async fn list_quakes(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let items = state.service.list_recent().await?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "items": items })
    ))))
}

/// Start live tracking
pub async fn start_track(
    Path(event_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SuccessResponse<SessionInfo>>> {
    let info = state.service.track(&event_id)?;
    Ok(Json(SuccessResponse::new(info)))
}

/// Start a simulated replay
pub async fn start_simulation(
    Path(event_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SuccessResponse<SessionInfo>>> {
    let info = state.service.simulate(&event_id).await?;
    Ok(Json(SuccessResponse::new(info)))
}

pub async fn cancel_track(
    Path(event_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    state.service.cancel(&event_id)?;
    Ok(Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "cancelled": event_id })
    ))))
}

/// Latest snapshot and outcome for a tracked event
pub async fn track_status(
    Path(event_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SuccessResponse<BoardEntry>>> {
    let entry = state.service.status(&event_id)?;
    Ok(Json(SuccessResponse::new(entry)))
}

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!(SuccessResponse::new(
        serde_json::json!({ "sessions": state.service.sessions() })
    )))
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SuccessResponse<Settings>> {
    Json(SuccessResponse::new(state.service.settings().current()))
}

pub async fn put_position(
    State(state): State<AppState>,
    Json(position): Json<ReferencePosition>,
) -> ApiResult<Json<SuccessResponse<Settings>>> {
    if !(-90.0..=90.0).contains(&position.latitude)
        || !(-180.0..=180.0).contains(&position.longitude)
    {
        return Err(ApiError::InvalidInput(format!(
            "position out of range: ({}, {})",
            position.latitude, position.longitude
        )));
    }
    state.service.settings().set_reference_position(Some(position));
    Ok(Json(SuccessResponse::new(state.service.settings().current())))
}

pub async fn clear_position(State(state): State<AppState>) -> Json<SuccessResponse<Settings>> {
    state.service.settings().set_reference_position(None);
    Json(SuccessResponse::new(state.service.settings().current()))
}

pub async fn put_alert_limit(
    State(state): State<AppState>,
    Json(limit): Json<AlertLimit>,
) -> ApiResult<Json<SuccessResponse<Settings>>> {
    let finite = limit.min_magnitude.is_finite()
        && limit.min_intensity.is_finite()
        && limit.max_distance_km.map(|d| d.is_finite() && d >= 0.0).unwrap_or(true);
    if !finite {
        return Err(ApiError::InvalidInput(
            "alert limit values must be finite and non-negative".to_string(),
        ));
    }
    state.service.settings().set_alert_limit(limit);
    Ok(Json(SuccessResponse::new(state.service.settings().current())))
}
