//! HTTP control surface
//!
//! Webhook endpoints for remote buttons (Stream Deck, phone shortcuts) plus
//! the settings toggles the tray menu offers.

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::config::GlobalSettings;
use crate::control::{Command, Controller};

/// Shared state for API handlers
pub struct ApiState {
    pub controller: Controller,
}

/// API error response
#[derive(Debug, Serialize)]
struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
}

impl ApiError {
    fn internal(error: impl std::fmt::Display) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: error.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Response for toggle endpoints
#[derive(Debug, Serialize)]
struct ToggleResponse {
    setting: String,
    value: bool,
}

/// Build the API router
pub fn build_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/togglemute", post(toggle_mute))
        .route("/playpause", post(play_pause))
        .route("/api/settings", get(get_settings))
        .route("/api/toggle/:setting", post(toggle_setting))
        .route("/api/health", get(health_check))
        .with_state(state)
}

/// POST /togglemute - Toggle mute on the default output device
async fn toggle_mute(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let muted = state
        .controller
        .backend()
        .toggle_output_mute()
        .await
        .map_err(|e| {
            error!("Failed to toggle mute: {}", e);
            ApiError::internal(e)
        })?;

    info!("Default output muted: {}", muted);
    Ok(Json(serde_json::json!({ "muted": muted })))
}

/// POST /playpause - Send a media play/pause key press
async fn play_pause(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.controller.backend().play_pause().await.map_err(|e| {
        error!("Failed to send play/pause: {}", e);
        ApiError::internal(e)
    })?;

    Ok(Json(serde_json::json!({})))
}

/// GET /api/settings - Current settings file contents
async fn get_settings(
    State(state): State<Arc<ApiState>>,
) -> Result<Json<GlobalSettings>, ApiError> {
    state
        .controller
        .settings()
        .await
        .map(Json)
        .map_err(|e| ApiError::internal(format!("{:#}", e)))
}

/// POST /api/toggle/:setting - Flip a setting or profile group
async fn toggle_setting(
    Path(setting): Path<String>,
    State(state): State<Arc<ApiState>>,
) -> Result<Json<ToggleResponse>, ApiError> {
    let Ok(command) = setting.parse::<Command>();

    let value = state.controller.apply(&command).await.map_err(|e| ApiError {
        status: StatusCode::BAD_REQUEST,
        error: format!("{:#}", e),
    })?;

    Ok(Json(ToggleResponse { setting, value }))
}

/// GET /api/health - Health check endpoint
async fn health_check() -> &'static str {
    "ok"
}

/// Start the API server
pub async fn start_server(state: Arc<ApiState>, port: u16) -> Result<()> {
    let router = build_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting control API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind API server")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
