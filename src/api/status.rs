//! Command surface & status snapshot (§6): load/create/start/stop/restart/
//! remove/enumerate/query, exposed as a small JSON HTTP API. Grounded in
//! `brew-lab-thaumic-cast`'s typed `AppState` + serde response pattern,
//! generalized from its Sonos-control JSON shapes to instance status
//! snapshots.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::api::AdminState;
use crate::instance::StatusSnapshot;

#[derive(Serialize)]
pub struct StatusResponse {
    pub name: String,
    pub state: String,
    pub port: u16,
    pub path: String,
    pub source_type: &'static str,
    pub client_count: usize,
    pub uptime_seconds: Option<u64>,
    pub error_message: Option<String>,
    pub video_codec: String,
    pub audio_codec: String,
    pub bitrate: String,
    pub framerate: u32,
    /// Supplemented cache diagnostics (SPEC_FULL §10), not in the original
    /// status snapshot shape but useful for an operator dashboard.
    pub closed_gop_count: usize,
    pub current_frame_count: usize,
    pub cache_size_bytes: usize,
}

impl From<StatusSnapshot> for StatusResponse {
    fn from(s: StatusSnapshot) -> Self {
        Self {
            name: s.name,
            state: s.state,
            port: s.port,
            path: s.path,
            source_type: s.source_type,
            client_count: s.client_count,
            uptime_seconds: s.uptime_seconds,
            error_message: s.error_message,
            video_codec: s.video_codec,
            audio_codec: s.audio_codec,
            bitrate: s.bitrate,
            framerate: s.framerate,
            closed_gop_count: s.closed_gop_count,
            current_frame_count: s.current_frame_count,
            cache_size_bytes: s.cache_size_bytes,
        }
    }
}

fn registry_error_status(err: &crate::error::RegistryError) -> StatusCode {
    use crate::error::RegistryError;
    match err {
        RegistryError::NoSuchInstance(_) => StatusCode::NOT_FOUND,
        RegistryError::AlreadyExists(_) | RegistryError::Route(_) => StatusCode::CONFLICT,
        RegistryError::NotStopped(_) => StatusCode::CONFLICT,
        RegistryError::NoFreePort(_) => StatusCode::SERVICE_UNAVAILABLE,
        RegistryError::Startup(_) | RegistryError::Config(_) => StatusCode::BAD_REQUEST,
    }
}

fn error_response(err: crate::error::RegistryError) -> Response {
    (registry_error_status(&err), err.to_string()).into_response()
}

pub async fn list_instances(State(state): State<AdminState>) -> Json<Vec<StatusResponse>> {
    let all = state.registry.list_all().await;
    Json(all.into_iter().map(StatusResponse::from).collect())
}

pub async fn get_instance(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.get_status(&name).await {
        Ok(status) => Json(StatusResponse::from(status)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn start_instance(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.registry.start(&name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn stop_instance(State(state): State<AdminState>, Path(name): Path<String>) -> Response {
    match state.registry.stop(&name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn restart_instance(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.restart(&name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn remove_instance(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Response {
    match state.registry.remove(&name).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}
