//! External Interfaces (§6): one axum router per instance port for the
//! WebSocket fanout, plus a single admin router exposing the command
//! surface (load/create/start/stop/restart/remove/status). Grounded in
//! `brew-lab-thaumic-cast`'s `api/` module layout (`ws.rs` + typed
//! `AppState`), since the teacher repo speaks raw RTMP sockets rather than
//! HTTP/WebSocket.

pub mod events;
pub mod status;
pub mod ws;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;

use crate::registry::Registry;

#[derive(Clone)]
pub struct StreamState {
    pub registry: Arc<Registry>,
    pub port: u16,
}

#[derive(Clone)]
pub struct AdminState {
    pub registry: Arc<Registry>,
}

/// Router bound on one instance's port (or a group of instances sharing a
/// port): every path is dispatched through the router (C7) lookup inside
/// `ws::ws_handler`.
pub fn stream_router(state: StreamState) -> Router {
    Router::new()
        .fallback(get(ws::ws_handler))
        .with_state(state)
}

/// Router bound on the admin address, exposing the command surface of §6.
pub fn admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/instances", get(status::list_instances))
        .route("/instances/{name}", get(status::get_instance))
        .route("/instances/{name}/start", post(status::start_instance))
        .route("/instances/{name}/stop", post(status::stop_instance))
        .route("/instances/{name}/restart", post(status::restart_instance))
        .route("/instances/{name}", axum::routing::delete(status::remove_instance))
        .route("/events", get(events::events_handler))
        .with_state(state)
}
