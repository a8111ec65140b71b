use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use turnos_proto::ClientMessage;

use crate::HubState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub peers: usize,
    pub has_state: bool,
}

pub async fn health(State(state): State<HubState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        peers: state.registry.peer_count(),
        has_state: state.registry.has_state(),
    })
}

/// The stored snapshot's `state` object, or 204 before anyone has sent one.
pub async fn last_state(State(state): State<HubState>) -> Response {
    match state.registry.last_state().as_deref().and_then(ClientMessage::decode) {
        Some(ClientMessage::State { state }) => Json(state).into_response(),
        _ => StatusCode::NO_CONTENT.into_response(),
    }
}

pub async fn metrics(State(state): State<HubState>) -> Response {
    match &state.metrics {
        Some(handle) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, "metrics exporter not installed").into_response(),
    }
}
