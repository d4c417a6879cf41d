//! Health check endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub service: &'static str,
    /// Fingerprints with chunks counted but not yet completed
    pub active_uploads: usize,
    pub digest: String,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let coordinator = state.coordinator();

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        service: env!("CARGO_PKG_NAME"),
        active_uploads: coordinator.progress().active_uploads(),
        digest: coordinator.verifier().algorithm().to_string(),
    })
}
