use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::config::ProcessingMode;
use crate::error::{ok, ApiResponse};
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub processing: &'static str,
}

/// `GET /health`
pub async fn check(State(state): State<AppState>) -> Json<ApiResponse<Health>> {
    ok(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        processing: match state.processing() {
            ProcessingMode::Immediate => "immediate",
            ProcessingMode::Deferred => "deferred",
        },
    })
}
