//! Patient registration.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rxflow_core::models::{NewPatient, Patient};
use rxflow_core::workflow::WorkspaceService;

use crate::error::{created, ok, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::state::AppState;

/// `POST /api/patients`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewPatient>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Patient>>)> {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let patient = state.with_db(|db| WorkspaceService::new(db).register_patient(&ctx, input))?;
    Ok(created(patient))
}

/// `GET /api/patients/:id`
pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<Patient>>> {
    let ctx = caller(&headers)?;
    let patient = state.with_db(|db| WorkspaceService::new(db).get_patient(&ctx, &id))?;
    Ok(ok(patient))
}
