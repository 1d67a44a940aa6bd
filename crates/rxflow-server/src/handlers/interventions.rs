//! Clinical intervention updates.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use rxflow_core::models::{
    AssignmentStatus, ClinicalIntervention, InterventionOutcome, InterventionStatus, InterventionStrategy,
};
use rxflow_core::workflow::{InterventionService, NewAssignment, WorkflowError};
use serde::Deserialize;

use crate::error::{ok, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::state::AppState;

type InterventionResponse = ApiResult<Json<ApiResponse<ClinicalIntervention>>>;

/// `GET /api/interventions/:id`
pub async fn detail(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> InterventionResponse {
    let ctx = caller(&headers)?;
    let intervention = state.with_db(|db| InterventionService::new(db).get(&ctx, &id))?;
    Ok(ok(intervention))
}

#[derive(Debug, Deserialize)]
pub struct StatusBody<S> {
    pub status: S,
}

/// `PATCH /api/interventions/:id/status`
pub async fn update_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<StatusBody<InterventionStatus>>, JsonRejection>,
) -> InterventionResponse {
    let ctx = caller(&headers)?;
    let Json(body) = payload?;
    let intervention = state.with_db(|db| InterventionService::new(db).update_status(&ctx, &id, body.status))?;
    Ok(ok(intervention))
}

/// `POST /api/interventions/:id/strategies`
pub async fn add_strategy(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<InterventionStrategy>, JsonRejection>,
) -> InterventionResponse {
    let ctx = caller(&headers)?;
    let Json(strategy) = payload?;
    let intervention = state.with_db(|db| InterventionService::new(db).add_strategy(&ctx, &id, strategy))?;
    Ok(ok(intervention))
}

/// `POST /api/interventions/:id/assignments`
pub async fn assign(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NewAssignment>, JsonRejection>,
) -> InterventionResponse {
    let ctx = caller(&headers)?;
    let Json(assignment) = payload?;
    let intervention = state.with_db(|db| InterventionService::new(db).assign_team_member(&ctx, &id, assignment))?;
    Ok(ok(intervention))
}

/// `PATCH /api/interventions/:id/assignments/:index`
pub async fn update_assignment(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((id, index)): Path<(String, String)>,
    payload: Result<Json<StatusBody<AssignmentStatus>>, JsonRejection>,
) -> InterventionResponse {
    let ctx = caller(&headers)?;
    let index: usize = index
        .parse()
        .map_err(|_| WorkflowError::validation(format!("Invalid assignment index: {}", index)))?;
    let Json(body) = payload?;
    let intervention = state.with_db(|db| {
        InterventionService::new(db).update_assignment_status(&ctx, &id, index, body.status)
    })?;
    Ok(ok(intervention))
}

/// `POST /api/interventions/:id/outcomes`
pub async fn record_outcome(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<InterventionOutcome>, JsonRejection>,
) -> InterventionResponse {
    let ctx = caller(&headers)?;
    let Json(outcome) = payload?;
    let intervention = state.with_db(|db| InterventionService::new(db).record_outcome(&ctx, &id, outcome))?;
    Ok(ok(intervention))
}
