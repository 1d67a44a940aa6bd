//! Follow-up scheduling and lifecycle.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::{DateTime, Utc};
use rxflow_core::models::{DiagnosticFollowUp, FollowUpOutcome, NewFollowUp};
use rxflow_core::workflow::{FollowUpCompletion, FollowUpService};
use serde::Deserialize;

use crate::error::{created, ok, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::state::AppState;

type FollowUpResponse = ApiResult<Json<ApiResponse<DiagnosticFollowUp>>>;

/// `POST /api/diagnostics/:id/follow-ups`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
    payload: Result<Json<NewFollowUp>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<DiagnosticFollowUp>>)> {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let follow_up = state.with_db(|db| FollowUpService::new(db).create_follow_up(&ctx, &request_id, input))?;
    Ok(created(follow_up))
}

/// `POST /api/diagnostics/:id/follow-ups/auto`
pub async fn auto_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Vec<DiagnosticFollowUp>>>)> {
    let ctx = caller(&headers)?;
    let follow_ups = state.with_db(|db| FollowUpService::new(db).auto_schedule(&ctx, &request_id))?;
    Ok(created(follow_ups))
}

/// `GET /api/diagnostics/:id/follow-ups`
pub async fn list_for_request(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(request_id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<DiagnosticFollowUp>>>> {
    let ctx = caller(&headers)?;
    let follow_ups = state.with_db(|db| FollowUpService::new(db).list_for_request(&ctx, &request_id))?;
    Ok(ok(follow_ups))
}

/// `GET /api/follow-ups/overdue`
pub async fn overdue(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ApiResponse<Vec<DiagnosticFollowUp>>>> {
    let ctx = caller(&headers)?;
    let follow_ups = state.with_db(|db| FollowUpService::new(db).list_overdue(&ctx, Utc::now()))?;
    Ok(ok(follow_ups))
}

/// `PATCH /api/follow-ups/:id/start`
pub async fn start(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> FollowUpResponse {
    let ctx = caller(&headers)?;
    let follow_up = state.with_db(|db| FollowUpService::new(db).start_follow_up(&ctx, &id))?;
    Ok(ok(follow_up))
}

/// `PATCH /api/follow-ups/:id/cancel`
pub async fn cancel(State(state): State<AppState>, headers: HeaderMap, Path(id): Path<String>) -> FollowUpResponse {
    let ctx = caller(&headers)?;
    let follow_up = state.with_db(|db| FollowUpService::new(db).cancel_follow_up(&ctx, &id))?;
    Ok(ok(follow_up))
}

/// `PATCH /api/follow-ups/:id/complete`
pub async fn complete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<FollowUpOutcome>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<FollowUpCompletion>>> {
    let ctx = caller(&headers)?;
    let Json(outcome) = payload?;
    let completion = state.with_db(|db| FollowUpService::new(db).complete_follow_up(&ctx, &id, outcome))?;
    Ok(ok(completion))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleBody {
    pub new_date: DateTime<Utc>,
    pub reason: String,
}

/// `PATCH /api/follow-ups/:id/reschedule` returns the successor follow-up.
pub async fn reschedule(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<RescheduleBody>, JsonRejection>,
) -> FollowUpResponse {
    let ctx = caller(&headers)?;
    let Json(body) = payload?;
    let successor = state.with_db(|db| {
        FollowUpService::new(db).reschedule_follow_up(&ctx, &id, body.new_date, &body.reason)
    })?;
    Ok(ok(successor))
}
