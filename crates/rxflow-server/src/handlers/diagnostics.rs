//! Diagnostic requests, their review and analytics.
//!
//! Review routes are addressed by request id; the result is looked up from
//! the request.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rxflow_core::export::{analytics_summary, AnalyticsSummary};
use rxflow_core::models::{
    ClinicalIntervention, DiagnosticRequest, DiagnosticResult, NewDiagnosticRequest,
    NewIntervention, ReviewStatus, ReviewSubmission, WorkspaceContext,
};
use rxflow_core::workflow::{DiagnosticService, RequestDetail, ReviewService, WorkflowError};
use serde::{Deserialize, Serialize};

use super::WindowQuery;
use crate::config::ProcessingMode;
use crate::error::{created, ok, ok_with_message, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::processing;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct CreatedRequest {
    pub request: DiagnosticRequest,
}

/// `POST /api/diagnostics`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewDiagnosticRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<CreatedRequest>>)> {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let request = state.with_db(|db| DiagnosticService::new(db).create_request(&ctx, input))?;

    if state.processing() == ProcessingMode::Immediate {
        processing::dispatch(
            state.clone(),
            request.workplace_id.clone(),
            ctx.user_id.clone(),
            request.id.clone(),
        );
    }
    Ok(created(CreatedRequest { request }))
}

/// `GET /api/diagnostics/:id`
pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<RequestDetail>>> {
    let ctx = caller(&headers)?;
    let detail = state.with_db(|db| DiagnosticService::new(db).get_request_detail(&ctx, &id))?;
    Ok(ok(detail))
}

/// `DELETE /api/diagnostics/:id`
pub async fn delete(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<()>>> {
    let ctx = caller(&headers)?;
    state.with_db(|db| DiagnosticService::new(db).delete_request(&ctx, &id))?;
    Ok(ok_with_message((), "Diagnostic request deleted"))
}

/// `POST /api/diagnostics/:id/retry` claims the request and analyses it in
/// the background, whatever the processing mode.
pub async fn retry(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DiagnosticRequest>>> {
    let ctx = caller(&headers)?;
    let claim = state.with_db(|db| DiagnosticService::new(db).retry_request(&ctx, &id))?;
    let request = claim.request.clone();
    processing::dispatch_claim(state.clone(), claim);
    Ok(ok_with_message(request, "Diagnostic request queued for retry"))
}

/// `POST /api/diagnostics/:id/cancel`
pub async fn cancel(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<Json<ApiResponse<DiagnosticRequest>>> {
    let ctx = caller(&headers)?;
    let request = state.with_db(|db| DiagnosticService::new(db).cancel_request(&ctx, &id))?;
    Ok(ok(request))
}

/// `GET /api/diagnostics/patients/:patient_id/history`
pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(patient_id): Path<String>,
) -> ApiResult<Json<ApiResponse<Vec<DiagnosticRequest>>>> {
    let ctx = caller(&headers)?;
    let requests = state.with_db(|db| DiagnosticService::new(db).patient_history(&ctx, &patient_id))?;
    Ok(ok(requests))
}

/// Fields accepted by the approve route. `status` defaults to approved.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalBody {
    #[serde(default)]
    pub status: Option<ReviewStatus>,
    #[serde(default)]
    pub modifications: Option<String>,
    #[serde(default)]
    pub review_notes: Option<String>,
    #[serde(default)]
    pub clinical_justification: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub review_notes: Option<String>,
}

fn review(
    state: &AppState,
    ctx: &WorkspaceContext,
    request_id: &str,
    submission: ReviewSubmission,
) -> ApiResult<DiagnosticResult> {
    state.with_db(|db| {
        let service = ReviewService::new(db);
        let result = service.result_for_request(ctx, request_id)?;
        service.submit_review(ctx, &result.id, submission)
    })
}

/// `PATCH /api/diagnostics/:id/approve`
pub async fn approve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<ApprovalBody>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<DiagnosticResult>>> {
    let ctx = caller(&headers)?;
    let Json(body) = payload?;
    let status = body.status.unwrap_or(ReviewStatus::Approved);
    if status == ReviewStatus::Rejected {
        return Err(WorkflowError::validation("Use the reject route to reject a result").into());
    }
    let result = review(
        &state,
        &ctx,
        &id,
        ReviewSubmission {
            status: Some(status),
            modifications: body.modifications,
            rejection_reason: None,
            review_notes: body.review_notes,
            clinical_justification: body.clinical_justification,
        },
    )?;
    Ok(ok_with_message(result, "Diagnostic result reviewed"))
}

/// `PATCH /api/diagnostics/:id/reject`
pub async fn reject(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<RejectionBody>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<DiagnosticResult>>> {
    let ctx = caller(&headers)?;
    let Json(body) = payload?;
    let result = review(
        &state,
        &ctx,
        &id,
        ReviewSubmission {
            status: Some(ReviewStatus::Rejected),
            rejection_reason: body.rejection_reason,
            review_notes: body.review_notes,
            ..Default::default()
        },
    )?;
    Ok(ok_with_message(result, "Diagnostic result rejected"))
}

/// `POST /api/diagnostics/:id/intervention`
pub async fn create_intervention(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    payload: Result<Json<NewIntervention>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ClinicalIntervention>>)> {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let intervention = state.with_db(|db| {
        let service = ReviewService::new(db);
        let result = service.result_for_request(&ctx, &id)?;
        service.create_intervention_from_result(&ctx, &result.id, input)
    })?;
    Ok(created(intervention))
}

/// `GET /api/diagnostics/analytics/summary?from=&to=`
pub async fn analytics(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<AnalyticsSummary>>> {
    let ctx = caller(&headers)?;
    let Query(window) = query?;
    let summary = state.with_db(|db| analytics_summary(db, &ctx, window.from, window.to))?;
    Ok(ok(summary))
}
