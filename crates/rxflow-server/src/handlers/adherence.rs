//! Medication adherence tracking.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rxflow_core::models::AdherenceTracking;
use rxflow_core::workflow::{
    AdherenceService, MedicationDataUpdate, NewAdherenceIntervention, NewAdherenceTracking, NewRefill,
};
use serde::Deserialize;

use crate::error::{created, ok, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::state::AppState;

type TrackingResponse = ApiResult<Json<ApiResponse<AdherenceTracking>>>;

/// `POST /api/adherence`
pub async fn create(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<NewAdherenceTracking>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<ApiResponse<AdherenceTracking>>)> {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let tracking = state.with_db(|db| AdherenceService::new(db).create_tracking(&ctx, input))?;
    Ok(created(tracking))
}

/// `GET /api/adherence/patients/:patient_id`
pub async fn detail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(patient_id): Path<String>,
) -> TrackingResponse {
    let ctx = caller(&headers)?;
    let tracking = state.with_db(|db| AdherenceService::new(db).get_tracking(&ctx, &patient_id))?;
    Ok(ok(tracking))
}

/// `POST /api/adherence/patients/:patient_id/refills`
pub async fn add_refill(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(patient_id): Path<String>,
    payload: Result<Json<NewRefill>, JsonRejection>,
) -> TrackingResponse {
    let ctx = caller(&headers)?;
    let Json(refill) = payload?;
    let tracking = state.with_db(|db| AdherenceService::new(db).add_refill(&ctx, &patient_id, refill))?;
    Ok(ok(tracking))
}

#[derive(Debug, Deserialize)]
pub struct MedicationUpdates {
    pub medications: Vec<MedicationDataUpdate>,
}

/// `PATCH /api/adherence/patients/:patient_id/medications`
pub async fn update_medications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(patient_id): Path<String>,
    payload: Result<Json<MedicationUpdates>, JsonRejection>,
) -> TrackingResponse {
    let ctx = caller(&headers)?;
    let Json(body) = payload?;
    let tracking = state.with_db(|db| {
        AdherenceService::new(db).update_medication_data(&ctx, &patient_id, body.medications)
    })?;
    Ok(ok(tracking))
}

/// `POST /api/adherence/patients/:patient_id/interventions`
pub async fn record_intervention(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(patient_id): Path<String>,
    payload: Result<Json<NewAdherenceIntervention>, JsonRejection>,
) -> TrackingResponse {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let tracking = state.with_db(|db| AdherenceService::new(db).record_intervention(&ctx, &patient_id, input))?;
    Ok(ok(tracking))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcknowledgeBody {
    #[serde(default)]
    pub action_taken: Option<String>,
}

/// `PATCH /api/adherence/patients/:patient_id/alerts/:alert_id/acknowledge`
/// The body is optional.
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((patient_id, alert_id)): Path<(String, String)>,
    payload: Option<Json<AcknowledgeBody>>,
) -> TrackingResponse {
    let ctx = caller(&headers)?;
    let body = payload.map(|Json(body)| body).unwrap_or_default();
    let tracking = state.with_db(|db| {
        AdherenceService::new(db).acknowledge_alert(&ctx, &patient_id, &alert_id, body.action_taken)
    })?;
    Ok(ok(tracking))
}

/// `PATCH /api/adherence/patients/:patient_id/alerts/:alert_id/resolve`
pub async fn resolve_alert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((patient_id, alert_id)): Path<(String, String)>,
) -> TrackingResponse {
    let ctx = caller(&headers)?;
    let tracking = state.with_db(|db| AdherenceService::new(db).resolve_alert(&ctx, &patient_id, &alert_id))?;
    Ok(ok(tracking))
}

#[derive(Debug, Default, Deserialize)]
pub struct ThresholdQuery {
    pub threshold: Option<f64>,
}

/// `GET /api/adherence/poor?threshold=`
pub async fn poor(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<ThresholdQuery>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<Vec<AdherenceTracking>>>> {
    let ctx = caller(&headers)?;
    let Query(query) = query?;
    let trackings = state.with_db(|db| AdherenceService::new(db).patients_with_poor_adherence(&ctx, query.threshold))?;
    Ok(ok(trackings))
}
