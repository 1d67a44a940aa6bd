use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use rxflow_core::models::WorkspaceSettings;
use rxflow_core::workflow::{SettingsInput, WorkspaceService};

use crate::error::{ok, ok_with_message, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::state::AppState;

/// `GET /api/workspace/settings`
pub async fn settings(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<ApiResponse<WorkspaceSettings>>> {
    let ctx = caller(&headers)?;
    let settings = state.with_db(|db| WorkspaceService::new(db).settings(&ctx))?;
    Ok(ok(settings))
}

/// `PUT /api/workspace/settings` replaces the whole record.
pub async fn update_settings(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<SettingsInput>, JsonRejection>,
) -> ApiResult<Json<ApiResponse<WorkspaceSettings>>> {
    let ctx = caller(&headers)?;
    let Json(input) = payload?;
    let settings = state.with_db(|db| WorkspaceService::new(db).update_settings(&ctx, input))?;
    Ok(ok_with_message(settings, "Workspace settings updated"))
}
