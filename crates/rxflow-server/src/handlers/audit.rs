use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use rxflow_core::export::{ComplianceExport, ComplianceExporter};
use rxflow_core::workflow::WorkflowError;

use super::WindowQuery;
use crate::error::{ok, ApiResponse, ApiResult};
use crate::identity::caller;
use crate::state::AppState;

/// Identifier stamped into compliance exports.
pub const SYSTEM_ID: &str = "rxflow-server";

/// `GET /api/audit/export?from=&to=`
pub async fn export(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<WindowQuery>, QueryRejection>,
) -> ApiResult<Json<ApiResponse<ComplianceExport>>> {
    let ctx = caller(&headers)?;
    let Query(window) = query?;
    let workplace_id = ctx
        .workplace_id
        .ok_or_else(|| WorkflowError::validation("A workspace is required for an audit export"))?;

    let export = state.with_db(|db| {
        Ok(ComplianceExporter::new(db)
            .with_system_id(SYSTEM_ID.to_string())
            .export(&workplace_id, window.from, window.to)?)
    })?;
    Ok(ok(export))
}
