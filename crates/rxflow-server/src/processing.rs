//! Running claimed requests through the model off the async runtime.
//!
//! A run is claim (locked), analysis on a blocking thread (unlocked), then
//! finish (locked). Another worker claiming the same request loses with a
//! conflict, and a cancellation during analysis discards the report. A model
//! that panics fails the request like any other analysis error.

use rxflow_ai::{analyze, ExtractionError};
use rxflow_core::workflow::{DiagnosticService, ProcessingClaim, ProcessingOutcome};
use tracing::{debug, error, warn};

use crate::error::ApiResult;
use crate::state::AppState;

/// Claim a pending request and analyse it.
pub async fn process(
    state: &AppState,
    workplace_id: &str,
    actor_id: &str,
    request_id: &str,
) -> ApiResult<ProcessingOutcome> {
    let claim = state.with_db(|db| DiagnosticService::new(db).begin_processing(workplace_id, actor_id, request_id))?;
    run_claim(state, claim).await
}

/// Analyse an already claimed request and store the outcome.
pub async fn run_claim(state: &AppState, claim: ProcessingClaim) -> ApiResult<ProcessingOutcome> {
    let model = state.model();
    let case = claim.case.clone();
    let report = match tokio::task::spawn_blocking(move || analyze(model.as_ref(), &case)).await {
        Ok(report) => report,
        Err(err) => {
            error!(request_id = %claim.request.id, error = %err, "Analysis task aborted");
            Err(ExtractionError::Inference(format!("analysis task failed: {err}")))
        }
    };
    state.with_db(|db| DiagnosticService::new(db).finish_processing(claim, report))
}

/// Process a pending request in the background.
pub fn dispatch(state: AppState, workplace_id: String, actor_id: String, request_id: String) {
    tokio::spawn(async move {
        match process(&state, &workplace_id, &actor_id, &request_id).await {
            Ok(ProcessingOutcome::Completed { .. }) => {
                debug!(request_id = %request_id, "Background processing completed")
            }
            Ok(_) => debug!(request_id = %request_id, "Background processing ended without a result"),
            Err(err) => warn!(request_id = %request_id, error = %err, "Background processing failed"),
        }
    });
}

/// Finish an already claimed request in the background.
pub fn dispatch_claim(state: AppState, claim: ProcessingClaim) {
    tokio::spawn(async move {
        let request_id = claim.request.id.clone();
        if let Err(err) = run_claim(&state, claim).await {
            warn!(request_id = %request_id, error = %err, "Background retry failed");
        }
    });
}

