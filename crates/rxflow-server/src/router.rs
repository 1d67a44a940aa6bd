//! HTTP routes.
//!
//! Identity comes from gateway headers on every `/api` route; `/health` is
//! open. Path params use `:param` syntax (axum 0.7).

use axum::routing::{get, patch, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::handlers::{
    adherence, audit, diagnostics, follow_ups, health, interventions, patients, workspace,
};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/patients", post(patients::create))
        .route("/patients/:id", get(patients::detail))
        .route(
            "/workspace/settings",
            get(workspace::settings).put(workspace::update_settings),
        )
        .route("/diagnostics", post(diagnostics::create))
        .route(
            "/diagnostics/analytics/summary",
            get(diagnostics::analytics),
        )
        .route(
            "/diagnostics/patients/:id/history",
            get(diagnostics::history),
        )
        .route(
            "/diagnostics/:id",
            get(diagnostics::detail).delete(diagnostics::delete),
        )
        .route("/diagnostics/:id/retry", post(diagnostics::retry))
        .route("/diagnostics/:id/cancel", post(diagnostics::cancel))
        .route("/diagnostics/:id/approve", patch(diagnostics::approve))
        .route("/diagnostics/:id/reject", patch(diagnostics::reject))
        .route(
            "/diagnostics/:id/intervention",
            post(diagnostics::create_intervention),
        )
        .route(
            "/diagnostics/:id/follow-ups",
            post(follow_ups::create).get(follow_ups::list_for_request),
        )
        .route(
            "/diagnostics/:id/follow-ups/auto",
            post(follow_ups::auto_schedule),
        )
        .route("/follow-ups/overdue", get(follow_ups::overdue))
        .route("/follow-ups/:id/start", patch(follow_ups::start))
        .route("/follow-ups/:id/complete", patch(follow_ups::complete))
        .route("/follow-ups/:id/reschedule", patch(follow_ups::reschedule))
        .route("/follow-ups/:id/cancel", patch(follow_ups::cancel))
        .route("/adherence", post(adherence::create))
        .route("/adherence/poor", get(adherence::poor))
        .route("/adherence/patients/:id", get(adherence::detail))
        .route(
            "/adherence/patients/:id/refills",
            post(adherence::add_refill),
        )
        .route(
            "/adherence/patients/:id/medications",
            patch(adherence::update_medications),
        )
        .route(
            "/adherence/patients/:id/interventions",
            post(adherence::record_intervention),
        )
        .route(
            "/adherence/patients/:id/alerts/:alert_id/acknowledge",
            patch(adherence::acknowledge_alert),
        )
        .route(
            "/adherence/patients/:id/alerts/:alert_id/resolve",
            patch(adherence::resolve_alert),
        )
        .route("/interventions/:id", get(interventions::detail))
        .route(
            "/interventions/:id/status",
            patch(interventions::update_status),
        )
        .route(
            "/interventions/:id/strategies",
            post(interventions::add_strategy),
        )
        .route(
            "/interventions/:id/assignments",
            post(interventions::assign),
        )
        .route(
            "/interventions/:id/assignments/:index",
            patch(interventions::update_assignment),
        )
        .route(
            "/interventions/:id/outcomes",
            post(interventions::record_outcome),
        )
        .route("/audit/export", get(audit::export));

    Router::new()
        .route("/health", get(health::check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
