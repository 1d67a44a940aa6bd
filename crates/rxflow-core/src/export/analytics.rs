//! Workflow analytics over a reporting window.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rxflow_ai::Severity;
use serde::Serialize;

use crate::db::{AdherenceStats, Database, FollowUpCounts, ReportScope, ReviewCounts};
use crate::models::{InterventionStatus, RequestStatus, WorkspaceContext};
use crate::workflow::{WorkflowError, WorkflowResult};

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestAnalytics {
    pub total: u32,
    pub by_status: BTreeMap<String, u32>,
    /// Share of requests that completed, 0..=1
    pub completion_rate: f64,
    pub failure_rate: f64,
    pub average_processing_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceAnalytics {
    #[serde(flatten)]
    pub stats: AdherenceStats,
    pub open_alerts: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    /// `None` when the summary spans every workspace
    pub workplace_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub requests: RequestAnalytics,
    pub results_by_risk: BTreeMap<String, u32>,
    pub reviews: ReviewCounts,
    pub follow_ups: FollowUpCounts,
    pub interventions: BTreeMap<String, u32>,
    pub adherence: AdherenceAnalytics,
}

/// The reporting scope a caller may see. Super-admins without a
/// workspace see every workspace.
pub fn scope_for(
    ctx: &WorkspaceContext,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> WorkflowResult<ReportScope> {
    if ctx.workplace_id.is_none() && !ctx.is_super_admin() {
        return Err(WorkflowError::validation("A workspace is required for analytics"));
    }
    if let (Some(from), Some(to)) = (from, to) {
        if from >= to {
            return Err(WorkflowError::validation("`from` must be before `to`"));
        }
    }
    Ok(ReportScope {
        workplace_id: ctx.workplace_id.clone(),
        from,
        to,
    })
}

fn rate(part: u32, total: u32) -> f64 {
    if total == 0 {
        0.0
    } else {
        f64::from(part) / f64::from(total)
    }
}

pub fn analytics_summary(
    db: &Database,
    ctx: &WorkspaceContext,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
) -> WorkflowResult<AnalyticsSummary> {
    let scope = scope_for(ctx, from, to)?;
    let now = Utc::now();

    let status_counts = db.request_status_counts(&scope)?;
    let total: u32 = status_counts.iter().map(|(_, c)| c).sum();
    let count_of = |status: RequestStatus| {
        status_counts
            .iter()
            .find(|(s, _)| *s == status)
            .map(|(_, c)| *c)
            .unwrap_or(0)
    };
    let spans = db.completed_processing_spans(&scope)?;
    let average_processing_ms = if spans.is_empty() {
        None
    } else {
        let sum: i64 = spans
            .iter()
            .map(|s| (s.completed_at - s.started_at).num_milliseconds())
            .sum();
        Some(sum as f64 / spans.len() as f64)
    };
    let requests = RequestAnalytics {
        total,
        by_status: status_counts
            .iter()
            .map(|(s, c)| (s.as_str().to_string(), *c))
            .collect(),
        completion_rate: rate(count_of(RequestStatus::Completed), total),
        failure_rate: rate(count_of(RequestStatus::Failed), total),
        average_processing_ms,
    };

    let results_by_risk = db
        .result_risk_counts(&scope)?
        .into_iter()
        .map(|(severity, c): (Severity, u32)| (severity.as_str().to_string(), c))
        .collect();
    let interventions = db
        .intervention_status_counts(&scope)?
        .into_iter()
        .map(|(status, c): (InterventionStatus, u32)| (status.as_str().to_string(), c))
        .collect();

    Ok(AnalyticsSummary {
        workplace_id: scope.workplace_id.clone(),
        from,
        to,
        generated_at: now,
        requests,
        results_by_risk,
        reviews: db.review_counts(&scope)?,
        follow_ups: db.follow_up_counts(&scope, now)?,
        interventions,
        adherence: AdherenceAnalytics {
            stats: db.adherence_stats(&scope)?,
            open_alerts: db.open_alert_count(&scope)?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReviewStatus, ReviewSubmission, UserRole};
    use crate::workflow::tests_support::completed_result;
    use crate::workflow::ReviewService;

    #[test]
    fn test_summary_counts_workspace_activity() {
        let db = Database::open_in_memory().unwrap();
        let result = completed_result(&db, "chest pain");
        completed_result(&db, "fever");
        let ctx = WorkspaceContext::pharmacist("pharm-1", "ws-1");
        ReviewService::new(&db)
            .submit_review(
                &ctx,
                &result.id,
                ReviewSubmission {
                    status: Some(ReviewStatus::Approved),
                    ..Default::default()
                },
            )
            .unwrap();

        let summary = analytics_summary(&db, &ctx, None, None).unwrap();
        assert_eq!(summary.requests.total, 2);
        assert_eq!(summary.requests.by_status.get("completed"), Some(&2));
        assert_eq!(summary.requests.completion_rate, 1.0);
        assert!(summary.requests.average_processing_ms.is_some());
        assert_eq!(summary.results_by_risk.get("critical"), Some(&1));
        assert_eq!(summary.reviews.approved, 1);
        assert_eq!(summary.reviews.pending, 1);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["adherence"]["trackedPatients"], 0);
        assert_eq!(json["requests"]["completionRate"], 1.0);
    }

    #[test]
    fn test_scope_is_tenant_bound_unless_super_admin() {
        let db = Database::open_in_memory().unwrap();
        completed_result(&db, "fever");

        let other = WorkspaceContext::pharmacist("pharm-2", "ws-2");
        assert_eq!(analytics_summary(&db, &other, None, None).unwrap().requests.total, 0);

        let admin = WorkspaceContext {
            user_id: "admin".into(),
            workplace_id: None,
            role: UserRole::SuperAdmin,
        };
        let summary = analytics_summary(&db, &admin, None, None).unwrap();
        assert_eq!(summary.workplace_id, None);
        assert_eq!(summary.requests.total, 1);

        let nobody = WorkspaceContext {
            role: UserRole::Pharmacist,
            ..admin
        };
        assert!(analytics_summary(&db, &nobody, None, None).is_err());
    }

    #[test]
    fn test_empty_window_is_rejected() {
        let ctx = WorkspaceContext::pharmacist("pharm-1", "ws-1");
        let now = Utc::now();
        assert!(scope_for(&ctx, Some(now), Some(now)).is_err());
    }
}
