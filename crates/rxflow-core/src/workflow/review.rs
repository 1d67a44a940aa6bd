//! Pharmacist review of AI results.

use chrono::{Duration, Utc};
use rxflow_ai::{ClinicalAnalysis, ReferralUrgency, Severity};
use serde_json::json;
use tracing::info;

use super::{audit, workspace_of, WorkflowError, WorkflowResult};
use crate::db::{Database, DbError};
use crate::models::{
    intervention_number, intervention_number_prefix, AuditAction, AuditEntry,
    ClinicalIntervention, DiagnosticResult, InterventionPriority, NewIntervention,
    PharmacistReview, ReviewDecision, ReviewStatus, ReviewSubmission, WorkspaceContext,
};

/// Days until the first follow-up after an accepted review.
///
/// The tightest of the overall-risk, red-flag and referral bounds.
pub fn follow_up_window_days(analysis: &ClinicalAnalysis) -> i64 {
    let mut days = match analysis.risk_assessment.overall_risk {
        Severity::Critical => 1,
        Severity::High => 3,
        Severity::Medium => 7,
        Severity::Low => 14,
    };

    match analysis.highest_red_flag() {
        Some(Severity::Critical) => days = days.min(1),
        Some(Severity::High) => days = days.min(3),
        _ => {}
    }

    if let Some(referral) = analysis.recommended_referral() {
        let referral_days = match referral.urgency {
            ReferralUrgency::Immediate => 1,
            ReferralUrgency::Within24h => 2,
            ReferralUrgency::WithinWeek => 7,
            ReferralUrgency::Routine => 14,
        };
        days = days.min(referral_days);
    }

    days
}

/// Turn submitted review fields into a decision.
pub fn decision_from_submission(submission: &ReviewSubmission) -> WorkflowResult<ReviewDecision> {
    let non_empty = |value: &Option<String>| {
        value
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    match submission.status {
        Some(ReviewStatus::Approved) => Ok(ReviewDecision::Approved),
        Some(ReviewStatus::Modified) => non_empty(&submission.modifications)
            .map(|modifications| ReviewDecision::Modified { modifications })
            .ok_or_else(|| WorkflowError::validation("Modifications are required when status is modified")),
        Some(ReviewStatus::Rejected) => non_empty(&submission.rejection_reason)
            .map(|rejection_reason| ReviewDecision::Rejected { rejection_reason })
            .ok_or_else(|| WorkflowError::validation("A rejection reason is required when rejecting")),
        None => Err(WorkflowError::validation("Review status is required")),
    }
}

/// Pharmacist review workflow.
pub struct ReviewService<'a> {
    db: &'a Database,
}

impl<'a> ReviewService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn load(&self, workplace_id: &str, result_id: &str) -> WorkflowResult<DiagnosticResult> {
        self.db
            .get_result(workplace_id, result_id)?
            .ok_or_else(|| WorkflowError::not_found("Diagnostic result"))
    }

    /// The result produced for a request.
    pub fn result_for_request(&self, ctx: &WorkspaceContext, request_id: &str) -> WorkflowResult<DiagnosticResult> {
        let ws = workspace_of(ctx)?;
        self.db
            .get_result_for_request(ws, request_id)?
            .ok_or_else(|| WorkflowError::not_found("Diagnostic result"))
    }

    /// Record a review decision. A result is reviewed at most once.
    pub fn submit_review(
        &self,
        ctx: &WorkspaceContext,
        result_id: &str,
        submission: ReviewSubmission,
    ) -> WorkflowResult<DiagnosticResult> {
        let ws = workspace_of(ctx)?;
        let decision = decision_from_submission(&submission)?;
        let mut result = self.load(ws, result_id)?;
        if result.is_reviewed() {
            return Err(WorkflowError::Conflict(
                "Diagnostic result has already been reviewed".into(),
            ));
        }

        let now = Utc::now();
        if decision.is_accepted() {
            result.follow_up_required = true;
            result.follow_up_date = Some(now + Duration::days(follow_up_window_days(&result.analysis)));
        } else {
            result.follow_up_required = false;
            result.follow_up_date = None;
        }
        let status = decision.status();
        result.pharmacist_review = Some(PharmacistReview {
            decision,
            review_notes: submission.review_notes,
            clinical_justification: submission.clinical_justification,
            reviewed_by: ctx.user_id.clone(),
            reviewed_at: now,
        });
        result.updated_at = now;

        self.db.atomically(|db| {
            db.record_review(&result)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::ReviewSubmitted, "diagnostic_result", &result.id)
                    .with_details(json!({
                        "status": status,
                        "requestId": result.request_id,
                        "followUpDate": result.follow_up_date,
                    })),
            )
        })?;

        info!(result_id, status = status.as_str(), "Pharmacist review recorded");
        Ok(result)
    }

    /// Open a clinical intervention from an accepted result. One per result.
    pub fn create_intervention_from_result(
        &self,
        ctx: &WorkspaceContext,
        result_id: &str,
        input: NewIntervention,
    ) -> WorkflowResult<ClinicalIntervention> {
        let ws = workspace_of(ctx)?;
        if input.issue_description.trim().is_empty() {
            return Err(WorkflowError::validation("An issue description is required"));
        }

        let result = self.load(ws, result_id)?;
        let accepted = result
            .pharmacist_review
            .as_ref()
            .map(|r| r.decision.is_accepted())
            .unwrap_or(false);
        if !accepted {
            return Err(WorkflowError::validation(
                "Only approved or modified results can create an intervention",
            ));
        }
        if self.db.get_intervention_for_result(ws, result_id)?.is_some() {
            return Err(WorkflowError::Conflict(
                "An intervention already exists for this diagnostic result".into(),
            ));
        }

        let default_priority = InterventionPriority::from(result.analysis.risk_assessment.overall_risk);
        let now = Utc::now();
        let intervention = self.db.atomically(|db| {
            let sequence = db.next_intervention_sequence(ws, &intervention_number_prefix(now))?;
            let mut intervention = ClinicalIntervention::new(
                ws.to_string(),
                result.patient_id.clone(),
                ctx.user_id.clone(),
                intervention_number(now, sequence),
                input,
                default_priority,
            );
            intervention.diagnostic_result_id = Some(result.id.clone());
            db.insert_intervention(&intervention)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::InterventionCreated, "clinical_intervention", &intervention.id)
                    .with_details(json!({
                        "interventionNumber": intervention.intervention_number,
                        "resultId": result.id,
                        "priority": intervention.priority,
                    })),
            )?;
            Ok::<_, DbError>(intervention)
        })?;

        info!(
            intervention = %intervention.intervention_number,
            result_id,
            "Intervention created from diagnostic result"
        );
        Ok(intervention)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::InterventionCategory;
    use crate::workflow::tests_support::completed_result;
    use proptest::prelude::*;
    use rxflow_ai::{MockModel, RedFlag, Referral};

    fn ctx() -> WorkspaceContext {
        WorkspaceContext::pharmacist("pharm-1", "ws-1")
    }

    fn submission(status: ReviewStatus) -> ReviewSubmission {
        ReviewSubmission {
            status: Some(status),
            ..Default::default()
        }
    }

    fn intervention_input() -> NewIntervention {
        NewIntervention {
            category: InterventionCategory::DrugTherapyProblem,
            priority: None,
            issue_description: "Needs cardiology review of therapy".into(),
            strategies: vec![],
        }
    }

    #[test]
    fn test_critical_risk_follow_up_within_a_day() {
        assert_eq!(follow_up_window_days(&MockModel::assess("chest pain")), 1);
        assert_eq!(follow_up_window_days(&MockModel::assess("wheezing")), 2);
        assert_eq!(follow_up_window_days(&MockModel::assess("fever")), 7);
        assert_eq!(follow_up_window_days(&MockModel::assess("headache")), 14);
    }

    #[test]
    fn test_modified_requires_modifications() {
        let err = decision_from_submission(&submission(ReviewStatus::Modified)).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let mut blank = submission(ReviewStatus::Rejected);
        blank.rejection_reason = Some("   ".into());
        assert!(decision_from_submission(&blank).is_err());
    }

    #[test]
    fn test_review_is_recorded_once() {
        let db = Database::open_in_memory().unwrap();
        let result = completed_result(&db, "chest pain");
        let service = ReviewService::new(&db);

        let reviewed = service
            .submit_review(&ctx(), &result.id, submission(ReviewStatus::Approved))
            .unwrap();
        let review = reviewed.pharmacist_review.as_ref().unwrap();
        assert!(reviewed.follow_up_required);
        assert_eq!(
            reviewed.follow_up_date.unwrap() - review.reviewed_at,
            Duration::days(1)
        );

        let err = service
            .submit_review(&ctx(), &result.id, submission(ReviewStatus::Approved))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[test]
    fn test_rejection_clears_follow_up() {
        let db = Database::open_in_memory().unwrap();
        let result = completed_result(&db, "fever");
        let mut rejection = submission(ReviewStatus::Rejected);
        rejection.rejection_reason = Some("Symptoms misreported".into());

        let reviewed = ReviewService::new(&db)
            .submit_review(&ctx(), &result.id, rejection)
            .unwrap();
        assert!(!reviewed.follow_up_required);
        assert!(reviewed.follow_up_date.is_none());
    }

    #[test]
    fn test_intervention_requires_accepted_review_and_is_unique() {
        let db = Database::open_in_memory().unwrap();
        let result = completed_result(&db, "chest pain");
        let service = ReviewService::new(&db);

        let err = service
            .create_intervention_from_result(&ctx(), &result.id, intervention_input())
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        service
            .submit_review(&ctx(), &result.id, submission(ReviewStatus::Approved))
            .unwrap();
        let intervention = service
            .create_intervention_from_result(&ctx(), &result.id, intervention_input())
            .unwrap();
        assert_eq!(intervention.priority, InterventionPriority::Critical);
        assert_eq!(intervention.diagnostic_result_id.as_deref(), Some(result.id.as_str()));
        assert!(intervention.intervention_number.starts_with("CI-"));

        let err = service
            .create_intervention_from_result(&ctx(), &result.id, intervention_input())
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    fn severity() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High),
            Just(Severity::Critical),
        ]
    }

    fn urgency() -> impl Strategy<Value = ReferralUrgency> {
        prop_oneof![
            Just(ReferralUrgency::Immediate),
            Just(ReferralUrgency::Within24h),
            Just(ReferralUrgency::WithinWeek),
            Just(ReferralUrgency::Routine),
        ]
    }

    proptest! {
        #[test]
        fn prop_window_is_tightest_bound(
            risk in severity(),
            flags in proptest::collection::vec(severity(), 0..4),
            referral in proptest::option::of((any::<bool>(), urgency())),
        ) {
            let mut analysis = MockModel::assess("headache");
            analysis.risk_assessment.overall_risk = risk;
            analysis.red_flags = flags
                .iter()
                .map(|s| RedFlag { flag: "flag".into(), severity: *s, action: "act".into() })
                .collect();
            analysis.referral = referral.map(|(recommended, urgency)| Referral {
                recommended,
                urgency,
                specialty: "GP".into(),
                reason: "review".into(),
            });

            let days = follow_up_window_days(&analysis);
            prop_assert!((1..=14).contains(&days));
            if risk == Severity::Critical || flags.contains(&Severity::Critical) {
                prop_assert_eq!(days, 1);
            }
            if flags.contains(&Severity::High) {
                prop_assert!(days <= 3);
            }
        }
    }
}
