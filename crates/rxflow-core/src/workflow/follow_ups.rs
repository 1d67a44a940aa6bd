//! Follow-up scheduling, completion and the missed sweep.

use chrono::{DateTime, Duration, Utc};
use rxflow_ai::{ClinicalAnalysis, Severity};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use super::{audit, workspace_of, WorkflowError, WorkflowResult, SYSTEM_ACTOR};
use crate::db::{Database, DbError};
use crate::models::{
    AuditAction, AuditEntry, DiagnosticFollowUp, DiagnosticResult, FollowUpEvent,
    FollowUpOutcome, FollowUpPriority, FollowUpStatus, FollowUpType, NewFollowUp, RuleBasis,
    WorkspaceContext, MISSED_GRACE_HOURS, RESCHEDULE_TOLERANCE_HOURS,
};

const ENTITY: &str = "follow_up";

/// A follow-up that an analysis calls for.
#[derive(Debug, Clone, PartialEq)]
pub struct FollowUpRule {
    pub basis: RuleBasis,
    pub follow_up_type: FollowUpType,
    pub priority: FollowUpPriority,
    pub days: i64,
    pub max_follow_ups: u32,
    pub description: String,
    pub objectives: Vec<String>,
}

/// The follow-ups an analysis warrants, one per triggered rule.
pub fn derive_scheduling_rules(analysis: &ClinicalAnalysis) -> Vec<FollowUpRule> {
    let mut rules = Vec::new();

    match analysis.risk_assessment.overall_risk {
        Severity::Critical => rules.push(FollowUpRule {
            basis: RuleBasis::CriticalRisk,
            follow_up_type: FollowUpType::SymptomCheck,
            priority: FollowUpPriority::Urgent,
            days: 1,
            max_follow_ups: 3,
            description: "Critical-risk symptom check".into(),
            objectives: vec![
                "Confirm symptoms have not worsened".into(),
                "Verify referral or emergency care was obtained".into(),
            ],
        }),
        Severity::High => rules.push(FollowUpRule {
            basis: RuleBasis::HighRisk,
            follow_up_type: FollowUpType::SymptomCheck,
            priority: FollowUpPriority::High,
            days: 3,
            max_follow_ups: 2,
            description: "High-risk symptom check".into(),
            objectives: vec!["Assess symptom progression".into()],
        }),
        _ => {}
    }

    for flag in analysis
        .red_flags
        .iter()
        .filter(|f| f.severity == Severity::Critical)
    {
        rules.push(FollowUpRule {
            basis: RuleBasis::RedFlag(flag.flag.clone()),
            follow_up_type: FollowUpType::SymptomCheck,
            priority: FollowUpPriority::Urgent,
            days: 1,
            max_follow_ups: 2,
            description: format!("Red flag follow-up: {}", flag.flag),
            objectives: vec![format!("Confirm action taken: {}", flag.action)],
        });
    }

    if !analysis.medication_suggestions.is_empty() {
        rules.push(FollowUpRule {
            basis: RuleBasis::MedicationReview,
            follow_up_type: FollowUpType::MedicationReview,
            priority: FollowUpPriority::Medium,
            days: 7,
            max_follow_ups: 1,
            description: "Review response to suggested medication".into(),
            objectives: vec![
                "Check effectiveness".into(),
                "Check for adverse effects".into(),
            ],
        });
    }

    if analysis
        .diagnoses
        .iter()
        .any(|d| d.severity >= Severity::High)
    {
        rules.push(FollowUpRule {
            basis: RuleBasis::HighSeverityDiagnosis,
            follow_up_type: FollowUpType::OutcomeAssessment,
            priority: FollowUpPriority::Medium,
            days: 14,
            max_follow_ups: 1,
            description: "Outcome assessment for high-severity diagnosis".into(),
            objectives: vec!["Document clinical outcome".into()],
        });
    }

    rules
}

/// A completed follow-up and the successor it scheduled, if any.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpCompletion {
    pub follow_up: DiagnosticFollowUp,
    pub next_follow_up: Option<DiagnosticFollowUp>,
}

/// Follow-up workflow.
pub struct FollowUpService<'a> {
    db: &'a Database,
}

impl<'a> FollowUpService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    fn load(&self, workplace_id: &str, id: &str) -> WorkflowResult<DiagnosticFollowUp> {
        self.db
            .get_follow_up(workplace_id, id)?
            .ok_or_else(|| WorkflowError::not_found("Follow-up"))
    }

    fn result_for_request(&self, workplace_id: &str, request_id: &str) -> WorkflowResult<DiagnosticResult> {
        self.db
            .get_result_for_request(workplace_id, request_id)?
            .ok_or_else(|| WorkflowError::not_found("Diagnostic result"))
    }

    fn insert_with_audit(&self, db: &Database, follow_up: &DiagnosticFollowUp, actor_id: &str) -> Result<(), DbError> {
        db.insert_follow_up(follow_up)?;
        audit(
            db,
            AuditEntry::new(&follow_up.workplace_id, actor_id, AuditAction::FollowUpCreated, ENTITY, &follow_up.id)
                .with_details(json!({
                    "requestId": follow_up.request_id,
                    "ruleBasis": follow_up.rule_basis,
                    "scheduledDate": follow_up.scheduled_date,
                    "rescheduledFrom": follow_up.rescheduled_from,
                })),
        )
    }

    /// Schedule the follow-ups a request's result calls for. Rules that
    /// already have a follow-up for the request are skipped.
    pub fn auto_schedule(&self, ctx: &WorkspaceContext, request_id: &str) -> WorkflowResult<Vec<DiagnosticFollowUp>> {
        let ws = workspace_of(ctx)?;
        let result = self.result_for_request(ws, request_id)?;
        let review = result.pharmacist_review.as_ref();
        if review.map(|r| !r.decision.is_accepted()).unwrap_or(false) {
            return Err(WorkflowError::validation(
                "Follow-ups cannot be scheduled from a rejected result",
            ));
        }
        let assigned_to = review
            .map(|r| r.reviewed_by.clone())
            .unwrap_or_else(|| ctx.user_id.clone());

        let now = Utc::now();
        let scheduled = self.db.atomically(|db| {
            let mut scheduled = Vec::new();
            for rule in derive_scheduling_rules(&result.analysis) {
                if db.count_follow_ups_for_basis(ws, request_id, &rule.basis)? > 0 {
                    debug!(request_id, basis = %rule.basis.key(), "Follow-up rule already scheduled");
                    continue;
                }
                let follow_up = DiagnosticFollowUp {
                    id: uuid::Uuid::new_v4().to_string(),
                    workplace_id: ws.to_string(),
                    patient_id: result.patient_id.clone(),
                    request_id: request_id.to_string(),
                    result_id: Some(result.id.clone()),
                    assigned_to: assigned_to.clone(),
                    follow_up_type: rule.follow_up_type,
                    priority: rule.priority,
                    description: rule.description,
                    objectives: rule.objectives,
                    scheduled_date: now + Duration::days(rule.days),
                    estimated_duration_minutes: 15,
                    status: FollowUpStatus::Scheduled,
                    outcome: None,
                    completed_at: None,
                    rule_basis: Some(rule.basis),
                    max_follow_ups: Some(rule.max_follow_ups),
                    auto_scheduled: true,
                    rescheduled_from: None,
                    reschedule_reason: None,
                    reminder_sent_at: None,
                    created_by: ctx.user_id.clone(),
                    is_deleted: false,
                    created_at: now,
                    updated_at: now,
                };
                self.insert_with_audit(db, &follow_up, &ctx.user_id)?;
                scheduled.push(follow_up);
            }
            Ok::<_, DbError>(scheduled)
        })?;

        info!(request_id, count = scheduled.len(), "Follow-ups auto-scheduled");
        Ok(scheduled)
    }

    /// Schedule a follow-up by hand for a request with a result.
    pub fn create_follow_up(
        &self,
        ctx: &WorkspaceContext,
        request_id: &str,
        input: NewFollowUp,
    ) -> WorkflowResult<DiagnosticFollowUp> {
        let ws = workspace_of(ctx)?;
        if input.description.trim().is_empty() {
            return Err(WorkflowError::validation("A follow-up description is required"));
        }
        let now = Utc::now();
        check_not_in_past(input.scheduled_date, now)?;
        let result = self.result_for_request(ws, request_id)?;

        let follow_up = DiagnosticFollowUp {
            id: uuid::Uuid::new_v4().to_string(),
            workplace_id: ws.to_string(),
            patient_id: result.patient_id.clone(),
            request_id: request_id.to_string(),
            result_id: Some(result.id.clone()),
            assigned_to: input.assigned_to.unwrap_or_else(|| ctx.user_id.clone()),
            follow_up_type: input.follow_up_type,
            priority: input.priority.unwrap_or(FollowUpPriority::Medium),
            description: input.description,
            objectives: input.objectives,
            scheduled_date: input.scheduled_date,
            estimated_duration_minutes: input.estimated_duration_minutes.unwrap_or(30),
            status: FollowUpStatus::Scheduled,
            outcome: None,
            completed_at: None,
            rule_basis: None,
            max_follow_ups: None,
            auto_scheduled: false,
            rescheduled_from: None,
            reschedule_reason: None,
            reminder_sent_at: None,
            created_by: ctx.user_id.clone(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };

        self.db
            .atomically(|db| self.insert_with_audit(db, &follow_up, &ctx.user_id))?;
        info!(follow_up_id = %follow_up.id, request_id, "Follow-up scheduled");
        Ok(follow_up)
    }

    pub fn list_for_request(&self, ctx: &WorkspaceContext, request_id: &str) -> WorkflowResult<Vec<DiagnosticFollowUp>> {
        let ws = workspace_of(ctx)?;
        if self.db.get_request(ws, request_id)?.is_none() {
            return Err(WorkflowError::not_found("Diagnostic request"));
        }
        Ok(self.db.list_follow_ups_for_request(ws, request_id)?)
    }

    pub fn list_overdue(&self, ctx: &WorkspaceContext, now: DateTime<Utc>) -> WorkflowResult<Vec<DiagnosticFollowUp>> {
        let ws = workspace_of(ctx)?;
        Ok(self.db.list_overdue_follow_ups(ws, now)?)
    }

    fn transition(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        event: FollowUpEvent,
        action: AuditAction,
        update: impl FnOnce(&mut DiagnosticFollowUp),
    ) -> WorkflowResult<DiagnosticFollowUp> {
        let ws = workspace_of(ctx)?;
        let mut follow_up = self.load(ws, id)?;
        let previous = follow_up.apply(event, Utc::now())?;
        update(&mut follow_up);

        self.db.atomically(|db| {
            db.save_follow_up_transition(&follow_up, previous)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, action, ENTITY, id)
                    .with_details(json!({ "previousStatus": previous })),
            )
        })?;
        Ok(follow_up)
    }

    pub fn start_follow_up(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<DiagnosticFollowUp> {
        let follow_up = self.transition(ctx, id, FollowUpEvent::Start, AuditAction::FollowUpStarted, |_| {})?;
        info!(follow_up_id = id, "Follow-up started");
        Ok(follow_up)
    }

    pub fn cancel_follow_up(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<DiagnosticFollowUp> {
        let follow_up = self.transition(ctx, id, FollowUpEvent::Cancel, AuditAction::FollowUpCancelled, |_| {})?;
        info!(follow_up_id = id, "Follow-up cancelled");
        Ok(follow_up)
    }

    /// Record an outcome. A requested next date schedules a successor
    /// unless the rule behind this follow-up has used up its allowance.
    pub fn complete_follow_up(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        outcome: FollowUpOutcome,
    ) -> WorkflowResult<FollowUpCompletion> {
        let ws = workspace_of(ctx)?;
        if outcome.notes.trim().is_empty() {
            return Err(WorkflowError::validation("Outcome notes are required"));
        }
        let now = Utc::now();
        if let Some(next) = outcome.next_follow_up_date {
            if next <= now {
                return Err(WorkflowError::validation(
                    "The next follow-up date must be in the future",
                ));
            }
        }

        let mut follow_up = self.load(ws, id)?;
        let previous = follow_up.apply(FollowUpEvent::Complete, now)?;
        let next_date = outcome.next_follow_up_date;
        follow_up.outcome = Some(outcome);

        let (follow_up, next_follow_up) = self.db.atomically(|db| {
            db.save_follow_up_transition(&follow_up, previous)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::FollowUpCompleted, ENTITY, id).with_details(json!({
                    "outcome": follow_up.outcome.as_ref().map(|o| o.status),
                })),
            )?;

            let Some(date) = next_date else {
                return Ok((follow_up, None));
            };
            if let (Some(basis), Some(max)) = (&follow_up.rule_basis, follow_up.max_follow_ups) {
                let used = db.count_follow_ups_for_basis(ws, &follow_up.request_id, basis)?;
                if used >= max {
                    info!(follow_up_id = id, basis = %basis.key(), used, max, "Follow-up allowance used up");
                    return Ok((follow_up, None));
                }
            }

            let successor = follow_up.successor(date, &ctx.user_id);
            self.insert_with_audit(db, &successor, &ctx.user_id)?;
            Ok::<_, DbError>((follow_up, Some(successor)))
        })?;

        info!(
            follow_up_id = id,
            successor = next_follow_up.as_ref().map(|f| f.id.as_str()),
            "Follow-up completed"
        );
        Ok(FollowUpCompletion {
            follow_up,
            next_follow_up,
        })
    }

    /// Move a follow-up to a new date. The original is closed as
    /// `rescheduled` and the returned successor takes its place.
    pub fn reschedule_follow_up(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        new_date: DateTime<Utc>,
        reason: &str,
    ) -> WorkflowResult<DiagnosticFollowUp> {
        let ws = workspace_of(ctx)?;
        if reason.trim().is_empty() {
            return Err(WorkflowError::validation("A reschedule reason is required"));
        }
        let now = Utc::now();
        check_not_in_past(new_date, now)?;

        let mut original = self.load(ws, id)?;
        let previous = original.apply(FollowUpEvent::Reschedule, now)?;
        original.reschedule_reason = Some(reason.trim().to_string());

        let mut successor = original.successor(new_date, &ctx.user_id);
        successor.rescheduled_from = Some(original.id.clone());

        self.db.atomically(|db| {
            db.save_follow_up_transition(&original, previous)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::FollowUpRescheduled, ENTITY, id).with_details(json!({
                    "reason": original.reschedule_reason,
                    "successorId": successor.id,
                    "newDate": new_date,
                })),
            )?;
            self.insert_with_audit(db, &successor, &ctx.user_id)
        })?;

        info!(follow_up_id = id, successor_id = %successor.id, "Follow-up rescheduled");
        Ok(successor)
    }

    /// Mark scheduled follow-ups more than two hours late as missed, in
    /// every workspace. Safe to run repeatedly.
    pub fn mark_missed(&self, now: DateTime<Utc>) -> WorkflowResult<Vec<DiagnosticFollowUp>> {
        let cutoff = now - Duration::hours(MISSED_GRACE_HOURS);
        let mut missed = Vec::new();
        for mut follow_up in self.db.list_late_scheduled_follow_ups(cutoff)? {
            if !follow_up.is_missed_at(now) {
                continue;
            }
            let previous = follow_up.apply(FollowUpEvent::MarkMissed, now)?;
            let saved = self.db.atomically(|db| {
                db.save_follow_up_transition(&follow_up, previous)?;
                audit(
                    db,
                    AuditEntry::new(&follow_up.workplace_id, SYSTEM_ACTOR, AuditAction::FollowUpMissed, ENTITY, &follow_up.id)
                        .with_details(json!({ "scheduledDate": follow_up.scheduled_date })),
                )
            });
            match saved {
                Ok(()) => missed.push(follow_up),
                Err(DbError::Conflict(_)) => {
                    debug!(follow_up_id = %follow_up.id, "Follow-up changed before it could be marked missed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        if !missed.is_empty() {
            info!(count = missed.len(), "Follow-ups marked missed");
        }
        Ok(missed)
    }
}

fn check_not_in_past(date: DateTime<Utc>, now: DateTime<Utc>) -> WorkflowResult<()> {
    if date < now - Duration::hours(RESCHEDULE_TOLERANCE_HOURS) {
        return Err(WorkflowError::validation(
            "The follow-up date cannot be more than an hour in the past",
        ));
    }
    Ok(())
}
