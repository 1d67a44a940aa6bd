//! Clinical intervention workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{audit, require_patient, workspace_of, WorkflowError, WorkflowResult};
use crate::db::Database;
use crate::models::{
    AssignmentStatus, AuditAction, AuditEntry, ClinicalIntervention, InterventionOutcome,
    InterventionStatus, InterventionStrategy, WorkspaceContext,
};

const ENTITY: &str = "clinical_intervention";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewAssignment {
    pub user_id: String,
    pub role: String,
    pub task: String,
}

pub struct InterventionService<'a> {
    db: &'a Database,
}

impl<'a> InterventionService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn get(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<ClinicalIntervention> {
        let ws = workspace_of(ctx)?;
        self.db
            .get_intervention(ws, id)?
            .ok_or_else(|| WorkflowError::not_found("Intervention"))
    }

    pub fn list_for_patient(&self, ctx: &WorkspaceContext, patient_id: &str) -> WorkflowResult<Vec<ClinicalIntervention>> {
        let ws = workspace_of(ctx)?;
        require_patient(self.db, ws, patient_id)?;
        Ok(self.db.list_patient_interventions(ws, patient_id)?)
    }

    fn modify<F>(&self, ctx: &WorkspaceContext, id: &str, change: F) -> WorkflowResult<ClinicalIntervention>
    where
        F: FnOnce(&mut ClinicalIntervention, DateTime<Utc>) -> WorkflowResult<serde_json::Value>,
    {
        let ws = workspace_of(ctx)?;
        let mut intervention = self.get(ctx, id)?;
        let expected = intervention.updated_at;
        let details = change(&mut intervention, Utc::now())?;

        self.db.atomically(|db| {
            db.update_intervention(&intervention, &expected)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::InterventionUpdated, ENTITY, id).with_details(details),
            )
        })?;
        Ok(intervention)
    }

    /// Completing requires recorded outcomes.
    pub fn update_status(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        status: InterventionStatus,
    ) -> WorkflowResult<ClinicalIntervention> {
        let intervention = self.modify(ctx, id, |i, now| {
            let previous = i.set_status(status, now)?;
            Ok(json!({ "change": "status", "from": previous, "to": status }))
        })?;
        info!(
            intervention = %intervention.intervention_number,
            status = status.as_str(),
            "Intervention status updated"
        );
        Ok(intervention)
    }

    pub fn add_strategy(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        strategy: InterventionStrategy,
    ) -> WorkflowResult<ClinicalIntervention> {
        if strategy.kind.trim().is_empty() || strategy.description.trim().is_empty() {
            return Err(WorkflowError::validation(
                "Strategy kind and description are required",
            ));
        }
        self.modify(ctx, id, |i, now| {
            let kind = strategy.kind.clone();
            i.add_strategy(strategy, now)?;
            Ok(json!({ "change": "strategy", "kind": kind }))
        })
    }

    pub fn assign_team_member(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        assignment: NewAssignment,
    ) -> WorkflowResult<ClinicalIntervention> {
        if assignment.user_id.trim().is_empty() || assignment.task.trim().is_empty() {
            return Err(WorkflowError::validation("Assignee and task are required"));
        }
        self.modify(ctx, id, |i, now| {
            let user_id = assignment.user_id.clone();
            i.assign(assignment.user_id, assignment.role, assignment.task, now)?;
            Ok(json!({ "change": "assignment", "userId": user_id }))
        })
    }

    pub fn update_assignment_status(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        index: usize,
        status: AssignmentStatus,
    ) -> WorkflowResult<ClinicalIntervention> {
        self.modify(ctx, id, |i, now| {
            i.update_assignment(index, status, now)
                .ok_or_else(|| WorkflowError::not_found("Assignment"))??;
            Ok(json!({ "change": "assignment_status", "index": index, "status": status }))
        })
    }

    pub fn record_outcome(
        &self,
        ctx: &WorkspaceContext,
        id: &str,
        outcome: InterventionOutcome,
    ) -> WorkflowResult<ClinicalIntervention> {
        self.modify(ctx, id, |i, now| {
            let response = outcome.patient_response;
            i.record_outcome(outcome, now)?;
            Ok(json!({ "change": "outcome", "patientResponse": response }))
        })
    }
}
