//! Patient registration and workspace settings.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use super::{audit, workspace_of, WorkflowError, WorkflowResult};
use crate::db::Database;
use crate::models::{
    AuditAction, AuditEntry, NewPatient, Patient, WorkspaceContext, WorkspaceSettings,
    DEFAULT_ADHERENCE_THRESHOLD,
};

/// Settings as submitted. Omitted fields take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SettingsInput {
    #[serde(default = "default_threshold")]
    pub adherence_threshold: f64,
    #[serde(default = "default_enabled")]
    pub ai_diagnostics_enabled: bool,
    #[serde(default)]
    pub monthly_diagnostic_limit: Option<u32>,
}

fn default_threshold() -> f64 {
    DEFAULT_ADHERENCE_THRESHOLD
}

fn default_enabled() -> bool {
    true
}

pub struct WorkspaceService<'a> {
    db: &'a Database,
}

impl<'a> WorkspaceService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn register_patient(&self, ctx: &WorkspaceContext, input: NewPatient) -> WorkflowResult<Patient> {
        let ws = workspace_of(ctx)?;
        if input.mrn.trim().is_empty() {
            return Err(WorkflowError::validation("An MRN is required"));
        }
        if input.first_name.trim().is_empty() || input.last_name.trim().is_empty() {
            return Err(WorkflowError::validation("Patient first and last names are required"));
        }
        if let Some(dob) = input.date_of_birth {
            if dob > Utc::now().date_naive() {
                return Err(WorkflowError::validation("Date of birth cannot be in the future"));
            }
        }

        let patient = Patient::new(ws.to_string(), input);
        self.db.atomically(|db| {
            db.insert_patient(&patient)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::PatientCreated, "patient", &patient.id)
                    .with_details(json!({ "mrn": patient.mrn })),
            )
        })?;

        info!(patient_id = %patient.id, "Patient registered");
        Ok(patient)
    }

    pub fn get_patient(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<Patient> {
        let ws = workspace_of(ctx)?;
        self.db
            .get_patient(ws, id)?
            .ok_or_else(|| WorkflowError::not_found("Patient"))
    }

    pub fn settings(&self, ctx: &WorkspaceContext) -> WorkflowResult<WorkspaceSettings> {
        let ws = workspace_of(ctx)?;
        Ok(self.db.get_settings(ws)?)
    }

    pub fn update_settings(
        &self,
        ctx: &WorkspaceContext,
        input: SettingsInput,
    ) -> WorkflowResult<WorkspaceSettings> {
        let ws = workspace_of(ctx)?;
        if !(0.0..=100.0).contains(&input.adherence_threshold) {
            return Err(WorkflowError::validation(
                "The adherence threshold must be between 0 and 100",
            ));
        }

        let previous = self.db.get_settings(ws)?;
        let settings = WorkspaceSettings {
            workplace_id: ws.to_string(),
            adherence_threshold: input.adherence_threshold,
            ai_diagnostics_enabled: input.ai_diagnostics_enabled,
            monthly_diagnostic_limit: input.monthly_diagnostic_limit,
        };
        self.db.atomically(|db| {
            db.upsert_settings(&settings)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::SettingsUpdated, "workspace_settings", ws)
                    .with_details(json!({ "before": previous, "after": settings })),
            )
        })?;

        info!(workplace_id = ws, "Workspace settings updated");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> WorkspaceContext {
        WorkspaceContext::pharmacist("owner-1", "ws-1")
    }

    fn new_patient(mrn: &str) -> NewPatient {
        NewPatient {
            mrn: mrn.into(),
            first_name: "Grace".into(),
            last_name: "Mensah".into(),
            date_of_birth: None,
            gender: None,
        }
    }

    #[test]
    fn test_duplicate_mrn_conflicts_within_workspace_only() {
        let db = Database::open_in_memory().unwrap();
        let service = WorkspaceService::new(&db);
        service.register_patient(&ctx(), new_patient("MRN-1")).unwrap();

        let err = service.register_patient(&ctx(), new_patient("MRN-1")).unwrap_err();
        assert_eq!(err.code(), "CONFLICT");

        let other = WorkspaceContext::pharmacist("owner-2", "ws-2");
        assert!(service.register_patient(&other, new_patient("MRN-1")).is_ok());
    }

    #[test]
    fn test_settings_default_then_update() {
        let db = Database::open_in_memory().unwrap();
        let service = WorkspaceService::new(&db);
        assert_eq!(service.settings(&ctx()).unwrap(), WorkspaceSettings::defaults_for("ws-1"));

        let err = service
            .update_settings(
                &ctx(),
                SettingsInput {
                    adherence_threshold: 120.0,
                    ai_diagnostics_enabled: true,
                    monthly_diagnostic_limit: None,
                },
            )
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let input: SettingsInput =
            serde_json::from_str(r#"{"adherenceThreshold": 60, "monthlyDiagnosticLimit": 5}"#).unwrap();
        let updated = service.update_settings(&ctx(), input).unwrap();
        assert_eq!(updated.adherence_threshold, 60.0);
        assert!(updated.ai_diagnostics_enabled);
        assert_eq!(service.settings(&ctx()).unwrap().monthly_diagnostic_limit, Some(5));

        let history = db.list_entity_audit("ws-1", "ws-1").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, AuditAction::SettingsUpdated);
    }
}
