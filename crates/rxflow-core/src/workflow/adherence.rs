//! Medication adherence tracking workflow.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{
    audit, require_patient, workspace_of, WorkflowError, WorkflowResult, SYSTEM_ACTOR,
};
use crate::db::{Database, DbError};
use crate::models::{
    AdherenceIntervention, AdherenceStatus, AdherenceTracking, AuditAction, AuditEntry,
    MedicationAdherence, MonitoringFrequency, RefillRecord, RefillSource, WorkspaceContext,
};

const ENTITY: &str = "adherence_tracking";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicationInput {
    pub medication_name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub prescribed_date: Option<DateTime<Utc>>,
    /// Score from an initial assessment, kept until refill or dose data arrives
    #[serde(default)]
    pub adherence_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewAdherenceTracking {
    pub patient_id: String,
    pub medications: Vec<MedicationInput>,
    #[serde(default)]
    pub monitoring_frequency: Option<MonitoringFrequency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewRefill {
    pub medication_name: String,
    pub date: DateTime<Utc>,
    pub days_supply: u32,
    pub quantity: f64,
    #[serde(default)]
    pub source: RefillSource,
}

/// Reported dose counts for one medication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicationDataUpdate {
    pub medication_name: String,
    #[serde(default)]
    pub missed_doses: Option<u32>,
    #[serde(default)]
    pub total_doses: Option<u32>,
    #[serde(default)]
    pub adherence_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewAdherenceIntervention {
    pub kind: String,
    pub description: String,
}

/// Totals from one reassessment sweep.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReassessmentSummary {
    pub reassessed: usize,
    pub alerts_raised: usize,
    pub skipped: usize,
}

fn check_score(score: Option<f64>) -> WorkflowResult<()> {
    match score {
        Some(s) if !(0.0..=100.0).contains(&s) => Err(WorkflowError::validation(
            "Adherence scores must be between 0 and 100",
        )),
        _ => Ok(()),
    }
}

/// Adherence workflow.
pub struct AdherenceService<'a> {
    db: &'a Database,
}

impl<'a> AdherenceService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    pub fn create_tracking(
        &self,
        ctx: &WorkspaceContext,
        input: NewAdherenceTracking,
    ) -> WorkflowResult<AdherenceTracking> {
        let ws = workspace_of(ctx)?;
        let mut medications = Vec::with_capacity(input.medications.len());
        for m in input.medications {
            if m.medication_name.trim().is_empty() {
                return Err(WorkflowError::validation("Medication names cannot be empty"));
            }
            check_score(m.adherence_score)?;
            let mut medication = MedicationAdherence::new(m.medication_name.trim(), m.dosage, m.frequency);
            medication.prescribed_date = m.prescribed_date;
            if let Some(score) = m.adherence_score {
                medication.adherence_score = score;
                medication.adherence_status = AdherenceStatus::from_score(score);
            }
            medications.push(medication);
        }
        require_patient(self.db, ws, &input.patient_id)?;

        let threshold = self.db.get_settings(ws)?.adherence_threshold;
        let mut tracking = AdherenceTracking::new(
            ws.to_string(),
            input.patient_id,
            medications,
            input.monitoring_frequency.unwrap_or_default(),
            ctx.user_id.clone(),
        );
        let alerts = tracking.reassess(Utc::now(), threshold);

        self.db.atomically(|db| {
            db.insert_tracking(&tracking)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::AdherenceCreated, ENTITY, &tracking.id)
                    .with_details(json!({
                        "patientId": tracking.patient_id,
                        "medications": tracking.medications.len(),
                        "overallScore": tracking.overall_adherence_score,
                    })),
            )
        })?;

        info!(tracking_id = %tracking.id, alerts, "Adherence tracking created");
        Ok(tracking)
    }

    pub fn get_tracking(&self, ctx: &WorkspaceContext, patient_id: &str) -> WorkflowResult<AdherenceTracking> {
        let ws = workspace_of(ctx)?;
        self.db
            .get_tracking_for_patient(ws, patient_id)?
            .ok_or_else(|| WorkflowError::not_found("Adherence tracking"))
    }

    /// Load, modify and save a tracking record with its audit event.
    /// `change` returns the audit details, or `None` to skip the write.
    fn modify<F>(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
        action: AuditAction,
        change: F,
    ) -> WorkflowResult<AdherenceTracking>
    where
        F: FnOnce(&mut AdherenceTracking, DateTime<Utc>, f64) -> WorkflowResult<Option<serde_json::Value>>,
    {
        let ws = workspace_of(ctx)?;
        let mut tracking = self.get_tracking(ctx, patient_id)?;
        let expected = tracking.updated_at;
        let threshold = self.db.get_settings(ws)?.adherence_threshold;
        let now = Utc::now();

        let Some(details) = change(&mut tracking, now, threshold)? else {
            return Ok(tracking);
        };
        tracking.updated_at = now;

        self.db.atomically(|db| {
            db.update_tracking(&tracking, &expected)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, action, ENTITY, &tracking.id).with_details(details),
            )
        })?;
        Ok(tracking)
    }

    pub fn add_refill(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
        refill: NewRefill,
    ) -> WorkflowResult<AdherenceTracking> {
        if refill.days_supply == 0 {
            return Err(WorkflowError::validation("Days supply must be positive"));
        }
        if refill.quantity <= 0.0 {
            return Err(WorkflowError::validation("Refill quantity must be positive"));
        }

        let tracking = self.modify(ctx, patient_id, AuditAction::AdherenceUpdated, |t, now, threshold| {
            let medication = t
                .medication_mut(&refill.medication_name)
                .ok_or_else(|| WorkflowError::not_found("Medication"))?;
            medication.record_refill(RefillRecord {
                date: refill.date,
                days_supply: refill.days_supply,
                quantity: refill.quantity,
                source: refill.source,
            });
            let alerts = t.reassess(now, threshold);
            Ok(Some(json!({
                "change": "refill",
                "medication": refill.medication_name,
                "daysSupply": refill.days_supply,
                "alertsRaised": alerts,
            })))
        })?;

        info!(tracking_id = %tracking.id, score = tracking.overall_adherence_score, "Refill recorded");
        Ok(tracking)
    }

    /// Replace reported dose counts, then rescore.
    pub fn update_medication_data(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
        updates: Vec<MedicationDataUpdate>,
    ) -> WorkflowResult<AdherenceTracking> {
        if updates.is_empty() {
            return Err(WorkflowError::validation("No medication updates supplied"));
        }
        for update in &updates {
            check_score(update.adherence_score)?;
        }

        self.modify(ctx, patient_id, AuditAction::AdherenceUpdated, |t, now, threshold| {
            for update in &updates {
                let medication = t
                    .medication_mut(&update.medication_name)
                    .ok_or_else(|| WorkflowError::not_found("Medication"))?;
                if let Some(missed) = update.missed_doses {
                    medication.missed_doses = missed;
                }
                if let Some(total) = update.total_doses {
                    medication.total_doses = total;
                }
                if let Some(score) = update.adherence_score {
                    medication.adherence_score = score;
                }
                if medication.missed_doses > medication.total_doses && medication.total_doses > 0 {
                    return Err(WorkflowError::validation(
                        "Missed doses cannot exceed total doses",
                    ));
                }
            }
            let mut alerts = t.reassess(now, threshold);
            for update in updates.iter().filter(|u| u.missed_doses.is_some()) {
                if t.check_missed_doses(&update.medication_name, now) {
                    alerts += 1;
                }
            }
            Ok(Some(json!({
                "change": "medication_data",
                "medications": updates.iter().map(|u| u.medication_name.as_str()).collect::<Vec<_>>(),
                "overallScore": t.overall_adherence_score,
                "alertsRaised": alerts,
            })))
        })
    }

    pub fn record_intervention(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
        input: NewAdherenceIntervention,
    ) -> WorkflowResult<AdherenceTracking> {
        if input.kind.trim().is_empty() || input.description.trim().is_empty() {
            return Err(WorkflowError::validation(
                "Intervention kind and description are required",
            ));
        }
        self.modify(ctx, patient_id, AuditAction::AdherenceUpdated, |t, now, _| {
            t.interventions.push(AdherenceIntervention {
                kind: input.kind.trim().to_string(),
                description: input.description,
                recorded_by: ctx.user_id.clone(),
                recorded_at: now,
            });
            Ok(Some(json!({ "change": "intervention", "kind": input.kind.trim() })))
        })
    }

    /// Acknowledging an acknowledged alert changes nothing.
    pub fn acknowledge_alert(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
        alert_id: &str,
        action_taken: Option<String>,
    ) -> WorkflowResult<AdherenceTracking> {
        self.modify(ctx, patient_id, AuditAction::AdherenceAlertAcknowledged, |t, now, _| {
            let alert = t
                .alert_mut(alert_id)
                .ok_or_else(|| WorkflowError::not_found("Adherence alert"))?;
            if !alert.acknowledge(&ctx.user_id, action_taken, now) {
                debug!(alert_id, "Alert already acknowledged");
                return Ok(None);
            }
            Ok(Some(json!({ "alertId": alert_id, "actionTaken": alert.action_taken })))
        })
    }

    /// Resolving a resolved alert changes nothing.
    pub fn resolve_alert(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
        alert_id: &str,
    ) -> WorkflowResult<AdherenceTracking> {
        self.modify(ctx, patient_id, AuditAction::AdherenceAlertResolved, |t, now, _| {
            let alert = t
                .alert_mut(alert_id)
                .ok_or_else(|| WorkflowError::not_found("Adherence alert"))?;
            if !alert.resolve(&ctx.user_id, now) {
                debug!(alert_id, "Alert already resolved");
                return Ok(None);
            }
            Ok(Some(json!({ "alertId": alert_id })))
        })
    }

    /// Trackings under `threshold`, defaulting to the workspace setting.
    pub fn patients_with_poor_adherence(
        &self,
        ctx: &WorkspaceContext,
        threshold: Option<f64>,
    ) -> WorkflowResult<Vec<AdherenceTracking>> {
        let ws = workspace_of(ctx)?;
        check_score(threshold)?;
        let threshold = match threshold {
            Some(t) => t,
            None => self.db.get_settings(ws)?.adherence_threshold,
        };
        Ok(self.db.list_poor_adherence(ws, threshold)?)
    }

    /// Rescore every tracking whose assessment is due, in all workspaces.
    /// A tracking written concurrently is left for the next sweep.
    pub fn reassess_due(&self, now: DateTime<Utc>) -> WorkflowResult<ReassessmentSummary> {
        let mut summary = ReassessmentSummary::default();
        let mut thresholds: HashMap<String, f64> = HashMap::new();

        for mut tracking in self.db.list_trackings_due(now)? {
            let threshold = match thresholds.get(&tracking.workplace_id) {
                Some(t) => *t,
                None => {
                    let t = self.db.get_settings(&tracking.workplace_id)?.adherence_threshold;
                    thresholds.insert(tracking.workplace_id.clone(), t);
                    t
                }
            };
            let expected = tracking.updated_at;
            let alerts = tracking.reassess(now, threshold);

            let saved = self.db.atomically(|db| {
                db.update_tracking(&tracking, &expected)?;
                audit(
                    db,
                    AuditEntry::new(&tracking.workplace_id, SYSTEM_ACTOR, AuditAction::AdherenceUpdated, ENTITY, &tracking.id)
                        .with_details(json!({
                            "change": "reassessment",
                            "overallScore": tracking.overall_adherence_score,
                            "alertsRaised": alerts,
                        })),
                )
            });
            match saved {
                Ok(()) => {
                    summary.reassessed += 1;
                    summary.alerts_raised += alerts;
                }
                Err(DbError::Conflict(_)) => {
                    warn!(tracking_id = %tracking.id, "Tracking changed during reassessment, skipping");
                    summary.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        if summary.reassessed > 0 {
            info!(
                reassessed = summary.reassessed,
                alerts = summary.alerts_raised,
                "Adherence reassessment finished"
            );
        }
        Ok(summary)
    }
}
