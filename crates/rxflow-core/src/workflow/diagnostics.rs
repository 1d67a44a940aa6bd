//! Diagnostic request lifecycle: submission, AI processing, retry, cancel.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use rxflow_ai::{analyze, AnalysisReport, CaseSummary, ClinicalModel, ExtractionError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::{audit, require_patient, workspace_of, WorkflowError, WorkflowResult, SYSTEM_ACTOR};
use crate::db::{Database, DbError};
use crate::models::{
    AuditAction, AuditEntry, DiagnosticRequest, DiagnosticResult, InputSnapshot,
    NewDiagnosticRequest, Patient, RequestEvent, RequestStatus, VitalSigns, WorkspaceContext,
};

/// Oldest accepted consent timestamp, relative to submission.
pub const CONSENT_MAX_AGE_HOURS: i64 = 24;

/// Clock skew tolerated for consent timestamps in the future.
pub const CONSENT_MAX_SKEW_MINUTES: i64 = 5;

/// Error recorded on a request whose processing never finished.
pub const STUCK_PROCESSING_REASON: &str = "Processing did not finish in time";

const ENTITY: &str = "diagnostic_request";

/// A request with its result and what can be done with it next.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestDetail {
    pub request: DiagnosticRequest,
    pub result: Option<DiagnosticResult>,
    pub status: RequestStatus,
    pub is_active: bool,
    pub can_retry: bool,
}

/// A request claimed for processing, with the case the model will see.
#[derive(Debug, Clone)]
pub struct ProcessingClaim {
    pub request: DiagnosticRequest,
    pub case: CaseSummary,
}

/// How a processing run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessingOutcome {
    Completed {
        request: DiagnosticRequest,
        result: DiagnosticResult,
    },
    Failed {
        request: DiagnosticRequest,
    },
    /// The request changed while the model ran, typically a cancellation.
    Discarded {
        request_id: String,
    },
}

/// Check submitted fields. Returns the consent timestamp to record.
pub fn validate_new_request(
    input: &NewDiagnosticRequest,
    now: DateTime<Utc>,
) -> WorkflowResult<DateTime<Utc>> {
    if input.consent_obtained != Some(true) {
        return Err(WorkflowError::validation(
            "Patient consent must be obtained before requesting a diagnostic analysis",
        ));
    }

    let consent_timestamp = input.consent_timestamp.unwrap_or(now);
    if consent_timestamp < now - Duration::hours(CONSENT_MAX_AGE_HOURS) {
        return Err(WorkflowError::validation(
            "Patient consent timestamp is older than 24 hours",
        ));
    }
    if consent_timestamp > now + Duration::minutes(CONSENT_MAX_SKEW_MINUTES) {
        return Err(WorkflowError::validation(
            "Patient consent timestamp is in the future",
        ));
    }

    if input.patient_id.trim().is_empty() {
        return Err(WorkflowError::validation("A patient is required"));
    }
    validate_snapshot(&input.input_snapshot)?;
    Ok(consent_timestamp)
}

fn validate_snapshot(snapshot: &InputSnapshot) -> WorkflowResult<()> {
    if !snapshot
        .symptoms
        .subjective
        .iter()
        .any(|s| !s.trim().is_empty())
    {
        return Err(WorkflowError::validation(
            "At least one subjective symptom is required",
        ));
    }
    if snapshot.symptoms.duration.trim().is_empty() {
        return Err(WorkflowError::validation("Symptom duration is required"));
    }
    if let Some(vitals) = &snapshot.vitals {
        validate_vitals(vitals)?;
    }
    if snapshot
        .current_medications
        .iter()
        .any(|m| m.name.trim().is_empty())
    {
        return Err(WorkflowError::validation("Medication names cannot be empty"));
    }
    Ok(())
}

fn check_range<T: PartialOrd + std::fmt::Display>(
    label: &str,
    value: Option<T>,
    min: T,
    max: T,
) -> WorkflowResult<()> {
    match value {
        Some(v) if v < min || v > max => Err(WorkflowError::validation(format!(
            "{} must be between {} and {}",
            label, min, max
        ))),
        _ => Ok(()),
    }
}

fn validate_vitals(vitals: &VitalSigns) -> WorkflowResult<()> {
    if let Some(bp) = &vitals.blood_pressure {
        let (systolic, diastolic) = parse_blood_pressure(bp).ok_or_else(|| {
            WorkflowError::validation("Blood pressure must be given as systolic/diastolic")
        })?;
        check_range("Systolic pressure", Some(systolic), 50, 300)?;
        check_range("Diastolic pressure", Some(diastolic), 30, 200)?;
        if diastolic >= systolic {
            return Err(WorkflowError::validation(
                "Diastolic pressure must be below systolic pressure",
            ));
        }
    }
    check_range("Heart rate", vitals.heart_rate, 20, 250)?;
    check_range("Temperature", vitals.temperature, 30.0, 45.0)?;
    check_range("Respiratory rate", vitals.respiratory_rate, 4, 60)?;
    check_range("Oxygen saturation", vitals.oxygen_saturation, 50, 100)?;
    check_range("Blood glucose", vitals.blood_glucose, 10.0, 1000.0)?;
    check_range("Weight", vitals.weight, 0.5, 500.0)?;
    Ok(())
}

fn parse_blood_pressure(bp: &str) -> Option<(u32, u32)> {
    let (systolic, diastolic) = bp.split_once('/')?;
    Some((systolic.trim().parse().ok()?, diastolic.trim().parse().ok()?))
}

/// Aggregate the patient record and the request snapshot into a prompt-ready case.
pub fn build_case_summary(patient: &Patient, snapshot: &InputSnapshot, today: NaiveDate) -> CaseSummary {
    let mut vitals = Vec::new();
    if let Some(v) = &snapshot.vitals {
        if let Some(bp) = &v.blood_pressure {
            vitals.push(("Blood pressure".to_string(), format!("{} mmHg", bp)));
        }
        if let Some(hr) = v.heart_rate {
            vitals.push(("Heart rate".to_string(), format!("{} bpm", hr)));
        }
        if let Some(t) = v.temperature {
            vitals.push(("Temperature".to_string(), format!("{:.1} °C", t)));
        }
        if let Some(rr) = v.respiratory_rate {
            vitals.push(("Respiratory rate".to_string(), format!("{} /min", rr)));
        }
        if let Some(o2) = v.oxygen_saturation {
            vitals.push(("Oxygen saturation".to_string(), format!("{}%", o2)));
        }
        if let Some(g) = v.blood_glucose {
            vitals.push(("Blood glucose".to_string(), format!("{} mg/dL", g)));
        }
        if let Some(w) = v.weight {
            vitals.push(("Weight".to_string(), format!("{} kg", w)));
        }
    }

    let medications = snapshot
        .current_medications
        .iter()
        .map(|m| {
            [m.name.as_str(), m.dosage.as_str(), m.frequency.as_str()]
                .iter()
                .filter(|part| !part.trim().is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect();

    let social_history = snapshot
        .social_history
        .iter()
        .flat_map(|s| {
            [
                ("Smoking", &s.smoking),
                ("Alcohol", &s.alcohol),
                ("Exercise", &s.exercise),
            ]
            .into_iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{}: {}", label, v)))
        })
        .collect();

    let symptoms = &snapshot.symptoms;
    CaseSummary {
        age_years: patient.age_on(today),
        gender: patient.gender.clone(),
        symptoms: symptoms.subjective.clone(),
        objective_findings: symptoms.objective.clone(),
        duration: symptoms.duration.clone(),
        severity: enum_label(&symptoms.severity),
        onset: enum_label(&symptoms.onset),
        vitals,
        medications,
        allergies: snapshot.allergies.clone(),
        medical_history: snapshot.medical_history.clone(),
        social_history,
    }
}

fn enum_label<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::String(s)) => s,
        _ => String::new(),
    }
}

fn start_of_month(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|d| d.and_utc())
        .unwrap_or(now)
}

/// Diagnostic request workflow.
pub struct DiagnosticService<'a> {
    db: &'a Database,
}

impl<'a> DiagnosticService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Validate and store a new pending request.
    pub fn create_request(
        &self,
        ctx: &WorkspaceContext,
        input: NewDiagnosticRequest,
    ) -> WorkflowResult<DiagnosticRequest> {
        let ws = workspace_of(ctx)?;
        let now = Utc::now();
        let consent_timestamp = validate_new_request(&input, now)?;
        require_patient(self.db, ws, &input.patient_id)?;

        let settings = self.db.get_settings(ws)?;
        if !settings.ai_diagnostics_enabled {
            return Err(WorkflowError::UpgradeRequired(
                "AI diagnostics are not available on this workspace's plan".into(),
            ));
        }
        if let Some(limit) = settings.monthly_diagnostic_limit {
            let used = self.db.count_requests_since(ws, start_of_month(now))?;
            if used >= limit {
                return Err(WorkflowError::PlanLimitExceeded(format!(
                    "Monthly diagnostic limit of {} requests reached",
                    limit
                )));
            }
        }

        let request = DiagnosticRequest::new(ws.to_string(), ctx.user_id.clone(), input, consent_timestamp);
        self.db.atomically(|db| {
            db.insert_request(&request)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::RequestCreated, ENTITY, &request.id)
                    .with_details(json!({
                        "patientId": request.patient_id,
                        "priority": request.priority,
                    })),
            )
        })?;

        info!(
            request_id = %request.id,
            patient_id = %request.patient_id,
            workplace_id = ws,
            "Diagnostic request created"
        );
        Ok(request)
    }

    fn load(&self, workplace_id: &str, id: &str) -> WorkflowResult<DiagnosticRequest> {
        self.db
            .get_request(workplace_id, id)?
            .ok_or_else(|| WorkflowError::not_found("Diagnostic request"))
    }

    pub fn get_request_detail(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<RequestDetail> {
        let ws = workspace_of(ctx)?;
        let request = self.load(ws, id)?;
        let result = self.db.get_result_for_request(ws, id)?;
        Ok(RequestDetail {
            status: request.status,
            is_active: request.status.is_active(),
            can_retry: request.can_retry(),
            request,
            result,
        })
    }

    /// A patient's requests, newest first.
    pub fn patient_history(
        &self,
        ctx: &WorkspaceContext,
        patient_id: &str,
    ) -> WorkflowResult<Vec<DiagnosticRequest>> {
        let ws = workspace_of(ctx)?;
        require_patient(self.db, ws, patient_id)?;
        Ok(self.db.list_patient_requests(ws, patient_id)?)
    }

    fn claim(
        &self,
        workplace_id: &str,
        actor_id: &str,
        id: &str,
        event: RequestEvent,
    ) -> WorkflowResult<ProcessingClaim> {
        let mut request = self.load(workplace_id, id)?;
        let patient = self
            .db
            .get_patient(workplace_id, &request.patient_id)?
            .ok_or_else(|| WorkflowError::not_found("Patient"))?;

        let action = match event {
            RequestEvent::Retry => AuditAction::RequestRetried,
            _ => AuditAction::RequestProcessingStarted,
        };
        let now = Utc::now();
        let previous = request.apply(event, now)?;

        self.db.atomically(|db| {
            db.save_request_transition(&request, previous)?;
            audit(
                db,
                AuditEntry::new(workplace_id, actor_id, action, ENTITY, &request.id)
                    .with_details(json!({ "retryCount": request.retry_count })),
            )
        })?;

        let case = build_case_summary(&patient, &request.input_snapshot, now.date_naive());
        Ok(ProcessingClaim { request, case })
    }

    /// Claim a pending request. Losing the claim to another worker is a conflict.
    pub fn begin_processing(&self, workplace_id: &str, actor_id: &str, id: &str) -> WorkflowResult<ProcessingClaim> {
        self.claim(workplace_id, actor_id, id, RequestEvent::StartProcessing)
    }

    /// Claim a failed request for another attempt.
    pub fn retry_request(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<ProcessingClaim> {
        let ws = workspace_of(ctx)?;
        let claim = self.claim(ws, &ctx.user_id, id, RequestEvent::Retry)?;
        info!(request_id = id, retry_count = claim.request.retry_count, "Diagnostic request retried");
        Ok(claim)
    }

    /// Store the outcome of a model run for a claimed request.
    pub fn finish_processing(
        &self,
        claim: ProcessingClaim,
        outcome: Result<AnalysisReport, ExtractionError>,
    ) -> WorkflowResult<ProcessingOutcome> {
        let mut request = claim.request;
        let ws = request.workplace_id.clone();
        let now = Utc::now();

        let stored = match outcome {
            Ok(report) => {
                let previous = request.apply(RequestEvent::Complete, now)?;
                let result = DiagnosticResult::from_report(
                    request.id.clone(),
                    ws.clone(),
                    request.patient_id.clone(),
                    report,
                );
                self.db
                    .atomically(|db| {
                        db.save_request_transition(&request, previous)?;
                        db.insert_result(&result)?;
                        audit(
                            db,
                            AuditEntry::new(&ws, &request.pharmacist_id, AuditAction::RequestCompleted, ENTITY, &request.id)
                                .with_details(json!({
                                    "resultId": result.id,
                                    "overallRisk": result.analysis.risk_assessment.overall_risk,
                                    "processingTimeMs": request.processing_time_ms(),
                                })),
                        )
                    })
                    .map(|_| {
                        info!(
                            request_id = %request.id,
                            result_id = %result.id,
                            risk = result.analysis.risk_assessment.overall_risk.as_str(),
                            "Diagnostic request completed"
                        );
                        ProcessingOutcome::Completed {
                            request: request.clone(),
                            result,
                        }
                    })
            }
            Err(error) => {
                let previous = request.apply(
                    RequestEvent::Fail {
                        reason: error.to_string(),
                    },
                    now,
                )?;
                self.store_failure(&request, previous, &request.pharmacist_id)
            }
        };

        match stored {
            Ok(outcome) => Ok(outcome),
            Err(DbError::Conflict(reason)) => {
                warn!(request_id = %request.id, %reason, "Discarding analysis for changed request");
                Ok(ProcessingOutcome::Discarded { request_id: request.id })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist a request already moved to failed, with its audit event.
    fn store_failure(
        &self,
        request: &DiagnosticRequest,
        previous: RequestStatus,
        actor_id: &str,
    ) -> Result<ProcessingOutcome, DbError> {
        self.db.atomically(|db| {
            db.save_request_transition(request, previous)?;
            audit(
                db,
                AuditEntry::new(&request.workplace_id, actor_id, AuditAction::RequestFailed, ENTITY, &request.id)
                    .with_details(json!({
                        "error": request.error_message,
                        "retryCount": request.retry_count,
                    })),
            )
        })?;
        warn!(
            request_id = %request.id,
            retry_count = request.retry_count,
            error = request.error_message.as_deref().unwrap_or_default(),
            "Diagnostic request failed"
        );
        Ok(ProcessingOutcome::Failed {
            request: request.clone(),
        })
    }

    /// Fail requests whose processing started before `cutoff` and never
    /// finished, so they can be retried and stop blocking their patient.
    pub fn fail_stuck_requests(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Vec<DiagnosticRequest>> {
        let mut failed = Vec::new();
        for mut request in self.db.list_stuck_processing_requests(cutoff)? {
            let previous = request.apply(
                RequestEvent::Fail {
                    reason: STUCK_PROCESSING_REASON.to_string(),
                },
                now,
            )?;
            match self.store_failure(&request, previous, SYSTEM_ACTOR) {
                Ok(_) => failed.push(request),
                Err(DbError::Conflict(_)) => {
                    debug!(request_id = %request.id, "Stuck request changed before it could be failed");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(failed)
    }

    /// Run a claimed request through the model while holding the database.
    /// The server splits these phases to release its lock during analysis.
    pub fn run_claim(&self, claim: ProcessingClaim, model: &dyn ClinicalModel) -> WorkflowResult<ProcessingOutcome> {
        let report = analyze(model, &claim.case);
        self.finish_processing(claim, report)
    }

    /// Claim, analyse and store a pending request.
    pub fn process_request(
        &self,
        workplace_id: &str,
        actor_id: &str,
        id: &str,
        model: &dyn ClinicalModel,
    ) -> WorkflowResult<ProcessingOutcome> {
        let claim = self.begin_processing(workplace_id, actor_id, id)?;
        self.run_claim(claim, model)
    }

    pub fn cancel_request(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<DiagnosticRequest> {
        let ws = workspace_of(ctx)?;
        let mut request = self.load(ws, id)?;
        let previous = request.apply(
            RequestEvent::Cancel {
                by: ctx.user_id.clone(),
            },
            Utc::now(),
        )?;

        self.db.atomically(|db| {
            db.save_request_transition(&request, previous)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::RequestCancelled, ENTITY, &request.id)
                    .with_details(json!({ "previousStatus": previous })),
            )
        })?;

        info!(request_id = id, previous = previous.as_str(), "Diagnostic request cancelled");
        Ok(request)
    }

    /// Soft-delete a request and its result. Requests being processed are kept.
    pub fn delete_request(&self, ctx: &WorkspaceContext, id: &str) -> WorkflowResult<()> {
        let ws = workspace_of(ctx)?;
        let request = self.load(ws, id)?;
        if request.status == RequestStatus::Processing {
            return Err(WorkflowError::validation(
                "Cannot delete a diagnostic request while it is being processed",
            ));
        }

        let now = Utc::now();
        self.db.atomically(|db| {
            if !db.soft_delete_request(ws, id, now)? {
                return Err(DbError::Conflict(format!(
                    "Diagnostic request {} changed before it could be deleted",
                    id
                )));
            }
            db.soft_delete_result_for_request(ws, id, now)?;
            audit(
                db,
                AuditEntry::new(ws, &ctx.user_id, AuditAction::RequestDeleted, ENTITY, id),
            )
        })?;

        info!(request_id = id, "Diagnostic request deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use crate::models::{WorkspaceSettings, MAX_RETRIES};
    use rxflow_ai::{MockModel, ScriptedModel};

    fn ctx() -> WorkspaceContext {
        WorkspaceContext::pharmacist("pharm-1", "ws-1")
    }

    fn input(patient_id: &str, symptom: &str) -> NewDiagnosticRequest {
        NewDiagnosticRequest {
            patient_id: patient_id.to_string(),
            location_id: None,
            input_snapshot: fixtures::snapshot(symptom),
            priority: None,
            consent_obtained: Some(true),
            consent_timestamp: None,
        }
    }

    #[test]
    fn test_consent_is_required() {
        let now = Utc::now();
        let mut missing = input("p", "cough");
        missing.consent_obtained = None;
        let err = validate_new_request(&missing, now).unwrap_err();
        assert!(err.to_string().contains("consent"));

        let mut stale = input("p", "cough");
        stale.consent_timestamp = Some(now - Duration::hours(25));
        assert!(validate_new_request(&stale, now).is_err());

        let mut skewed = input("p", "cough");
        skewed.consent_timestamp = Some(now + Duration::minutes(4));
        assert!(validate_new_request(&skewed, now).is_ok());
    }

    #[test]
    fn test_vitals_out_of_range_rejected() {
        let mut request = input("p", "cough");
        request.input_snapshot.vitals = Some(VitalSigns {
            blood_pressure: Some("80/120".into()),
            ..Default::default()
        });
        assert!(validate_new_request(&request, Utc::now()).is_err());

        request.input_snapshot.vitals = Some(VitalSigns {
            heart_rate: Some(400),
            ..Default::default()
        });
        assert!(validate_new_request(&request, Utc::now()).is_err());
    }

    #[test]
    fn test_second_active_request_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);

        service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();
        let err = service
            .create_request(&ctx(), input(&patient.id, "fever"))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Conflict(_)));
    }

    #[test]
    fn test_plan_gates() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);

        let mut settings = WorkspaceSettings::defaults_for("ws-1");
        settings.ai_diagnostics_enabled = false;
        db.upsert_settings(&settings).unwrap();
        let err = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap_err();
        assert_eq!(err.code(), "UPGRADE_REQUIRED");

        settings.ai_diagnostics_enabled = true;
        settings.monthly_diagnostic_limit = Some(1);
        db.upsert_settings(&settings).unwrap();
        let first = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();
        service.cancel_request(&ctx(), &first.id).unwrap();
        let err = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap_err();
        assert_eq!(err.code(), "PLAN_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_process_stores_result() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let request = service.create_request(&ctx(), input(&patient.id, "chest pain")).unwrap();

        let outcome = service
            .process_request("ws-1", "pharm-1", &request.id, &MockModel)
            .unwrap();
        let ProcessingOutcome::Completed { request, result } = outcome else {
            panic!("expected completion");
        };
        assert_eq!(request.status, RequestStatus::Completed);
        assert!(request.processing_completed_at.is_some());
        assert_eq!(result.ai_metadata.model_id, "mock-rules-v1");

        let detail = service.get_request_detail(&ctx(), &request.id).unwrap();
        assert!(!detail.is_active);
        assert!(!detail.can_retry);
        assert_eq!(detail.result.map(|r| r.id), Some(result.id));
    }

    #[test]
    fn test_second_claim_conflicts() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let request = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();

        service.begin_processing("ws-1", "pharm-1", &request.id).unwrap();
        let err = service
            .begin_processing("ws-1", "pharm-1", &request.id)
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Transition(_)));
    }

    #[test]
    fn test_retry_ceiling() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let model = ScriptedModel::failing("backend unavailable");
        let request = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();

        let outcome = service
            .process_request("ws-1", "pharm-1", &request.id, &model)
            .unwrap();
        assert!(matches!(outcome, ProcessingOutcome::Failed { .. }));

        for _ in 1..MAX_RETRIES {
            let claim = service.retry_request(&ctx(), &request.id).unwrap();
            service.run_claim(claim, &model).unwrap();
        }

        let stored = db.get_request("ws-1", &request.id).unwrap().unwrap();
        assert_eq!(stored.retry_count, MAX_RETRIES);
        assert_eq!(stored.status, RequestStatus::Failed);
        assert!(stored.error_message.unwrap().contains("backend unavailable"));

        let err = service.retry_request(&ctx(), &request.id).unwrap_err();
        assert!(err.to_string().contains("retry limit"));
    }

    #[test]
    fn test_cancel_during_analysis_discards_result() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let request = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();

        let claim = service.begin_processing("ws-1", "pharm-1", &request.id).unwrap();
        service.cancel_request(&ctx(), &request.id).unwrap();

        let outcome = service.run_claim(claim, &MockModel).unwrap();
        assert!(matches!(outcome, ProcessingOutcome::Discarded { .. }));
        assert!(db.get_result_for_request("ws-1", &request.id).unwrap().is_none());
        let stored = db.get_request("ws-1", &request.id).unwrap().unwrap();
        assert_eq!(stored.status, RequestStatus::Cancelled);
    }

    #[test]
    fn test_cancel_only_while_active() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let request = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();
        service
            .process_request("ws-1", "pharm-1", &request.id, &MockModel)
            .unwrap();

        let err = service.cancel_request(&ctx(), &request.id).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");
    }

    #[test]
    fn test_other_workspace_sees_nothing() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let request = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();

        let outsider = WorkspaceContext::pharmacist("pharm-9", "ws-2");
        let err = service.get_request_detail(&outsider, &request.id).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
        assert!(service.cancel_request(&outsider, &request.id).is_err());
    }

    #[test]
    fn test_delete_hides_request_and_frees_patient() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let service = DiagnosticService::new(&db);
        let request = service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();

        service.delete_request(&ctx(), &request.id).unwrap();
        assert!(service.get_request_detail(&ctx(), &request.id).is_err());
        assert!(service.patient_history(&ctx(), &patient.id).unwrap().is_empty());
        service.create_request(&ctx(), input(&patient.id, "cough")).unwrap();
    }

    #[test]
    fn test_case_summary_includes_vitals_and_history() {
        let patient = Patient::new(
            "ws-1".into(),
            crate::models::NewPatient {
                mrn: "MRN-1".into(),
                first_name: "Ada".into(),
                last_name: "Obi".into(),
                date_of_birth: NaiveDate::from_ymd_opt(1980, 6, 15),
                gender: Some("female".into()),
            },
        );
        let mut snapshot = fixtures::snapshot("cough");
        snapshot.vitals = Some(VitalSigns {
            blood_pressure: Some("130/85".into()),
            temperature: Some(38.2),
            ..Default::default()
        });
        snapshot.current_medications = vec![crate::models::CurrentMedication {
            name: "Lisinopril".into(),
            dosage: "10mg".into(),
            frequency: "daily".into(),
        }];

        let today = NaiveDate::from_ymd_opt(2026, 6, 14).unwrap();
        let case = build_case_summary(&patient, &snapshot, today);
        assert_eq!(case.age_years, Some(45));
        assert_eq!(case.severity, "moderate");
        assert_eq!(case.medications, vec!["Lisinopril 10mg daily"]);
        assert!(case
            .vitals
            .contains(&("Temperature".to_string(), "38.2 °C".to_string())));
    }
}
