//! End-to-end workflow tests against an on-disk database.

use chrono::{Duration, Utc};
use rxflow_ai::{MockModel, ScriptedModel};
use rxflow_core::db::Database;
use rxflow_core::models::{
    AlertType, AuditAction, FollowUpOutcome, FollowUpStatus, InputSnapshot, InterventionCategory,
    InterventionStatus, NewDiagnosticRequest, NewIntervention, NewPatient, OutcomeStatus, Patient,
    RequestStatus, ReviewStatus, ReviewSubmission, SymptomOnset, SymptomSet, SymptomSeverity,
    WorkspaceContext, MAX_RETRIES,
};
use rxflow_core::export::ComplianceExporter;
use rxflow_core::models::DiagnosticResult;
use rxflow_core::workflow::{
    AdherenceService, DiagnosticService, FollowUpService, InterventionService, MaintenanceService,
    MedicationInput, NewAdherenceTracking, ProcessingOutcome, ReviewService, TracingSink,
    WorkspaceService,
};
use tempfile::TempDir;

fn ctx(ws: &str) -> WorkspaceContext {
    WorkspaceContext::pharmacist("pharm-1", ws)
}

fn open_db() -> (TempDir, Database) {
    let dir = TempDir::new().unwrap();
    let db = Database::open(dir.path().join("rxflow.db")).unwrap();
    (dir, db)
}

fn register(db: &Database, ws: &str, mrn: &str) -> Patient {
    WorkspaceService::new(db)
        .register_patient(
            &ctx(ws),
            NewPatient {
                mrn: mrn.to_string(),
                first_name: "Tomas".into(),
                last_name: "Reyes".into(),
                date_of_birth: chrono::NaiveDate::from_ymd_opt(1958, 3, 14),
                gender: Some("male".into()),
            },
        )
        .unwrap()
}

fn new_request(patient_id: &str, symptom: &str) -> NewDiagnosticRequest {
    NewDiagnosticRequest {
        patient_id: patient_id.to_string(),
        location_id: None,
        input_snapshot: InputSnapshot {
            symptoms: SymptomSet {
                subjective: vec![symptom.to_string()],
                objective: vec![],
                duration: "6 hours".into(),
                severity: SymptomSeverity::Severe,
                onset: SymptomOnset::Acute,
            },
            vitals: None,
            current_medications: vec![],
            allergies: vec![],
            medical_history: vec![],
            social_history: None,
        },
        priority: None,
        consent_obtained: Some(true),
        consent_timestamp: Some(Utc::now() - Duration::minutes(5)),
    }
}

fn processed(db: &Database, ws: &str, patient_id: &str, symptom: &str) -> DiagnosticResult {
    let service = DiagnosticService::new(db);
    let request = service.create_request(&ctx(ws), new_request(patient_id, symptom)).unwrap();
    match service.process_request(ws, "pharm-1", &request.id, &MockModel).unwrap() {
        ProcessingOutcome::Completed { result, .. } => result,
        other => panic!("expected completion, got {:?}", other),
    }
}

#[test]
fn test_critical_case_end_to_end() {
    let (_dir, db) = open_db();
    let patient = register(&db, "ws-1", "MRN-100");
    let result = processed(&db, "ws-1", &patient.id, "crushing chest pain");
    assert!(result.disclaimer.contains("pharmacist"));

    // approve: the follow-up window is one day for critical risk
    let reviewed = ReviewService::new(&db)
        .submit_review(
            &ctx("ws-1"),
            &result.id,
            ReviewSubmission {
                status: Some(ReviewStatus::Approved),
                review_notes: Some("Sent to ED".into()),
                ..Default::default()
            },
        )
        .unwrap();
    let review = reviewed.pharmacist_review.as_ref().unwrap();
    assert_eq!(
        reviewed.follow_up_date.unwrap() - review.reviewed_at,
        Duration::days(1)
    );

    let follow_ups = FollowUpService::new(&db)
        .auto_schedule(&ctx("ws-1"), &result.request_id)
        .unwrap();
    assert!(!follow_ups.is_empty());
    assert!(follow_ups
        .iter()
        .any(|f| f.scheduled_date - Utc::now() <= Duration::days(1)));

    let intervention = ReviewService::new(&db)
        .create_intervention_from_result(
            &ctx("ws-1"),
            &result.id,
            NewIntervention {
                category: InterventionCategory::Other,
                priority: None,
                issue_description: "Urgent cardiology referral".into(),
                strategies: vec![],
            },
        )
        .unwrap();
    let started = InterventionService::new(&db)
        .update_status(&ctx("ws-1"), &intervention.id, InterventionStatus::InProgress)
        .unwrap();
    assert!(started.started_at.is_some());

    let verification = db.verify_audit_chain("ws-1").unwrap();
    assert!(verification.valid);
    let export = ComplianceExporter::new(&db).export("ws-1", None, None).unwrap();
    assert_eq!(
        export.counts_by_action.get(&AuditAction::FollowUpCreated),
        Some(&follow_ups.len())
    );
}

#[test]
fn test_active_request_conflict_and_retry_ceiling() {
    let (_dir, db) = open_db();
    let patient = register(&db, "ws-1", "MRN-200");
    let service = DiagnosticService::new(&db);

    let request = service.create_request(&ctx("ws-1"), new_request(&patient.id, "cough")).unwrap();
    let err = service
        .create_request(&ctx("ws-1"), new_request(&patient.id, "cough"))
        .unwrap_err();
    assert_eq!(err.code(), "CONFLICT");

    let model = ScriptedModel::failing("model timed out");
    service.process_request("ws-1", "pharm-1", &request.id, &model).unwrap();
    for _ in 1..MAX_RETRIES {
        let claim = service.retry_request(&ctx("ws-1"), &request.id).unwrap();
        service.run_claim(claim, &model).unwrap();
    }
    let err = service.retry_request(&ctx("ws-1"), &request.id).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");

    // a failed request no longer blocks a new one
    let detail = service.get_request_detail(&ctx("ws-1"), &request.id).unwrap();
    assert_eq!(detail.status, RequestStatus::Failed);
    assert!(!detail.can_retry);
    assert!(service.create_request(&ctx("ws-1"), new_request(&patient.id, "cough")).is_ok());
}

#[test]
fn test_consent_is_required() {
    let (_dir, db) = open_db();
    let patient = register(&db, "ws-1", "MRN-300");
    let mut input = new_request(&patient.id, "headache");
    input.consent_obtained = Some(false);

    let err = DiagnosticService::new(&db).create_request(&ctx("ws-1"), input).unwrap_err();
    assert_eq!(err.code(), "VALIDATION_ERROR");
    assert!(err.to_string().to_lowercase().contains("consent"));
}

#[test]
fn test_tenant_isolation() {
    let (_dir, db) = open_db();
    let patient = register(&db, "ws-a", "MRN-400");
    let result = processed(&db, "ws-a", &patient.id, "fever");

    let other = ctx("ws-b");
    let diagnostics = DiagnosticService::new(&db);
    assert_eq!(
        diagnostics.get_request_detail(&other, &result.request_id).unwrap_err().code(),
        "NOT_FOUND"
    );
    assert_eq!(
        diagnostics
            .create_request(&other, new_request(&patient.id, "fever"))
            .unwrap_err()
            .code(),
        "NOT_FOUND"
    );
    assert_eq!(
        ReviewService::new(&db)
            .submit_review(
                &other,
                &result.id,
                ReviewSubmission {
                    status: Some(ReviewStatus::Approved),
                    ..Default::default()
                },
            )
            .unwrap_err()
            .code(),
        "NOT_FOUND"
    );
    assert!(db.list_audit_events("ws-b", None, None).unwrap().is_empty());
}

#[test]
fn test_follow_up_lifecycle_with_maintenance() {
    let (_dir, db) = open_db();
    let patient = register(&db, "ws-1", "MRN-500");
    let result = processed(&db, "ws-1", &patient.id, "sore throat and fever");
    ReviewService::new(&db)
        .submit_review(
            &ctx("ws-1"),
            &result.id,
            ReviewSubmission {
                status: Some(ReviewStatus::Approved),
                ..Default::default()
            },
        )
        .unwrap();

    let follow_ups = FollowUpService::new(&db);
    let scheduled = follow_ups.auto_schedule(&ctx("ws-1"), &result.request_id).unwrap();
    assert_eq!(scheduled.len(), 1);
    let first = &scheduled[0];

    // eight days on, the sweep marks the medication review missed, once
    let later = first.scheduled_date + Duration::days(1);
    let maintenance = MaintenanceService::new(&db, &TracingSink);
    assert_eq!(maintenance.run(later).unwrap().missed_follow_ups, 1);
    assert_eq!(maintenance.run(later).unwrap().missed_follow_ups, 0);

    let successor = follow_ups
        .reschedule_follow_up(&ctx("ws-1"), &first.id, Utc::now() + Duration::days(2), "Patient travelling")
        .unwrap();
    let completion = follow_ups
        .complete_follow_up(
            &ctx("ws-1"),
            &successor.id,
            FollowUpOutcome {
                status: OutcomeStatus::Successful,
                notes: "Symptoms resolved".into(),
                next_actions: vec![],
                next_follow_up_date: Some(Utc::now() + Duration::days(7)),
            },
        )
        .unwrap();
    assert_eq!(completion.follow_up.status, FollowUpStatus::Completed);
    assert!(completion.next_follow_up.is_none());

    let all = follow_ups.list_for_request(&ctx("ws-1"), &result.request_id).unwrap();
    let statuses: Vec<_> = all.iter().map(|f| f.status).collect();
    assert!(statuses.contains(&FollowUpStatus::Rescheduled));
    assert!(statuses.contains(&FollowUpStatus::Completed));
}

#[test]
fn test_adherence_alerts_and_mean_score() {
    let (_dir, db) = open_db();
    let patient = register(&db, "ws-1", "MRN-600");
    let tracking = AdherenceService::new(&db)
        .create_tracking(
            &ctx("ws-1"),
            NewAdherenceTracking {
                patient_id: patient.id.clone(),
                medications: vec![
                    MedicationInput {
                        medication_name: "Amlodipine".into(),
                        dosage: "5mg".into(),
                        frequency: "daily".into(),
                        prescribed_date: None,
                        adherence_score: Some(65.0),
                    },
                    MedicationInput {
                        medication_name: "Metformin".into(),
                        dosage: "500mg".into(),
                        frequency: "bid".into(),
                        prescribed_date: None,
                        adherence_score: Some(95.0),
                    },
                ],
                monitoring_frequency: None,
            },
        )
        .unwrap();

    assert_eq!(tracking.overall_adherence_score, 80.0);
    let low: Vec<_> = tracking
        .alerts
        .iter()
        .filter(|a| a.alert_type == AlertType::LowAdherence)
        .collect();
    assert_eq!(low.len(), 1);
    assert_eq!(low[0].medication_name.as_deref(), Some("Amlodipine"));
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rxflow.db");
    let request_id = {
        let db = Database::open(&path).unwrap();
        let patient = register(&db, "ws-1", "MRN-700");
        processed(&db, "ws-1", &patient.id, "headache").request_id
    };

    let db = Database::open(&path).unwrap();
    let detail = DiagnosticService::new(&db)
        .get_request_detail(&ctx("ws-1"), &request_id)
        .unwrap();
    assert_eq!(detail.status, RequestStatus::Completed);
    assert!(detail.result.is_some());
    assert!(db.verify_audit_chain("ws-1").unwrap().valid);
}
