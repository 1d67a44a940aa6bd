//! HTTP tests driven through the router with `oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use rxflow_ai::{ClinicalModel, Completion, ExtractionResult, MockModel};
use rxflow_core::db::Database;
use rxflow_core::workflow::{DiagnosticService, ProcessingOutcome};
use rxflow_server::{build_router, processing, AppState, ProcessingMode};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(processing: ProcessingMode) -> (AppState, Router) {
    let state = AppState::new(Database::open_in_memory().unwrap(), Arc::new(MockModel), processing);
    (state.clone(), build_router(state))
}

fn request(method: &str, uri: &str, workplace_id: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("x-user-id", "pharm-1")
        .header("x-workplace-id", workplace_id);
    match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn register_patient(app: &Router, workplace_id: &str, mrn: &str) -> String {
    let (status, body) = send(
        app,
        request(
            "POST",
            "/api/patients",
            workplace_id,
            Some(json!({
                "mrn": mrn,
                "firstName": "Ada",
                "lastName": "Okafor",
                "dateOfBirth": "1961-07-02",
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["id"].as_str().unwrap().to_string()
}

fn diagnostic_body(patient_id: &str, symptom: &str, consent: bool) -> Value {
    json!({
        "patientId": patient_id,
        "inputSnapshot": {
            "symptoms": {
                "subjective": [symptom],
                "objective": [],
                "duration": "2 days",
                "severity": "moderate",
                "onset": "acute",
            },
            "currentMedications": [],
            "allergies": [],
            "medicalHistory": [],
        },
        "consentObtained": consent,
        "consentTimestamp": Utc::now().to_rfc3339(),
    })
}

async fn create_request(app: &Router, patient_id: &str, symptom: &str) -> String {
    let (status, body) = send(
        app,
        request("POST", "/api/diagnostics", "ws-1", Some(diagnostic_body(patient_id, symptom, true))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    body["data"]["request"]["id"].as_str().unwrap().to_string()
}

fn process_now(state: &AppState, request_id: &str) {
    state
        .with_db(|db| DiagnosticService::new(db).process_request("ws-1", "pharm-1", request_id, &MockModel))
        .unwrap();
}

#[tokio::test]
async fn test_health_is_open() {
    let (_, app) = app(ProcessingMode::Deferred);
    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["data"]["status"], "ok");
    assert_eq!(json["data"]["processing"], "deferred");
}

#[tokio::test]
async fn test_missing_identity_is_401() {
    let (_, app) = app(ProcessingMode::Deferred);
    let (status, body) = send(
        &app,
        Request::builder()
            .uri("/api/workspace/settings")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "AUTH_REQUIRED");
}

#[tokio::test]
async fn test_missing_consent_is_400() {
    let (_, app) = app(ProcessingMode::Deferred);
    let patient_id = register_patient(&app, "ws-1", "MRN-1").await;

    let (status, body) = send(
        &app,
        request("POST", "/api/diagnostics", "ws-1", Some(diagnostic_body(&patient_id, "fever", false))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().to_lowercase().contains("consent"));
}

#[tokio::test]
async fn test_back_to_back_requests_conflict() {
    let (_, app) = app(ProcessingMode::Deferred);
    let patient_id = register_patient(&app, "ws-1", "MRN-2").await;
    create_request(&app, &patient_id, "cough").await;

    let (status, body) = send(
        &app,
        request("POST", "/api/diagnostics", "ws-1", Some(diagnostic_body(&patient_id, "cough", true))),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let (_, app) = app(ProcessingMode::Deferred);
    let (status, body) = send(
        &app,
        request("POST", "/api/patients", "ws-1", Some(json!({ "mrn": 12 }))),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn test_review_and_follow_up_flow() {
    let (state, app) = app(ProcessingMode::Deferred);
    let patient_id = register_patient(&app, "ws-1", "MRN-3").await;
    let request_id = create_request(&app, &patient_id, "chest pain on exertion").await;
    process_now(&state, &request_id);

    let (status, body) = send(&app, request("GET", &format!("/api/diagnostics/{request_id}"), "ws-1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");
    assert_eq!(body["data"]["isActive"], false);
    assert!(body["data"]["result"].is_object());

    // modified without modifications is rejected
    let (status, _) = send(
        &app,
        request(
            "PATCH",
            &format!("/api/diagnostics/{request_id}/approve"),
            "ws-1",
            Some(json!({ "status": "modified" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        request(
            "PATCH",
            &format!("/api/diagnostics/{request_id}/approve"),
            "ws-1",
            Some(json!({ "reviewNotes": "Referred to ED" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["followUpDate"].is_string());

    // a result is reviewed at most once
    let (status, _) = send(
        &app,
        request(
            "PATCH",
            &format!("/api/diagnostics/{request_id}/reject"),
            "ws-1",
            Some(json!({ "rejectionReason": "second thoughts" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(
        &app,
        request("POST", &format!("/api/diagnostics/{request_id}/follow-ups/auto"), "ws-1", None),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let scheduled = body["data"].as_array().unwrap().len();
    assert!(scheduled > 0);

    let (status, body) = send(
        &app,
        request("GET", &format!("/api/diagnostics/{request_id}/follow-ups"), "ws-1", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), scheduled);

    let follow_up_id = body["data"][0]["id"].as_str().unwrap().to_string();
    let (status, body) = send(
        &app,
        request("PATCH", &format!("/api/follow-ups/{follow_up_id}/start"), "ws-1", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "in_progress");

    let (status, body) = send(
        &app,
        request("POST", &format!("/api/diagnostics/{request_id}/intervention"), "ws-1", Some(json!({
            "category": "other",
            "issueDescription": "Cardiology referral",
        }))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let intervention_id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            "PATCH",
            &format!("/api/interventions/{intervention_id}/status"),
            "ws-1",
            Some(json!({ "status": "completed" })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = send(&app, request("GET", "/api/audit/export", "ws-1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["metadata"]["chainValid"], true);
    assert_eq!(body["data"]["metadata"]["systemId"], "rxflow-server");
}

#[tokio::test]
async fn test_other_workspace_sees_nothing() {
    let (state, app) = app(ProcessingMode::Deferred);
    let patient_id = register_patient(&app, "ws-1", "MRN-4").await;
    let request_id = create_request(&app, &patient_id, "fever").await;
    process_now(&state, &request_id);

    let (status, body) = send(&app, request("GET", &format!("/api/diagnostics/{request_id}"), "ws-2", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = send(&app, request("GET", &format!("/api/patients/{patient_id}"), "ws-2", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(&app, request("GET", "/api/diagnostics/analytics/summary", "ws-2", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["requests"]["total"], 0);
}

#[tokio::test]
async fn test_adherence_alert_acknowledge_is_idempotent() {
    let (_, app) = app(ProcessingMode::Deferred);
    let patient_id = register_patient(&app, "ws-1", "MRN-5").await;

    let (status, body) = send(
        &app,
        request(
            "POST",
            "/api/adherence",
            "ws-1",
            Some(json!({
                "patientId": patient_id,
                "medications": [
                    { "medicationName": "Lisinopril", "dosage": "10mg", "frequency": "daily", "adherenceScore": 60 },
                    { "medicationName": "Atorvastatin", "dosage": "20mg", "frequency": "daily", "adherenceScore": 90 },
                ],
            })),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["overallAdherenceScore"], 75.0);
    let alert = body["data"]["alerts"]
        .as_array()
        .unwrap()
        .iter()
        .find(|a| a["type"] == "low_adherence")
        .unwrap()
        .clone();
    let alert_id = alert["id"].as_str().unwrap();

    let uri = format!("/api/adherence/patients/{patient_id}/alerts/{alert_id}/acknowledge");
    let (status, first) = send(&app, request("PATCH", &uri, "ws-1", Some(json!({ "actionTaken": "Called patient" })))).await;
    assert_eq!(status, StatusCode::OK);
    let (status, second) = send(&app, request("PATCH", &uri, "ws-1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["data"]["alerts"], second["data"]["alerts"]);

    let (status, body) = send(&app, request("GET", "/api/adherence/poor?threshold=80", "ws-1", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_immediate_mode_processes_in_background() {
    let (_, app) = app(ProcessingMode::Immediate);
    let patient_id = register_patient(&app, "ws-1", "MRN-6").await;
    let request_id = create_request(&app, &patient_id, "sore throat").await;

    let mut status = Value::Null;
    for _ in 0..100 {
        let (_, body) = send(&app, request("GET", &format!("/api/diagnostics/{request_id}"), "ws-1", None)).await;
        status = body["data"]["status"].clone();
        if status == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(status, "completed");
}

struct PanickingModel;

impl ClinicalModel for PanickingModel {
    fn model_id(&self) -> &str {
        "panicking"
    }

    fn complete(&self, _prompt: &str) -> ExtractionResult<Completion> {
        panic!("inference backend crashed");
    }
}

#[tokio::test]
async fn test_model_panic_fails_request_and_frees_patient() {
    let state = AppState::new(
        Database::open_in_memory().unwrap(),
        Arc::new(PanickingModel),
        ProcessingMode::Deferred,
    );
    let app = build_router(state.clone());
    let patient_id = register_patient(&app, "ws-1", "MRN-PANIC").await;
    let request_id = create_request(&app, &patient_id, "headache").await;

    let outcome = processing::process(&state, "ws-1", "pharm-1", &request_id)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessingOutcome::Failed { .. }));

    let (status, body) = send(
        &app,
        request("GET", &format!("/api/diagnostics/{request_id}"), "ws-1", None),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(body["data"]["canRetry"], true);
    assert_eq!(body["data"]["request"]["retryCount"], 1);
    assert!(body["data"]["request"]["errorMessage"]
        .as_str()
        .unwrap()
        .contains("analysis task failed"));

    create_request(&app, &patient_id, "cough").await;
}
