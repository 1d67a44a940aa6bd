//! Diagnostic request models and their status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transition::TransitionError;

/// Maximum number of failed attempts before retries are refused.
pub const MAX_RETRIES: u32 = 3;

/// Diagnostic request status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Created, waiting for the analysis pipeline
    Pending,
    /// Claimed by the analysis pipeline
    Processing,
    /// Analysis stored as a DiagnosticResult
    Completed,
    /// Analysis failed; may be retried
    Failed,
    /// Withdrawn by a pharmacist
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Processing => "processing",
            RequestStatus::Completed => "completed",
            RequestStatus::Failed => "failed",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "processing" => Some(RequestStatus::Processing),
            "completed" => Some(RequestStatus::Completed),
            "failed" => Some(RequestStatus::Failed),
            "cancelled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    /// Pending and processing requests block new requests for the patient.
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Processing)
    }

    /// The single transition table for diagnostic requests.
    pub fn next(self, event: &RequestEvent, retry_count: u32) -> Result<Self, TransitionError> {
        use RequestStatus::*;

        // The retry ceiling applies whatever the current status is
        if matches!(event, RequestEvent::Retry) && retry_count >= MAX_RETRIES {
            return Err(TransitionError::RetryLimit {
                retry_count,
                max: MAX_RETRIES,
            });
        }

        match (self, event) {
            (Pending, RequestEvent::StartProcessing) => Ok(Processing),
            (Processing, RequestEvent::Complete) => Ok(Completed),
            (Processing, RequestEvent::Fail { .. }) => Ok(Failed),
            (Failed, RequestEvent::Retry) => Ok(Processing),
            (Pending | Processing, RequestEvent::Cancel { .. }) => Ok(Cancelled),
            (from, event) => Err(TransitionError::Invalid {
                entity: "diagnostic request",
                from: from.as_str(),
                action: event.name(),
            }),
        }
    }
}

/// Events driving a request through its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestEvent {
    StartProcessing,
    Complete,
    Fail { reason: String },
    Retry,
    Cancel { by: String },
}

impl RequestEvent {
    pub fn name(&self) -> &'static str {
        match self {
            RequestEvent::StartProcessing => "start processing",
            RequestEvent::Complete => "complete",
            RequestEvent::Fail { .. } => "fail",
            RequestEvent::Retry => "retry",
            RequestEvent::Cancel { .. } => "cancel",
        }
    }
}

/// Triage priority of a request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RequestPriority {
    #[default]
    Routine,
    Urgent,
    Stat,
}

impl RequestPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestPriority::Routine => "routine",
            RequestPriority::Urgent => "urgent",
            RequestPriority::Stat => "stat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "routine" => Some(RequestPriority::Routine),
            "urgent" => Some(RequestPriority::Urgent),
            "stat" => Some(RequestPriority::Stat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SymptomSeverity {
    Mild,
    Moderate,
    Severe,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SymptomOnset {
    Acute,
    Subacute,
    Chronic,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SymptomSet {
    pub subjective: Vec<String>,
    #[serde(default)]
    pub objective: Vec<String>,
    pub duration: String,
    pub severity: SymptomSeverity,
    pub onset: SymptomOnset,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VitalSigns {
    /// "systolic/diastolic" in mmHg
    pub blood_pressure: Option<String>,
    pub heart_rate: Option<u32>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
    pub respiratory_rate: Option<u32>,
    pub oxygen_saturation: Option<u32>,
    /// mg/dL
    pub blood_glucose: Option<f64>,
    /// kg
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CurrentMedication {
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SocialHistory {
    pub smoking: Option<String>,
    pub alcohol: Option<String>,
    pub exercise: Option<String>,
}

/// Clinical data captured at submission time. Never modified afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputSnapshot {
    pub symptoms: SymptomSet,
    #[serde(default)]
    pub vitals: Option<VitalSigns>,
    #[serde(default)]
    pub current_medications: Vec<CurrentMedication>,
    #[serde(default)]
    pub allergies: Vec<String>,
    #[serde(default)]
    pub medical_history: Vec<String>,
    #[serde(default)]
    pub social_history: Option<SocialHistory>,
}

/// Fields accepted when a pharmacist submits a case.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewDiagnosticRequest {
    pub patient_id: String,
    #[serde(default)]
    pub location_id: Option<String>,
    pub input_snapshot: InputSnapshot,
    #[serde(default)]
    pub priority: Option<RequestPriority>,
    /// Kept optional so a missing flag is reported as a consent error
    #[serde(default)]
    pub consent_obtained: Option<bool>,
    #[serde(default)]
    pub consent_timestamp: Option<DateTime<Utc>>,
}

/// One clinical-AI analysis request for a patient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticRequest {
    pub id: String,
    pub patient_id: String,
    pub pharmacist_id: String,
    pub workplace_id: String,
    pub location_id: Option<String>,
    pub input_snapshot: InputSnapshot,
    pub consent_obtained: bool,
    pub consent_timestamp: DateTime<Utc>,
    pub status: RequestStatus,
    pub priority: RequestPriority,
    pub retry_count: u32,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub cancelled_by: Option<String>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiagnosticRequest {
    /// Create a pending request. Input is assumed validated.
    pub fn new(
        workplace_id: String,
        pharmacist_id: String,
        input: NewDiagnosticRequest,
        consent_timestamp: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            patient_id: input.patient_id,
            pharmacist_id,
            workplace_id,
            location_id: input.location_id,
            input_snapshot: input.input_snapshot,
            consent_obtained: true,
            consent_timestamp,
            status: RequestStatus::Pending,
            priority: input.priority.unwrap_or_default(),
            retry_count: 0,
            processing_started_at: None,
            processing_completed_at: None,
            error_message: None,
            cancelled_by: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle event. Returns the status the request left.
    pub fn apply(
        &mut self,
        event: RequestEvent,
        now: DateTime<Utc>,
    ) -> Result<RequestStatus, TransitionError> {
        let next = self.status.next(&event, self.retry_count)?;

        match event {
            RequestEvent::StartProcessing | RequestEvent::Retry => {
                self.processing_started_at = Some(now);
                self.processing_completed_at = None;
                self.error_message = None;
            }
            RequestEvent::Complete => {
                self.processing_completed_at = Some(now);
            }
            RequestEvent::Fail { reason } => {
                self.processing_completed_at = Some(now);
                self.retry_count += 1;
                self.error_message = Some(reason);
            }
            RequestEvent::Cancel { by } => {
                self.cancelled_by = Some(by);
            }
        }

        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }

    /// Whether a retry would currently be accepted.
    pub fn can_retry(&self) -> bool {
        self.status.next(&RequestEvent::Retry, self.retry_count).is_ok()
    }

    /// Milliseconds between processing start and completion, when both are known.
    pub fn processing_time_ms(&self) -> Option<i64> {
        let started = self.processing_started_at?;
        let finished = self.processing_completed_at?;
        Some((finished - started).num_milliseconds())
    }
}
