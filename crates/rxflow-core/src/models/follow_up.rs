//! Diagnostic follow-up tasks.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::transition::TransitionError;

/// A `scheduled` follow-up this far past its date is considered missed.
pub const MISSED_GRACE_HOURS: i64 = 2;

/// Rescheduling may target a date at most this far in the past.
pub const RESCHEDULE_TOLERANCE_HOURS: i64 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStatus {
    Scheduled,
    InProgress,
    Completed,
    Missed,
    /// Replaced by a successor at a new date
    Rescheduled,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowUpEvent {
    Start,
    Complete,
    Reschedule,
    MarkMissed,
    Cancel,
}

impl FollowUpEvent {
    fn name(&self) -> &'static str {
        match self {
            FollowUpEvent::Start => "start",
            FollowUpEvent::Complete => "complete",
            FollowUpEvent::Reschedule => "reschedule",
            FollowUpEvent::MarkMissed => "mark missed",
            FollowUpEvent::Cancel => "cancel",
        }
    }
}

impl FollowUpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpStatus::Scheduled => "scheduled",
            FollowUpStatus::InProgress => "in_progress",
            FollowUpStatus::Completed => "completed",
            FollowUpStatus::Missed => "missed",
            FollowUpStatus::Rescheduled => "rescheduled",
            FollowUpStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(FollowUpStatus::Scheduled),
            "in_progress" => Some(FollowUpStatus::InProgress),
            "completed" => Some(FollowUpStatus::Completed),
            "missed" => Some(FollowUpStatus::Missed),
            "rescheduled" => Some(FollowUpStatus::Rescheduled),
            "cancelled" => Some(FollowUpStatus::Cancelled),
            _ => None,
        }
    }

    /// Open follow-ups count towards overdue lists.
    pub fn is_open(&self) -> bool {
        matches!(self, FollowUpStatus::Scheduled | FollowUpStatus::InProgress)
    }

    /// The single transition table for follow-ups.
    pub fn next(self, event: FollowUpEvent) -> Result<Self, TransitionError> {
        use FollowUpStatus::*;

        match (self, event) {
            (Scheduled, FollowUpEvent::Start) => Ok(InProgress),
            (Scheduled | InProgress, FollowUpEvent::Complete) => Ok(Completed),
            (Scheduled | InProgress | Missed, FollowUpEvent::Reschedule) => Ok(Rescheduled),
            (Scheduled, FollowUpEvent::MarkMissed) => Ok(Missed),
            (Scheduled | InProgress | Missed, FollowUpEvent::Cancel) => Ok(Cancelled),
            (from, event) => Err(TransitionError::Invalid {
                entity: "follow-up",
                from: from.as_str(),
                action: event.name(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpType {
    SymptomCheck,
    MedicationReview,
    OutcomeAssessment,
    ReferralFollowUp,
    LabResultReview,
}

impl FollowUpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpType::SymptomCheck => "symptom_check",
            FollowUpType::MedicationReview => "medication_review",
            FollowUpType::OutcomeAssessment => "outcome_assessment",
            FollowUpType::ReferralFollowUp => "referral_follow_up",
            FollowUpType::LabResultReview => "lab_result_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "symptom_check" => Some(FollowUpType::SymptomCheck),
            "medication_review" => Some(FollowUpType::MedicationReview),
            "outcome_assessment" => Some(FollowUpType::OutcomeAssessment),
            "referral_follow_up" => Some(FollowUpType::ReferralFollowUp),
            "lab_result_review" => Some(FollowUpType::LabResultReview),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl FollowUpPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            FollowUpPriority::Low => "low",
            FollowUpPriority::Medium => "medium",
            FollowUpPriority::High => "high",
            FollowUpPriority::Urgent => "urgent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(FollowUpPriority::Low),
            "medium" => Some(FollowUpPriority::Medium),
            "high" => Some(FollowUpPriority::High),
            "urgent" => Some(FollowUpPriority::Urgent),
            _ => None,
        }
    }
}

/// What caused an auto-scheduled follow-up. Stored as a stable key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum RuleBasis {
    CriticalRisk,
    HighRisk,
    RedFlag(String),
    MedicationReview,
    HighSeverityDiagnosis,
}

impl RuleBasis {
    pub fn key(&self) -> String {
        match self {
            RuleBasis::CriticalRisk => "critical_risk".to_string(),
            RuleBasis::HighRisk => "high_risk".to_string(),
            RuleBasis::RedFlag(flag) => format!("red_flag:{}", flag),
            RuleBasis::MedicationReview => "medication_review".to_string(),
            RuleBasis::HighSeverityDiagnosis => "high_severity_diagnosis".to_string(),
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        match key {
            "critical_risk" => Some(RuleBasis::CriticalRisk),
            "high_risk" => Some(RuleBasis::HighRisk),
            "medication_review" => Some(RuleBasis::MedicationReview),
            "high_severity_diagnosis" => Some(RuleBasis::HighSeverityDiagnosis),
            other => other
                .strip_prefix("red_flag:")
                .map(|flag| RuleBasis::RedFlag(flag.to_string())),
        }
    }
}

impl From<RuleBasis> for String {
    fn from(basis: RuleBasis) -> Self {
        basis.key()
    }
}

impl TryFrom<String> for RuleBasis {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RuleBasis::from_key(&value).ok_or_else(|| format!("Unknown rule basis: {}", value))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Successful,
    PartiallySuccessful,
    Unsuccessful,
}

/// Result recorded when a follow-up is completed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpOutcome {
    pub status: OutcomeStatus,
    pub notes: String,
    #[serde(default)]
    pub next_actions: Vec<String>,
    #[serde(default)]
    pub next_follow_up_date: Option<DateTime<Utc>>,
}

/// Fields for a manually scheduled follow-up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewFollowUp {
    pub follow_up_type: FollowUpType,
    #[serde(default)]
    pub priority: Option<FollowUpPriority>,
    pub description: String,
    #[serde(default)]
    pub objectives: Vec<String>,
    pub scheduled_date: DateTime<Utc>,
    #[serde(default)]
    pub estimated_duration_minutes: Option<u32>,
    #[serde(default)]
    pub assigned_to: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticFollowUp {
    pub id: String,
    pub workplace_id: String,
    pub patient_id: String,
    pub request_id: String,
    pub result_id: Option<String>,
    pub assigned_to: String,
    pub follow_up_type: FollowUpType,
    pub priority: FollowUpPriority,
    pub description: String,
    pub objectives: Vec<String>,
    pub scheduled_date: DateTime<Utc>,
    pub estimated_duration_minutes: u32,
    pub status: FollowUpStatus,
    pub outcome: Option<FollowUpOutcome>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rule_basis: Option<RuleBasis>,
    pub max_follow_ups: Option<u32>,
    pub auto_scheduled: bool,
    pub rescheduled_from: Option<String>,
    pub reschedule_reason: Option<String>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiagnosticFollowUp {
    /// Overdue: still open and past its scheduled date.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.scheduled_date < now
    }

    /// Whether the missed sweep should pick this follow-up up.
    pub fn is_missed_at(&self, now: DateTime<Utc>) -> bool {
        self.status == FollowUpStatus::Scheduled
            && self.scheduled_date < now - Duration::hours(MISSED_GRACE_HOURS)
    }

    /// Apply a lifecycle event, stamping completion time where relevant.
    pub fn apply(
        &mut self,
        event: FollowUpEvent,
        now: DateTime<Utc>,
    ) -> Result<FollowUpStatus, TransitionError> {
        let next = self.status.next(event)?;
        if event == FollowUpEvent::Complete {
            self.completed_at = Some(now);
        }
        let previous = self.status;
        self.status = next;
        self.updated_at = now;
        Ok(previous)
    }

    /// A fresh scheduled copy of this follow-up at another date.
    pub fn successor(&self, scheduled_date: DateTime<Utc>, created_by: &str) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            scheduled_date,
            status: FollowUpStatus::Scheduled,
            outcome: None,
            completed_at: None,
            rescheduled_from: None,
            reschedule_reason: None,
            reminder_sent_at: None,
            created_by: created_by.to_string(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
            ..self.clone()
        }
    }
}
