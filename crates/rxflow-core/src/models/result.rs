//! Diagnostic results and pharmacist review decisions.

use chrono::{DateTime, Utc};
use rxflow_ai::{AnalysisReport, ClinicalAnalysis};
use serde::{Deserialize, Serialize};

/// Shown with every AI-produced result.
pub const RESULT_DISCLAIMER: &str = "This AI-generated analysis supports, and does not replace, \
professional clinical judgement. All recommendations must be reviewed by a licensed pharmacist.";

/// Model bookkeeping captured with a result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AiMetadata {
    pub model_id: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub processing_time_ms: u64,
    pub confidence_score: f64,
}

/// Outcome of a pharmacist review.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewDecision {
    Approved,
    Modified {
        modifications: String,
    },
    Rejected {
        #[serde(rename = "rejectionReason")]
        rejection_reason: String,
    },
}

/// Flat review status, for filtering and reporting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Approved,
    Modified,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Approved => "approved",
            ReviewStatus::Modified => "modified",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "approved" => Some(ReviewStatus::Approved),
            "modified" => Some(ReviewStatus::Modified),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

impl ReviewDecision {
    pub fn status(&self) -> ReviewStatus {
        match self {
            ReviewDecision::Approved => ReviewStatus::Approved,
            ReviewDecision::Modified { .. } => ReviewStatus::Modified,
            ReviewDecision::Rejected { .. } => ReviewStatus::Rejected,
        }
    }

    /// Approved and modified results may drive interventions and follow-ups.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ReviewDecision::Rejected { .. })
    }
}

/// A recorded pharmacist review. Written at most once per result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PharmacistReview {
    #[serde(flatten)]
    pub decision: ReviewDecision,
    pub review_notes: Option<String>,
    pub clinical_justification: Option<String>,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
}

/// Review fields as submitted by a pharmacist, before validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    pub status: Option<ReviewStatus>,
    #[serde(default)]
    pub modifications: Option<String>,
    #[serde(default)]
    pub rejection_reason: Option<String>,
    #[serde(default)]
    pub review_notes: Option<String>,
    #[serde(default)]
    pub clinical_justification: Option<String>,
}

/// AI output for a completed request, one-to-one with the request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticResult {
    pub id: String,
    pub request_id: String,
    pub workplace_id: String,
    pub patient_id: String,
    pub analysis: ClinicalAnalysis,
    pub ai_metadata: AiMetadata,
    pub disclaimer: String,
    pub pharmacist_review: Option<PharmacistReview>,
    pub follow_up_required: bool,
    pub follow_up_date: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DiagnosticResult {
    /// Build a result from a model report for the given request.
    pub fn from_report(
        request_id: String,
        workplace_id: String,
        patient_id: String,
        report: AnalysisReport,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            request_id,
            workplace_id,
            patient_id,
            ai_metadata: AiMetadata {
                model_id: report.model_id,
                prompt_tokens: report.prompt_tokens,
                completion_tokens: report.completion_tokens,
                total_tokens: report.prompt_tokens + report.completion_tokens,
                processing_time_ms: report.processing_time_ms,
                confidence_score: report.confidence_score,
            },
            analysis: report.analysis,
            disclaimer: RESULT_DISCLAIMER.to_string(),
            pharmacist_review: None,
            follow_up_required: false,
            follow_up_date: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_reviewed(&self) -> bool {
        self.pharmacist_review.is_some()
    }

    pub fn review_status(&self) -> Option<ReviewStatus> {
        self.pharmacist_review.as_ref().map(|r| r.decision.status())
    }
}
