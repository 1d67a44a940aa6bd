//! Clinical analysis extraction from model output.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Extraction errors.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("Invalid response format: {0}")]
    InvalidFormat(String),

    #[error("Model inference error: {0}")]
    Inference(String),
}

pub type ExtractionResult<T> = Result<T, ExtractionError>;

/// Clinical severity, shared by diagnoses, red flags and overall risk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// How soon a referral should happen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReferralUrgency {
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "within_24h")]
    Within24h,
    #[serde(rename = "within_week")]
    WithinWeek,
    #[serde(rename = "routine")]
    Routine,
}

/// Priority of a suggested investigation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TestPriority {
    Urgent,
    Routine,
    Optional,
}

/// A candidate diagnosis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub condition: String,
    /// Likelihood in `0.0..=1.0`
    pub probability: f64,
    #[serde(default)]
    pub reasoning: String,
    pub severity: Severity,
    #[serde(default)]
    pub icd_code: Option<String>,
    /// Model self-reported confidence in `0.0..=1.0`
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuggestedTest {
    pub test_name: String,
    pub priority: TestPriority,
    #[serde(default)]
    pub reasoning: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicationSuggestion {
    pub drug_name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub safety_notes: Vec<String>,
}

/// A critical finding requiring urgent action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RedFlag {
    pub flag: String,
    pub severity: Severity,
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Referral {
    pub recommended: bool,
    pub urgency: ReferralUrgency,
    #[serde(default)]
    pub specialty: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub overall_risk: Severity,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub mitigating_factors: Vec<String>,
}

/// Structured output of one clinical analysis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalAnalysis {
    pub diagnoses: Vec<Diagnosis>,
    #[serde(default)]
    pub suggested_tests: Vec<SuggestedTest>,
    #[serde(default)]
    pub medication_suggestions: Vec<MedicationSuggestion>,
    #[serde(default)]
    pub red_flags: Vec<RedFlag>,
    #[serde(default)]
    pub referral: Option<Referral>,
    pub risk_assessment: RiskAssessment,
}

impl ClinicalAnalysis {
    /// Mean diagnosis confidence, or 0 when there are no diagnoses.
    pub fn confidence_score(&self) -> f64 {
        if self.diagnoses.is_empty() {
            return 0.0;
        }
        let total: f64 = self.diagnoses.iter().map(|d| d.confidence).sum();
        total / self.diagnoses.len() as f64
    }

    /// The most severe red flag, if any.
    pub fn highest_red_flag(&self) -> Option<Severity> {
        self.red_flags.iter().map(|f| f.severity).max()
    }

    /// Referral, only when the model actually recommends one.
    pub fn recommended_referral(&self) -> Option<&Referral> {
        self.referral.as_ref().filter(|r| r.recommended)
    }
}

/// Parse model output into a validated analysis.
pub fn parse_analysis_output(text: &str) -> ExtractionResult<ClinicalAnalysis> {
    // Models sometimes wrap the JSON in prose or code fences
    let json_start = text.find('{').ok_or_else(|| {
        ExtractionError::InvalidFormat("No JSON object found in response".into())
    })?;
    let json_end = text.rfind('}').ok_or_else(|| {
        ExtractionError::InvalidFormat("No closing brace found in response".into())
    })?;
    if json_end < json_start {
        return Err(ExtractionError::InvalidFormat(
            "Closing brace precedes opening brace".into(),
        ));
    }

    let analysis: ClinicalAnalysis = serde_json::from_str(&text[json_start..=json_end])?;
    validate_analysis(&analysis)?;
    Ok(analysis)
}

fn validate_analysis(analysis: &ClinicalAnalysis) -> ExtractionResult<()> {
    if analysis.diagnoses.is_empty() {
        return Err(ExtractionError::InvalidFormat(
            "Analysis contains no diagnoses".into(),
        ));
    }

    for diagnosis in &analysis.diagnoses {
        if diagnosis.condition.trim().is_empty() {
            return Err(ExtractionError::InvalidFormat(
                "Diagnosis with empty condition".into(),
            ));
        }
        if !(0.0..=1.0).contains(&diagnosis.probability) {
            return Err(ExtractionError::InvalidFormat(format!(
                "Probability {} out of range for {}",
                diagnosis.probability, diagnosis.condition
            )));
        }
        if !(0.0..=1.0).contains(&diagnosis.confidence) {
            return Err(ExtractionError::InvalidFormat(format!(
                "Confidence {} out of range for {}",
                diagnosis.confidence, diagnosis.condition
            )));
        }
    }

    if analysis.red_flags.iter().any(|f| f.flag.trim().is_empty()) {
        return Err(ExtractionError::InvalidFormat("Red flag with empty text".into()));
    }

    Ok(())
}
