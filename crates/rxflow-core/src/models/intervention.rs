//! Clinical interventions: pharmacist-initiated remediation records.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use super::transition::TransitionError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InterventionStatus {
    Identified,
    Planning,
    InProgress,
    Implemented,
    Completed,
    Cancelled,
}

impl InterventionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionStatus::Identified => "identified",
            InterventionStatus::Planning => "planning",
            InterventionStatus::InProgress => "in_progress",
            InterventionStatus::Implemented => "implemented",
            InterventionStatus::Completed => "completed",
            InterventionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "identified" => Some(InterventionStatus::Identified),
            "planning" => Some(InterventionStatus::Planning),
            "in_progress" => Some(InterventionStatus::InProgress),
            "implemented" => Some(InterventionStatus::Implemented),
            "completed" => Some(InterventionStatus::Completed),
            "cancelled" => Some(InterventionStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, InterventionStatus::Completed | InterventionStatus::Cancelled)
    }

    /// Whether a direct move to `target` is allowed. Outcome gating is
    /// checked separately by [`ClinicalIntervention::set_status`].
    pub fn can_move_to(self, target: InterventionStatus) -> bool {
        use InterventionStatus::*;

        matches!(
            (self, target),
            (Identified, Planning | InProgress | Cancelled)
                | (Planning, InProgress | Cancelled)
                | (InProgress, Implemented | Cancelled)
                | (Implemented, Completed | InProgress)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InterventionCategory {
    DrugTherapyProblem,
    AdverseDrugReaction,
    MedicationNonadherence,
    DrugInteraction,
    DosingIssue,
    Contraindication,
    Other,
}

impl InterventionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionCategory::DrugTherapyProblem => "drug_therapy_problem",
            InterventionCategory::AdverseDrugReaction => "adverse_drug_reaction",
            InterventionCategory::MedicationNonadherence => "medication_nonadherence",
            InterventionCategory::DrugInteraction => "drug_interaction",
            InterventionCategory::DosingIssue => "dosing_issue",
            InterventionCategory::Contraindication => "contraindication",
            InterventionCategory::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "drug_therapy_problem" => Some(InterventionCategory::DrugTherapyProblem),
            "adverse_drug_reaction" => Some(InterventionCategory::AdverseDrugReaction),
            "medication_nonadherence" => Some(InterventionCategory::MedicationNonadherence),
            "drug_interaction" => Some(InterventionCategory::DrugInteraction),
            "dosing_issue" => Some(InterventionCategory::DosingIssue),
            "contraindication" => Some(InterventionCategory::Contraindication),
            "other" => Some(InterventionCategory::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum InterventionPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl InterventionPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionPriority::Low => "low",
            InterventionPriority::Medium => "medium",
            InterventionPriority::High => "high",
            InterventionPriority::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(InterventionPriority::Low),
            "medium" => Some(InterventionPriority::Medium),
            "high" => Some(InterventionPriority::High),
            "critical" => Some(InterventionPriority::Critical),
            _ => None,
        }
    }
}

impl From<rxflow_ai::Severity> for InterventionPriority {
    fn from(severity: rxflow_ai::Severity) -> Self {
        match severity {
            rxflow_ai::Severity::Low => InterventionPriority::Low,
            rxflow_ai::Severity::Medium => InterventionPriority::Medium,
            rxflow_ai::Severity::High => InterventionPriority::High,
            rxflow_ai::Severity::Critical => InterventionPriority::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterventionStrategy {
    pub kind: String,
    pub description: String,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub expected_outcome: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TeamAssignment {
    pub user_id: String,
    pub role: String,
    pub task: String,
    #[serde(default)]
    pub status: AssignmentStatus,
    pub assigned_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatientResponse {
    Improved,
    NoChange,
    Worsened,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalParameter {
    pub parameter: String,
    #[serde(default)]
    pub before: Option<String>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SuccessMetrics {
    pub problem_resolved: bool,
    pub medication_optimized: bool,
    pub adherence_improved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InterventionOutcome {
    pub patient_response: PatientResponse,
    #[serde(default)]
    pub clinical_parameters: Vec<ClinicalParameter>,
    #[serde(default)]
    pub success_metrics: SuccessMetrics,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Fields for opening an intervention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewIntervention {
    pub category: InterventionCategory,
    #[serde(default)]
    pub priority: Option<InterventionPriority>,
    pub issue_description: String,
    #[serde(default)]
    pub strategies: Vec<InterventionStrategy>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClinicalIntervention {
    pub id: String,
    /// `CI-YYYYMM-NNNN`
    pub intervention_number: String,
    pub workplace_id: String,
    pub patient_id: String,
    pub category: InterventionCategory,
    pub priority: InterventionPriority,
    pub issue_description: String,
    pub identified_by: String,
    pub identified_at: DateTime<Utc>,
    pub strategies: Vec<InterventionStrategy>,
    pub assignments: Vec<TeamAssignment>,
    pub outcomes: Option<InterventionOutcome>,
    pub status: InterventionStatus,
    pub diagnostic_result_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Format an intervention number from its month and per-month sequence.
pub fn intervention_number(at: DateTime<Utc>, sequence: u32) -> String {
    format!("CI-{:04}{:02}-{:04}", at.year(), at.month(), sequence)
}

/// The `CI-YYYYMM-` prefix shared by every intervention opened in a month.
pub fn intervention_number_prefix(at: DateTime<Utc>) -> String {
    format!("CI-{:04}{:02}-", at.year(), at.month())
}

impl ClinicalIntervention {
    pub fn new(
        workplace_id: String,
        patient_id: String,
        identified_by: String,
        number: String,
        input: NewIntervention,
        default_priority: InterventionPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            intervention_number: number,
            workplace_id,
            patient_id,
            category: input.category,
            priority: input.priority.unwrap_or(default_priority),
            issue_description: input.issue_description,
            identified_by,
            identified_at: now,
            strategies: input.strategies,
            assignments: Vec::new(),
            outcomes: None,
            status: InterventionStatus::Identified,
            diagnostic_result_id: None,
            started_at: None,
            completed_at: None,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn ensure_open(&self, action: &'static str) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Invalid {
                entity: "intervention",
                from: self.status.as_str(),
                action,
            });
        }
        Ok(())
    }

    /// Move to `target`, stamping start and completion times.
    pub fn set_status(
        &mut self,
        target: InterventionStatus,
        now: DateTime<Utc>,
    ) -> Result<InterventionStatus, TransitionError> {
        if !self.status.can_move_to(target) {
            return Err(TransitionError::Invalid {
                entity: "intervention",
                from: self.status.as_str(),
                action: match target {
                    InterventionStatus::Identified => "reopen",
                    InterventionStatus::Planning => "plan",
                    InterventionStatus::InProgress => "start",
                    InterventionStatus::Implemented => "implement",
                    InterventionStatus::Completed => "complete",
                    InterventionStatus::Cancelled => "cancel",
                },
            });
        }
        if target == InterventionStatus::Completed && self.outcomes.is_none() {
            return Err(TransitionError::Precondition {
                entity: "intervention",
                action: "complete",
                reason: "outcomes must be recorded first",
            });
        }

        match target {
            InterventionStatus::InProgress if self.started_at.is_none() => {
                self.started_at = Some(now)
            }
            InterventionStatus::Completed => self.completed_at = Some(now),
            _ => {}
        }

        let previous = self.status;
        self.status = target;
        self.updated_at = now;
        Ok(previous)
    }

    pub fn add_strategy(
        &mut self,
        strategy: InterventionStrategy,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_open("add a strategy to")?;
        self.strategies.push(strategy);
        self.updated_at = now;
        Ok(())
    }

    pub fn assign(
        &mut self,
        user_id: String,
        role: String,
        task: String,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_open("assign")?;
        self.assignments.push(TeamAssignment {
            user_id,
            role,
            task,
            status: AssignmentStatus::Pending,
            assigned_at: now,
            completed_at: None,
        });
        self.updated_at = now;
        Ok(())
    }

    /// Returns `None` when no assignment exists at `index`.
    pub fn update_assignment(
        &mut self,
        index: usize,
        status: AssignmentStatus,
        now: DateTime<Utc>,
    ) -> Option<Result<(), TransitionError>> {
        if let Err(e) = self.ensure_open("update an assignment on") {
            return Some(Err(e));
        }
        let assignment = self.assignments.get_mut(index)?;
        assignment.status = status;
        assignment.completed_at = match status {
            AssignmentStatus::Completed => Some(now),
            _ => None,
        };
        self.updated_at = now;
        Some(Ok(()))
    }

    pub fn record_outcome(
        &mut self,
        outcome: InterventionOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        self.ensure_open("record an outcome on")?;
        self.outcomes = Some(outcome);
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn intervention() -> ClinicalIntervention {
        ClinicalIntervention::new(
            "ws-1".into(),
            "patient-1".into(),
            "pharm-1".into(),
            "CI-202610-0001".into(),
            NewIntervention {
                category: InterventionCategory::DosingIssue,
                priority: None,
                issue_description: "Dose exceeds renal adjustment".into(),
                strategies: vec![],
            },
            InterventionPriority::High,
        )
    }

    fn outcome() -> InterventionOutcome {
        InterventionOutcome {
            patient_response: PatientResponse::Improved,
            clinical_parameters: vec![],
            success_metrics: SuccessMetrics {
                problem_resolved: true,
                ..Default::default()
            },
            notes: None,
        }
    }

    #[test]
    fn test_number_format() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(intervention_number(at, 7), "CI-202603-0007");
        assert_eq!(intervention_number_prefix(at), "CI-202603-");
    }

    #[test]
    fn test_completion_requires_outcomes() {
        let now = Utc::now();
        let mut i = intervention();
        assert_eq!(i.priority, InterventionPriority::High);
        i.set_status(InterventionStatus::InProgress, now).unwrap();
        assert!(i.started_at.is_some());
        i.set_status(InterventionStatus::Implemented, now).unwrap();

        let err = i.set_status(InterventionStatus::Completed, now).unwrap_err();
        assert!(matches!(err, TransitionError::Precondition { .. }));

        i.record_outcome(outcome(), now).unwrap();
        i.set_status(InterventionStatus::Completed, now).unwrap();
        assert!(i.completed_at.is_some());
    }

    #[test]
    fn test_terminal_statuses_are_frozen() {
        let now = Utc::now();
        let mut i = intervention();
        i.set_status(InterventionStatus::Cancelled, now).unwrap();
        assert!(i.set_status(InterventionStatus::InProgress, now).is_err());
        assert!(i.record_outcome(outcome(), now).is_err());
        assert!(i
            .add_strategy(
                InterventionStrategy {
                    kind: "dose_adjustment".into(),
                    description: "Halve dose".into(),
                    rationale: String::new(),
                    expected_outcome: String::new(),
                },
                now
            )
            .is_err());
    }

    #[test]
    fn test_identified_cannot_skip_to_implemented() {
        let mut i = intervention();
        assert!(i
            .set_status(InterventionStatus::Implemented, Utc::now())
            .is_err());
    }

    #[test]
    fn test_assignment_updates() {
        let now = Utc::now();
        let mut i = intervention();
        i.assign("tech-1".into(), "technician".into(), "Call prescriber".into(), now)
            .unwrap();
        assert!(i.update_assignment(3, AssignmentStatus::Completed, now).is_none());
        i.update_assignment(0, AssignmentStatus::Completed, now)
            .unwrap()
            .unwrap();
        assert!(i.assignments[0].completed_at.is_some());
    }
}
