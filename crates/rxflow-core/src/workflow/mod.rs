//! Clinical workflows over the database layer.
//!
//! Each service borrows a [`Database`] and performs one workflow step per
//! call: load, validate, apply the model's state machine, then persist the
//! change together with its audit event in a single transaction.

mod adherence;
mod diagnostics;
mod follow_ups;
mod interventions;
mod maintenance;
mod review;
mod workspace;

pub use adherence::*;
pub use diagnostics::*;
pub use follow_ups::*;
pub use interventions::*;
pub use maintenance::*;
pub use review::*;
pub use workspace::*;

use rxflow_ai::ExtractionError;
use serde::Serialize;
use thiserror::Error;

use crate::db::{Database, DbError};
use crate::models::{AuditEntry, TransitionError, WorkspaceContext};

/// Actor recorded for sweeps that run without a user.
pub const SYSTEM_ACTOR: &str = "system";

/// Stable classification of workflow failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    UpgradeRequired,
    PlanLimitExceeded,
    Server,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::UpgradeRequired => "UPGRADE_REQUIRED",
            ErrorKind::PlanLimitExceeded => "PLAN_LIMIT_EXCEEDED",
            ErrorKind::Server => "SERVER_ERROR",
        }
    }
}

/// Workflow errors.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    UpgradeRequired(String),

    #[error("{0}")]
    PlanLimitExceeded(String),

    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error("AI analysis failed: {0}")]
    Analysis(#[from] ExtractionError),

    #[error("Database error: {0}")]
    Database(DbError),
}

impl WorkflowError {
    pub fn not_found(entity: &str) -> Self {
        WorkflowError::NotFound(format!("{} not found", entity))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        WorkflowError::Validation(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            WorkflowError::Validation(_) | WorkflowError::Transition(_) => ErrorKind::Validation,
            WorkflowError::NotFound(_) => ErrorKind::NotFound,
            WorkflowError::Conflict(_) => ErrorKind::Conflict,
            WorkflowError::UpgradeRequired(_) => ErrorKind::UpgradeRequired,
            WorkflowError::PlanLimitExceeded(_) => ErrorKind::PlanLimitExceeded,
            WorkflowError::Analysis(_) | WorkflowError::Database(_) => ErrorKind::Server,
        }
    }

    pub fn code(&self) -> &'static str {
        self.kind().code()
    }
}

impl From<DbError> for WorkflowError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Conflict(message) => WorkflowError::Conflict(message),
            DbError::NotFound(message) => WorkflowError::NotFound(message),
            other => WorkflowError::Database(other),
        }
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// The workspace a tenant operation runs in.
pub(crate) fn workspace_of(ctx: &WorkspaceContext) -> WorkflowResult<&str> {
    ctx.workplace_id
        .as_deref()
        .ok_or_else(|| WorkflowError::validation("A workspace is required for this operation"))
}

/// Verify a patient belongs to the workspace.
pub(crate) fn require_patient(db: &Database, workplace_id: &str, patient_id: &str) -> WorkflowResult<()> {
    db.get_patient(workplace_id, patient_id)?
        .map(|_| ())
        .ok_or_else(|| WorkflowError::not_found("Patient"))
}

pub(crate) fn audit(db: &Database, entry: AuditEntry) -> Result<(), DbError> {
    db.append_audit(entry).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_conflicts_keep_their_kind() {
        let err: WorkflowError = DbError::Conflict("taken".into()).into();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(err.to_string(), "taken");

        let err: WorkflowError = DbError::Constraint("bad row".into()).into();
        assert_eq!(err.code(), "SERVER_ERROR");
    }

    #[test]
    fn test_transitions_are_validation_errors() {
        let err: WorkflowError = TransitionError::RetryLimit { retry_count: 3, max: 3 }.into();
        assert_eq!(err.code(), "VALIDATION_ERROR");
        assert!(err.to_string().contains("retry limit"));
    }

    #[test]
    fn test_super_admin_without_workspace_is_rejected() {
        let ctx = WorkspaceContext {
            user_id: "admin".into(),
            workplace_id: None,
            role: crate::models::UserRole::SuperAdmin,
        };
        assert!(matches!(workspace_of(&ctx), Err(WorkflowError::Validation(_))));
    }
}
