//! RxFlow Core Library
//!
//! Multi-tenant clinical pharmacy workflows around AI-assisted diagnostics.
//!
//! # Architecture
//!
//! ```text
//! Pharmacist intake → DiagnosticRequest (pending)
//!                            │
//!                   claim → processing ──── model call (rxflow-ai)
//!                            │
//!              ┌─────────────┴─────────────┐
//!              ▼                           ▼
//!     completed + DiagnosticResult       failed (retry ≤ 3)
//!              │
//!      Pharmacist review (approve / modify / reject)
//!              │
//!      ┌───────┴────────────────┬──────────────────────┐
//!      ▼                        ▼                      ▼
//!  Follow-ups           Clinical intervention    Adherence tracking
//!      │                        │                      │
//!      └──────────── hash-chained audit log ───────────┘
//! ```
//!
//! # Core Principle
//!
//! **AI output is advisory.** Nothing downstream of a result happens until a
//! licensed pharmacist has reviewed it.
//!
//! # Modules
//!
//! - [`db`]: SQLite persistence, one `impl Database` block per entity
//! - [`models`]: Domain types and their state machines
//! - [`workflow`]: Services performing one audited workflow step per call
//! - [`export`]: Analytics summaries and compliance export

pub mod db;
pub mod export;
pub mod models;
pub mod workflow;

// Re-export commonly used types
pub use db::{Database, DbError};
pub use export::{analytics_summary, AnalyticsSummary, ComplianceExport, ComplianceExporter};
pub use models::{
    AdherenceTracking, ClinicalIntervention, DiagnosticFollowUp, DiagnosticRequest,
    DiagnosticResult, Patient, RequestStatus, UserRole, WorkspaceContext, WorkspaceSettings,
};
pub use workflow::{
    AdherenceService, DiagnosticService, ErrorKind, FollowUpService, InterventionService,
    MaintenanceService, ReviewService, WorkflowError, WorkflowResult, WorkspaceService,
};
