//! Compliance export of the audit trail.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Database, DbResult, ReportScope};
use crate::models::{AuditAction, AuditEvent, ReviewStatus};

/// Compliance export metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceMetadata {
    /// Export format version
    pub format_version: String,
    pub exported_at: DateTime<Utc>,
    /// Hash algorithm used
    pub hash_algorithm: String,
    pub workplace_id: String,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    /// Whether the whole workspace chain verified at export time
    pub chain_valid: bool,
    pub first_broken_sequence: Option<i64>,
    pub head_hash: String,
    /// Exporting system identifier
    pub system_id: Option<String>,
}

/// Pharmacist review figures for the exported window.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStatistics {
    pub reviewed: usize,
    pub by_status: BTreeMap<String, usize>,
    /// Mean minutes from result creation to review
    pub mean_minutes_to_review: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceExport {
    pub metadata: ComplianceMetadata,
    pub events: Vec<AuditEvent>,
    pub counts_by_action: BTreeMap<AuditAction, usize>,
    pub review_statistics: ReviewStatistics,
}

impl ComplianceExport {
    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Compliance exporter.
pub struct ComplianceExporter<'a> {
    db: &'a Database,
    system_id: Option<String>,
}

impl<'a> ComplianceExporter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db, system_id: None }
    }

    /// Set the system identifier for exports.
    pub fn with_system_id(mut self, system_id: String) -> Self {
        self.system_id = Some(system_id);
        self
    }

    /// Export a workspace's audit events in `[from, to)` with chain status
    /// and review statistics.
    pub fn export(
        &self,
        workplace_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> DbResult<ComplianceExport> {
        let verification = self.db.verify_audit_chain(workplace_id)?;
        let events = self.db.list_audit_events(workplace_id, from, to)?;

        let mut counts_by_action = BTreeMap::new();
        for event in &events {
            *counts_by_action.entry(event.action).or_insert(0) += 1;
        }

        let timings = self.db.review_timings(&ReportScope {
            workplace_id: Some(workplace_id.to_string()),
            from,
            to,
        })?;
        let mut by_status = BTreeMap::new();
        for status in [ReviewStatus::Approved, ReviewStatus::Modified, ReviewStatus::Rejected] {
            by_status.insert(status.as_str().to_string(), 0);
        }
        for timing in &timings {
            *by_status.entry(timing.status.as_str().to_string()).or_insert(0) += 1;
        }
        let mean_minutes_to_review = if timings.is_empty() {
            None
        } else {
            let total: f64 = timings
                .iter()
                .map(|t| (t.reviewed_at - t.result_created_at).num_seconds() as f64 / 60.0)
                .sum();
            Some(total / timings.len() as f64)
        };

        Ok(ComplianceExport {
            metadata: ComplianceMetadata {
                format_version: "1.0".to_string(),
                exported_at: Utc::now(),
                hash_algorithm: "SHA-256".to_string(),
                workplace_id: workplace_id.to_string(),
                from,
                to,
                chain_valid: verification.valid,
                first_broken_sequence: verification.first_broken_sequence,
                head_hash: verification.head_hash,
                system_id: self.system_id.clone(),
            },
            events,
            counts_by_action,
            review_statistics: ReviewStatistics {
                reviewed: timings.len(),
                by_status,
                mean_minutes_to_review,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ReviewSubmission, WorkspaceContext};
    use crate::workflow::tests_support::completed_result;
    use crate::workflow::ReviewService;
    use chrono::Duration;

    #[test]
    fn test_export_covers_workspace_events() {
        let db = Database::open_in_memory().unwrap();
        let result = completed_result(&db, "fever");
        ReviewService::new(&db)
            .submit_review(
                &WorkspaceContext::pharmacist("pharm-1", "ws-1"),
                &result.id,
                ReviewSubmission {
                    status: Some(ReviewStatus::Modified),
                    modifications: Some("Ibuprofen instead".into()),
                    ..Default::default()
                },
            )
            .unwrap();

        let export = ComplianceExporter::new(&db)
            .with_system_id("rxflow-test".into())
            .export("ws-1", None, None)
            .unwrap();

        assert!(export.metadata.chain_valid);
        assert_eq!(export.metadata.hash_algorithm, "SHA-256");
        assert_eq!(export.metadata.head_hash, export.events.last().unwrap().hash);
        assert_eq!(export.counts_by_action.get(&AuditAction::ReviewSubmitted), Some(&1));
        assert_eq!(export.counts_by_action.get(&AuditAction::RequestCreated), Some(&1));
        assert_eq!(export.review_statistics.reviewed, 1);
        assert_eq!(export.review_statistics.by_status.get("modified"), Some(&1));
        assert!(export.review_statistics.mean_minutes_to_review.is_some());

        let json = export.to_json().unwrap();
        assert!(json.contains("\"review_submitted\""));
        assert!(json.contains("rxflow-test"));
    }

    #[test]
    fn test_window_limits_events_but_not_chain_check() {
        let db = Database::open_in_memory().unwrap();
        completed_result(&db, "headache");

        let future = Utc::now() + Duration::hours(1);
        let export = ComplianceExporter::new(&db)
            .export("ws-1", Some(future), None)
            .unwrap();
        assert!(export.events.is_empty());
        assert!(export.metadata.chain_valid);
        assert_ne!(export.metadata.head_hash, crate::models::GENESIS_HASH);
        assert!(export.review_statistics.mean_minutes_to_review.is_none());
    }
}
