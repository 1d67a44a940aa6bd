//! Diagnostic result database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{
    conflict_on_unique, expect_one, opt_timestamp, parse_opt_timestamp, parse_timestamp,
    timestamp, Database, DbError, DbResult, ReportScope, SCOPE_FILTER,
};
use crate::models::{AiMetadata, DiagnosticResult, PharmacistReview, ReviewStatus};
use rxflow_ai::{ClinicalAnalysis, Severity};

const RESULT_COLUMNS: &str = "id, request_id, workplace_id, patient_id, analysis, ai_metadata, \
    disclaimer, pharmacist_review, follow_up_required, follow_up_date, is_deleted, created_at, \
    updated_at";

/// Review state of results, as counted for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewCounts {
    pub pending: u32,
    pub approved: u32,
    pub modified: u32,
    pub rejected: u32,
}

/// Creation and review time of a reviewed result.
#[derive(Debug, Clone, PartialEq)]
pub struct ReviewTiming {
    pub status: ReviewStatus,
    pub result_created_at: DateTime<Utc>,
    pub reviewed_at: DateTime<Utc>,
}

impl Database {
    /// Insert a result. Each request has at most one.
    pub fn insert_result(&self, result: &DiagnosticResult) -> DbResult<()> {
        let analysis_json = serde_json::to_string(&result.analysis)?;
        let metadata_json = serde_json::to_string(&result.ai_metadata)?;
        let review_json = result
            .pharmacist_review
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn
            .execute(
                r#"
                INSERT INTO diagnostic_results (
                    id, request_id, workplace_id, patient_id, analysis, ai_metadata,
                    overall_risk, disclaimer, pharmacist_review, review_status, reviewed_at,
                    follow_up_required, follow_up_date, is_deleted, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
                "#,
                params![
                    result.id,
                    result.request_id,
                    result.workplace_id,
                    result.patient_id,
                    analysis_json,
                    metadata_json,
                    result.analysis.risk_assessment.overall_risk.as_str(),
                    result.disclaimer,
                    review_json,
                    result.review_status().map(|s| s.as_str()),
                    result.pharmacist_review.as_ref().map(|r| timestamp(&r.reviewed_at)),
                    result.follow_up_required,
                    opt_timestamp(&result.follow_up_date),
                    result.is_deleted,
                    timestamp(&result.created_at),
                    timestamp(&result.updated_at),
                ],
            )
            .map_err(|e| {
                conflict_on_unique(
                    e,
                    &format!("Request {} already has a result", result.request_id),
                )
            })?;
        Ok(())
    }

    /// Get a live result within a workspace.
    pub fn get_result(&self, workplace_id: &str, id: &str) -> DbResult<Option<DiagnosticResult>> {
        self.query_result(
            "id = ?1 AND workplace_id = ?2",
            params![id, workplace_id],
        )
    }

    /// Get the live result produced for a request.
    pub fn get_result_for_request(
        &self,
        workplace_id: &str,
        request_id: &str,
    ) -> DbResult<Option<DiagnosticResult>> {
        self.query_result(
            "request_id = ?1 AND workplace_id = ?2",
            params![request_id, workplace_id],
        )
    }

    /// Write the pharmacist review, unless one is already recorded.
    pub fn record_review(&self, result: &DiagnosticResult) -> DbResult<()> {
        let review = result
            .pharmacist_review
            .as_ref()
            .ok_or_else(|| DbError::Constraint("Review missing from result".into()))?;
        let review_json = serde_json::to_string(review)?;

        let rows = self.conn.execute(
            r#"
            UPDATE diagnostic_results SET
                pharmacist_review = ?3,
                review_status = ?4,
                reviewed_at = ?5,
                follow_up_required = ?6,
                follow_up_date = ?7,
                updated_at = ?8
            WHERE id = ?1 AND workplace_id = ?2
              AND pharmacist_review IS NULL AND is_deleted = 0
            "#,
            params![
                result.id,
                result.workplace_id,
                review_json,
                review.decision.status().as_str(),
                timestamp(&review.reviewed_at),
                result.follow_up_required,
                opt_timestamp(&result.follow_up_date),
                timestamp(&result.updated_at),
            ],
        )?;

        expect_one(rows, format!("Result {} has already been reviewed", result.id))
    }

    /// Soft-delete the result produced for a request, if any.
    pub fn soft_delete_result_for_request(
        &self,
        workplace_id: &str,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE diagnostic_results SET is_deleted = 1, updated_at = ?3
            WHERE request_id = ?1 AND workplace_id = ?2 AND is_deleted = 0
            "#,
            params![request_id, workplace_id, timestamp(&now)],
        )?;
        Ok(rows > 0)
    }

    /// Live result counts by overall risk.
    pub fn result_risk_counts(&self, scope: &ReportScope) -> DbResult<Vec<(Severity, u32)>> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT overall_risk, COUNT(*) FROM diagnostic_results \
             WHERE is_deleted = 0 AND {} GROUP BY overall_risk ORDER BY overall_risk",
            SCOPE_FILTER
        ))?;

        let rows = stmt.query_map(params![ws, from, to], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (risk, count) = row?;
            let severity = serde_json::from_value(serde_json::Value::String(risk.clone()))
                .map_err(|_| DbError::Constraint(format!("Unknown risk level: {}", risk)))?;
            counts.push((severity, count));
        }
        counts.sort_by_key(|(severity, _)| *severity);
        Ok(counts)
    }

    /// Live results grouped by review state.
    pub fn review_counts(&self, scope: &ReportScope) -> DbResult<ReviewCounts> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT review_status, COUNT(*) FROM diagnostic_results \
             WHERE is_deleted = 0 AND {} GROUP BY review_status",
            SCOPE_FILTER
        ))?;

        let rows = stmt.query_map(params![ws, from, to], |row| {
            Ok((row.get::<_, Option<String>>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = ReviewCounts::default();
        for row in rows {
            let (status, count) = row?;
            match status.as_deref().map(ReviewStatus::parse) {
                None => counts.pending += count,
                Some(Some(ReviewStatus::Approved)) => counts.approved += count,
                Some(Some(ReviewStatus::Modified)) => counts.modified += count,
                Some(Some(ReviewStatus::Rejected)) => counts.rejected += count,
                Some(None) => {
                    return Err(DbError::Constraint(format!(
                        "Unknown review status: {}",
                        status.unwrap_or_default()
                    )))
                }
            }
        }
        Ok(counts)
    }

    /// Review timings for results reviewed within the scope's window.
    pub fn review_timings(&self, scope: &ReportScope) -> DbResult<Vec<ReviewTiming>> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(
            r#"
            SELECT review_status, created_at, reviewed_at FROM diagnostic_results
            WHERE pharmacist_review IS NOT NULL
              AND (?1 IS NULL OR workplace_id = ?1)
              AND (?2 IS NULL OR reviewed_at >= ?2)
              AND (?3 IS NULL OR reviewed_at < ?3)
            ORDER BY reviewed_at
            "#,
        )?;

        let rows = stmt.query_map(params![ws, from, to], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut timings = Vec::new();
        for row in rows {
            let (status, created_at, reviewed_at) = row?;
            timings.push(ReviewTiming {
                status: ReviewStatus::parse(&status).ok_or_else(|| {
                    DbError::Constraint(format!("Unknown review status: {}", status))
                })?,
                result_created_at: parse_timestamp(&created_at)?,
                reviewed_at: parse_timestamp(&reviewed_at)?,
            });
        }
        Ok(timings)
    }

    fn query_result<P: rusqlite::Params>(
        &self,
        filter: &str,
        params: P,
    ) -> DbResult<Option<DiagnosticResult>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM diagnostic_results WHERE {} AND is_deleted = 0",
                    RESULT_COLUMNS, filter
                ),
                params,
                result_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }
}

/// Intermediate row struct for database mapping.
struct ResultRow {
    id: String,
    request_id: String,
    workplace_id: String,
    patient_id: String,
    analysis: String,
    ai_metadata: String,
    disclaimer: String,
    pharmacist_review: Option<String>,
    follow_up_required: bool,
    follow_up_date: Option<String>,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn result_row(row: &Row<'_>) -> rusqlite::Result<ResultRow> {
    Ok(ResultRow {
        id: row.get(0)?,
        request_id: row.get(1)?,
        workplace_id: row.get(2)?,
        patient_id: row.get(3)?,
        analysis: row.get(4)?,
        ai_metadata: row.get(5)?,
        disclaimer: row.get(6)?,
        pharmacist_review: row.get(7)?,
        follow_up_required: row.get(8)?,
        follow_up_date: row.get(9)?,
        is_deleted: row.get(10)?,
        created_at: row.get(11)?,
        updated_at: row.get(12)?,
    })
}

impl TryFrom<ResultRow> for DiagnosticResult {
    type Error = DbError;

    fn try_from(row: ResultRow) -> Result<Self, Self::Error> {
        let analysis: ClinicalAnalysis = serde_json::from_str(&row.analysis)?;
        let ai_metadata: AiMetadata = serde_json::from_str(&row.ai_metadata)?;
        let pharmacist_review: Option<PharmacistReview> = row
            .pharmacist_review
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(DiagnosticResult {
            id: row.id,
            request_id: row.request_id,
            workplace_id: row.workplace_id,
            patient_id: row.patient_id,
            analysis,
            ai_metadata,
            disclaimer: row.disclaimer,
            pharmacist_review,
            follow_up_required: row.follow_up_required,
            follow_up_date: parse_opt_timestamp(row.follow_up_date)?,
            is_deleted: row.is_deleted,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}
