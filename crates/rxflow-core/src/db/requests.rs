//! Diagnostic request database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{
    conflict_on_unique, expect_one, opt_timestamp, parse_opt_timestamp, parse_timestamp,
    timestamp, Database, DbError, DbResult, ReportScope, SCOPE_FILTER,
};
use crate::models::{DiagnosticRequest, InputSnapshot, RequestPriority, RequestStatus};

const REQUEST_COLUMNS: &str = "id, workplace_id, patient_id, pharmacist_id, location_id, \
    input_snapshot, consent_obtained, consent_timestamp, status, priority, retry_count, \
    processing_started_at, processing_completed_at, error_message, cancelled_by, is_deleted, \
    created_at, updated_at";

pub const ACTIVE_REQUEST_CONFLICT: &str =
    "An active diagnostic request already exists for this patient";

/// Start and end of a finished processing run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessingSpan {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl Database {
    /// Insert a new request. A second active request for the patient is a conflict.
    pub fn insert_request(&self, request: &DiagnosticRequest) -> DbResult<()> {
        let snapshot_json = serde_json::to_string(&request.input_snapshot)?;

        self.conn
            .execute(
                r#"
                INSERT INTO diagnostic_requests (
                    id, workplace_id, patient_id, pharmacist_id, location_id,
                    input_snapshot, consent_obtained, consent_timestamp, status, priority,
                    retry_count, processing_started_at, processing_completed_at,
                    error_message, cancelled_by, is_deleted, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
                "#,
                params![
                    request.id,
                    request.workplace_id,
                    request.patient_id,
                    request.pharmacist_id,
                    request.location_id,
                    snapshot_json,
                    request.consent_obtained,
                    timestamp(&request.consent_timestamp),
                    request.status.as_str(),
                    request.priority.as_str(),
                    request.retry_count,
                    opt_timestamp(&request.processing_started_at),
                    opt_timestamp(&request.processing_completed_at),
                    request.error_message,
                    request.cancelled_by,
                    request.is_deleted,
                    timestamp(&request.created_at),
                    timestamp(&request.updated_at),
                ],
            )
            .map_err(|e| conflict_on_unique(e, ACTIVE_REQUEST_CONFLICT))?;
        Ok(())
    }

    /// Get a live request within a workspace.
    pub fn get_request(&self, workplace_id: &str, id: &str) -> DbResult<Option<DiagnosticRequest>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM diagnostic_requests \
                     WHERE id = ?1 AND workplace_id = ?2 AND is_deleted = 0",
                    REQUEST_COLUMNS
                ),
                params![id, workplace_id],
                request_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Persist a status transition, but only if the stored status is still
    /// `expected`. The input snapshot is never rewritten.
    pub fn save_request_transition(
        &self,
        request: &DiagnosticRequest,
        expected: RequestStatus,
    ) -> DbResult<()> {
        let rows = self
            .conn
            .execute(
                r#"
                UPDATE diagnostic_requests SET
                    status = ?4,
                    retry_count = ?5,
                    processing_started_at = ?6,
                    processing_completed_at = ?7,
                    error_message = ?8,
                    cancelled_by = ?9,
                    updated_at = ?10
                WHERE id = ?1 AND workplace_id = ?2 AND status = ?3 AND is_deleted = 0
                "#,
                params![
                    request.id,
                    request.workplace_id,
                    expected.as_str(),
                    request.status.as_str(),
                    request.retry_count,
                    opt_timestamp(&request.processing_started_at),
                    opt_timestamp(&request.processing_completed_at),
                    request.error_message,
                    request.cancelled_by,
                    timestamp(&request.updated_at),
                ],
            )
            .map_err(|e| conflict_on_unique(e, ACTIVE_REQUEST_CONFLICT))?;

        expect_one(
            rows,
            format!(
                "Diagnostic request {} is no longer {}",
                request.id,
                expected.as_str()
            ),
        )
    }

    /// Soft-delete a request that is not being processed.
    pub fn soft_delete_request(
        &self,
        workplace_id: &str,
        id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE diagnostic_requests SET is_deleted = 1, updated_at = ?3
            WHERE id = ?1 AND workplace_id = ?2 AND is_deleted = 0 AND status != 'processing'
            "#,
            params![id, workplace_id, timestamp(&now)],
        )?;
        Ok(rows > 0)
    }

    /// A patient's live requests, newest first.
    pub fn list_patient_requests(
        &self,
        workplace_id: &str,
        patient_id: &str,
    ) -> DbResult<Vec<DiagnosticRequest>> {
        self.query_requests(
            &format!(
                "SELECT {} FROM diagnostic_requests \
                 WHERE workplace_id = ?1 AND patient_id = ?2 AND is_deleted = 0 \
                 ORDER BY created_at DESC",
                REQUEST_COLUMNS
            ),
            params![workplace_id, patient_id],
        )
    }

    /// Requests created in a workspace since `since`, deleted ones included.
    pub fn count_requests_since(&self, workplace_id: &str, since: DateTime<Utc>) -> DbResult<u32> {
        let count: u32 = self.conn.query_row(
            "SELECT COUNT(*) FROM diagnostic_requests WHERE workplace_id = ?1 AND created_at >= ?2",
            params![workplace_id, timestamp(&since)],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Pending requests in any workspace created before `cutoff`, oldest first.
    pub fn list_stale_pending_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<DiagnosticRequest>> {
        self.query_requests(
            &format!(
                "SELECT {} FROM diagnostic_requests \
                 WHERE status = 'pending' AND is_deleted = 0 AND created_at < ?1 \
                 ORDER BY created_at",
                REQUEST_COLUMNS
            ),
            params![timestamp(&cutoff)],
        )
    }

    /// Requests in any workspace still processing since before `cutoff`.
    pub fn list_stuck_processing_requests(
        &self,
        cutoff: DateTime<Utc>,
    ) -> DbResult<Vec<DiagnosticRequest>> {
        self.query_requests(
            &format!(
                "SELECT {} FROM diagnostic_requests \
                 WHERE status = 'processing' AND is_deleted = 0 AND processing_started_at < ?1 \
                 ORDER BY processing_started_at",
                REQUEST_COLUMNS
            ),
            params![timestamp(&cutoff)],
        )
    }

    /// Live request counts by status.
    pub fn request_status_counts(&self, scope: &ReportScope) -> DbResult<Vec<(RequestStatus, u32)>> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM diagnostic_requests \
             WHERE is_deleted = 0 AND {} GROUP BY status",
            SCOPE_FILTER
        ))?;

        let rows = stmt.query_map(params![ws, from, to], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (status, count) = row?;
            counts.push((string_to_status(&status)?, count));
        }
        Ok(counts)
    }

    /// Processing spans of completed requests.
    pub fn completed_processing_spans(&self, scope: &ReportScope) -> DbResult<Vec<ProcessingSpan>> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT processing_started_at, processing_completed_at FROM diagnostic_requests \
             WHERE is_deleted = 0 AND status = 'completed' \
               AND processing_started_at IS NOT NULL AND processing_completed_at IS NOT NULL \
               AND {}",
            SCOPE_FILTER
        ))?;

        let rows = stmt.query_map(params![ws, from, to], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut spans = Vec::new();
        for row in rows {
            let (started, completed) = row?;
            spans.push(ProcessingSpan {
                started_at: parse_timestamp(&started)?,
                completed_at: parse_timestamp(&completed)?,
            });
        }
        Ok(spans)
    }

    fn query_requests<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> DbResult<Vec<DiagnosticRequest>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, request_row)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?.try_into()?);
        }
        Ok(requests)
    }
}

/// Intermediate row struct for database mapping.
struct RequestRow {
    id: String,
    workplace_id: String,
    patient_id: String,
    pharmacist_id: String,
    location_id: Option<String>,
    input_snapshot: String,
    consent_obtained: bool,
    consent_timestamp: String,
    status: String,
    priority: String,
    retry_count: u32,
    processing_started_at: Option<String>,
    processing_completed_at: Option<String>,
    error_message: Option<String>,
    cancelled_by: Option<String>,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn request_row(row: &Row<'_>) -> rusqlite::Result<RequestRow> {
    Ok(RequestRow {
        id: row.get(0)?,
        workplace_id: row.get(1)?,
        patient_id: row.get(2)?,
        pharmacist_id: row.get(3)?,
        location_id: row.get(4)?,
        input_snapshot: row.get(5)?,
        consent_obtained: row.get(6)?,
        consent_timestamp: row.get(7)?,
        status: row.get(8)?,
        priority: row.get(9)?,
        retry_count: row.get(10)?,
        processing_started_at: row.get(11)?,
        processing_completed_at: row.get(12)?,
        error_message: row.get(13)?,
        cancelled_by: row.get(14)?,
        is_deleted: row.get(15)?,
        created_at: row.get(16)?,
        updated_at: row.get(17)?,
    })
}

impl TryFrom<RequestRow> for DiagnosticRequest {
    type Error = DbError;

    fn try_from(row: RequestRow) -> Result<Self, Self::Error> {
        let input_snapshot: InputSnapshot = serde_json::from_str(&row.input_snapshot)?;
        let priority = RequestPriority::parse(&row.priority)
            .ok_or_else(|| DbError::Constraint(format!("Unknown priority: {}", row.priority)))?;

        Ok(DiagnosticRequest {
            id: row.id,
            patient_id: row.patient_id,
            pharmacist_id: row.pharmacist_id,
            workplace_id: row.workplace_id,
            location_id: row.location_id,
            input_snapshot,
            consent_obtained: row.consent_obtained,
            consent_timestamp: parse_timestamp(&row.consent_timestamp)?,
            status: string_to_status(&row.status)?,
            priority,
            retry_count: row.retry_count,
            processing_started_at: parse_opt_timestamp(row.processing_started_at)?,
            processing_completed_at: parse_opt_timestamp(row.processing_completed_at)?,
            error_message: row.error_message,
            cancelled_by: row.cancelled_by,
            is_deleted: row.is_deleted,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn string_to_status(s: &str) -> Result<RequestStatus, DbError> {
    RequestStatus::parse(s)
        .ok_or_else(|| DbError::Constraint(format!("Unknown request status: {}", s)))
}
