//! Adherence tracking database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{
    conflict_on_unique, expect_one, opt_timestamp, parse_opt_timestamp, parse_timestamp,
    timestamp, Database, DbError, DbResult, ReportScope, SCOPE_FILTER,
};
use crate::models::{
    AdherenceAlert, AdherenceCategory, AdherenceIntervention, AdherenceTracking,
    MedicationAdherence, MonitoringFrequency,
};

const TRACKING_COLUMNS: &str = "id, workplace_id, patient_id, medications, \
    overall_adherence_score, adherence_category, monitoring_frequency, next_assessment_date, \
    last_assessment_date, alerts, interventions, created_by, is_deleted, created_at, updated_at";

/// Adherence figures for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceStats {
    pub tracked_patients: u32,
    pub average_score: Option<f64>,
    pub poor_count: u32,
}

impl Database {
    /// Insert a tracking record. A patient has at most one per workspace.
    pub fn insert_tracking(&self, tracking: &AdherenceTracking) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO adherence_tracking (
                    id, workplace_id, patient_id, medications, overall_adherence_score,
                    adherence_category, monitoring_frequency, next_assessment_date,
                    last_assessment_date, alerts, interventions, created_by, is_deleted,
                    created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
                "#,
                params![
                    tracking.id,
                    tracking.workplace_id,
                    tracking.patient_id,
                    serde_json::to_string(&tracking.medications)?,
                    tracking.overall_adherence_score,
                    enum_str(&tracking.adherence_category)?,
                    enum_str(&tracking.monitoring_frequency)?,
                    timestamp(&tracking.next_assessment_date),
                    opt_timestamp(&tracking.last_assessment_date),
                    serde_json::to_string(&tracking.alerts)?,
                    serde_json::to_string(&tracking.interventions)?,
                    tracking.created_by,
                    tracking.is_deleted,
                    timestamp(&tracking.created_at),
                    timestamp(&tracking.updated_at),
                ],
            )
            .map_err(|e| conflict_on_unique(e, "Adherence tracking already exists for this patient"))?;
        Ok(())
    }

    /// Get the live tracking record for a patient.
    pub fn get_tracking_for_patient(
        &self,
        workplace_id: &str,
        patient_id: &str,
    ) -> DbResult<Option<AdherenceTracking>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM adherence_tracking \
                     WHERE workplace_id = ?1 AND patient_id = ?2 AND is_deleted = 0",
                    TRACKING_COLUMNS
                ),
                params![workplace_id, patient_id],
                tracking_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Save a modified tracking record. `expected_updated_at` is the
    /// version that was read; a concurrent write in between is a conflict.
    pub fn update_tracking(
        &self,
        tracking: &AdherenceTracking,
        expected_updated_at: &DateTime<Utc>,
    ) -> DbResult<()> {
        let rows = self.conn.execute(
            r#"
            UPDATE adherence_tracking SET
                medications = ?4,
                overall_adherence_score = ?5,
                adherence_category = ?6,
                monitoring_frequency = ?7,
                next_assessment_date = ?8,
                last_assessment_date = ?9,
                alerts = ?10,
                interventions = ?11,
                updated_at = ?12
            WHERE id = ?1 AND workplace_id = ?2 AND updated_at = ?3 AND is_deleted = 0
            "#,
            params![
                tracking.id,
                tracking.workplace_id,
                timestamp(expected_updated_at),
                serde_json::to_string(&tracking.medications)?,
                tracking.overall_adherence_score,
                enum_str(&tracking.adherence_category)?,
                enum_str(&tracking.monitoring_frequency)?,
                timestamp(&tracking.next_assessment_date),
                opt_timestamp(&tracking.last_assessment_date),
                serde_json::to_string(&tracking.alerts)?,
                serde_json::to_string(&tracking.interventions)?,
                timestamp(&tracking.updated_at),
            ],
        )?;

        expect_one(
            rows,
            format!("Adherence tracking {} was modified concurrently", tracking.id),
        )
    }

    /// Workspace trackings scoring below `threshold`, lowest first.
    pub fn list_poor_adherence(
        &self,
        workplace_id: &str,
        threshold: f64,
    ) -> DbResult<Vec<AdherenceTracking>> {
        self.query_trackings(
            &format!(
                "SELECT {} FROM adherence_tracking \
                 WHERE workplace_id = ?1 AND overall_adherence_score < ?2 AND is_deleted = 0 \
                 ORDER BY overall_adherence_score",
                TRACKING_COLUMNS
            ),
            params![workplace_id, threshold],
        )
    }

    /// Trackings in any workspace whose next assessment is due.
    pub fn list_trackings_due(&self, now: DateTime<Utc>) -> DbResult<Vec<AdherenceTracking>> {
        self.query_trackings(
            &format!(
                "SELECT {} FROM adherence_tracking \
                 WHERE next_assessment_date <= ?1 AND is_deleted = 0 \
                 ORDER BY next_assessment_date",
                TRACKING_COLUMNS
            ),
            params![timestamp(&now)],
        )
    }

    /// Trackings holding any alert that has not been notified.
    pub fn list_trackings_with_unnotified_alerts(&self) -> DbResult<Vec<AdherenceTracking>> {
        self.query_trackings(
            &format!(
                "SELECT {} FROM adherence_tracking \
                 WHERE is_deleted = 0 AND EXISTS ( \
                     SELECT 1 FROM json_each(adherence_tracking.alerts) \
                     WHERE json_extract(value, '$.notifiedAt') IS NULL \
                       AND json_extract(value, '$.resolved') = 0) \
                 ORDER BY updated_at",
                TRACKING_COLUMNS
            ),
            [],
        )
    }

    pub fn adherence_stats(&self, scope: &ReportScope) -> DbResult<AdherenceStats> {
        let (ws, from, to) = scope.params();
        self.conn
            .query_row(
                &format!(
                    "SELECT COUNT(*), AVG(overall_adherence_score), \
                            COALESCE(SUM(CASE WHEN adherence_category = 'poor' THEN 1 ELSE 0 END), 0) \
                     FROM adherence_tracking WHERE is_deleted = 0 AND {}",
                    SCOPE_FILTER
                ),
                params![ws, from, to],
                |row| {
                    Ok(AdherenceStats {
                        tracked_patients: row.get(0)?,
                        average_score: row.get(1)?,
                        poor_count: row.get(2)?,
                    })
                },
            )
            .map_err(Into::into)
    }

    /// Unresolved alerts across the scope's trackings.
    pub fn open_alert_count(&self, scope: &ReportScope) -> DbResult<u32> {
        let (ws, from, to) = scope.params();
        let count: u32 = self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM adherence_tracking, json_each(adherence_tracking.alerts) \
                 WHERE adherence_tracking.is_deleted = 0 \
                   AND json_extract(value, '$.resolved') = 0 AND {}",
                SCOPE_FILTER
            ),
            params![ws, from, to],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn query_trackings<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> DbResult<Vec<AdherenceTracking>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, tracking_row)?;

        let mut trackings = Vec::new();
        for row in rows {
            trackings.push(row?.try_into()?);
        }
        Ok(trackings)
    }
}

/// Intermediate row struct for database mapping.
struct TrackingRow {
    id: String,
    workplace_id: String,
    patient_id: String,
    medications: String,
    overall_adherence_score: f64,
    adherence_category: String,
    monitoring_frequency: String,
    next_assessment_date: String,
    last_assessment_date: Option<String>,
    alerts: String,
    interventions: String,
    created_by: String,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn tracking_row(row: &Row<'_>) -> rusqlite::Result<TrackingRow> {
    Ok(TrackingRow {
        id: row.get(0)?,
        workplace_id: row.get(1)?,
        patient_id: row.get(2)?,
        medications: row.get(3)?,
        overall_adherence_score: row.get(4)?,
        adherence_category: row.get(5)?,
        monitoring_frequency: row.get(6)?,
        next_assessment_date: row.get(7)?,
        last_assessment_date: row.get(8)?,
        alerts: row.get(9)?,
        interventions: row.get(10)?,
        created_by: row.get(11)?,
        is_deleted: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
    })
}

impl TryFrom<TrackingRow> for AdherenceTracking {
    type Error = DbError;

    fn try_from(row: TrackingRow) -> Result<Self, Self::Error> {
        let medications: Vec<MedicationAdherence> = serde_json::from_str(&row.medications)?;
        let alerts: Vec<AdherenceAlert> = serde_json::from_str(&row.alerts)?;
        let interventions: Vec<AdherenceIntervention> = serde_json::from_str(&row.interventions)?;
        let adherence_category: AdherenceCategory = parse_enum(&row.adherence_category)?;
        let monitoring_frequency: MonitoringFrequency = parse_enum(&row.monitoring_frequency)?;

        Ok(AdherenceTracking {
            id: row.id,
            workplace_id: row.workplace_id,
            patient_id: row.patient_id,
            medications,
            overall_adherence_score: row.overall_adherence_score,
            adherence_category,
            monitoring_frequency,
            next_assessment_date: parse_timestamp(&row.next_assessment_date)?,
            last_assessment_date: parse_opt_timestamp(row.last_assessment_date)?,
            alerts,
            interventions,
            created_by: row.created_by,
            is_deleted: row.is_deleted,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

/// Serialized name of a unit enum variant.
fn enum_str<T: serde::Serialize>(value: &T) -> DbResult<String> {
    match serde_json::to_value(value)? {
        serde_json::Value::String(s) => Ok(s),
        other => Err(DbError::Constraint(format!("Expected a string variant, got {}", other))),
    }
}

fn parse_enum<T: serde::de::DeserializeOwned>(s: &str) -> DbResult<T> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .map_err(|_| DbError::Constraint(format!("Unknown value: {}", s)))
}
