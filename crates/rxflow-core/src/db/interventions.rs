//! Clinical intervention database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{
    conflict_on_unique, expect_one, opt_timestamp, parse_opt_timestamp, parse_timestamp,
    timestamp, Database, DbError, DbResult, ReportScope, SCOPE_FILTER,
};
use crate::models::{
    ClinicalIntervention, InterventionCategory, InterventionOutcome, InterventionPriority,
    InterventionStatus, InterventionStrategy, TeamAssignment,
};

const INTERVENTION_COLUMNS: &str = "id, intervention_number, workplace_id, patient_id, \
    category, priority, issue_description, identified_by, identified_at, strategies, \
    assignments, outcomes, status, diagnostic_result_id, started_at, completed_at, \
    is_deleted, created_at, updated_at";

impl Database {
    /// Highest sequence used so far under a `CI-YYYYMM-` prefix, plus one.
    pub fn next_intervention_sequence(&self, workplace_id: &str, prefix: &str) -> DbResult<u32> {
        let max: u32 = self.conn.query_row(
            r#"
            SELECT COALESCE(MAX(CAST(substr(intervention_number, ?3) AS INTEGER)), 0)
            FROM clinical_interventions
            WHERE workplace_id = ?1 AND substr(intervention_number, 1, ?4) = ?2
            "#,
            params![workplace_id, prefix, prefix.len() + 1, prefix.len()],
            |row| row.get(0),
        )?;
        Ok(max + 1)
    }

    pub fn insert_intervention(&self, intervention: &ClinicalIntervention) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO clinical_interventions (
                    id, intervention_number, workplace_id, patient_id, category, priority,
                    issue_description, identified_by, identified_at, strategies, assignments,
                    outcomes, status, diagnostic_result_id, started_at, completed_at,
                    is_deleted, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                          ?16, ?17, ?18, ?19)
                "#,
                params![
                    intervention.id,
                    intervention.intervention_number,
                    intervention.workplace_id,
                    intervention.patient_id,
                    intervention.category.as_str(),
                    intervention.priority.as_str(),
                    intervention.issue_description,
                    intervention.identified_by,
                    timestamp(&intervention.identified_at),
                    serde_json::to_string(&intervention.strategies)?,
                    serde_json::to_string(&intervention.assignments)?,
                    intervention
                        .outcomes
                        .as_ref()
                        .map(serde_json::to_string)
                        .transpose()?,
                    intervention.status.as_str(),
                    intervention.diagnostic_result_id,
                    opt_timestamp(&intervention.started_at),
                    opt_timestamp(&intervention.completed_at),
                    intervention.is_deleted,
                    timestamp(&intervention.created_at),
                    timestamp(&intervention.updated_at),
                ],
            )
            .map_err(|e| {
                conflict_on_unique(
                    e,
                    "An intervention already exists for this number or diagnostic result",
                )
            })?;
        Ok(())
    }

    pub fn get_intervention(
        &self,
        workplace_id: &str,
        id: &str,
    ) -> DbResult<Option<ClinicalIntervention>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM clinical_interventions \
                     WHERE id = ?1 AND workplace_id = ?2 AND is_deleted = 0",
                    INTERVENTION_COLUMNS
                ),
                params![id, workplace_id],
                intervention_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// The intervention opened from a diagnostic result, if any.
    pub fn get_intervention_for_result(
        &self,
        workplace_id: &str,
        result_id: &str,
    ) -> DbResult<Option<ClinicalIntervention>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM clinical_interventions \
                     WHERE diagnostic_result_id = ?1 AND workplace_id = ?2 AND is_deleted = 0",
                    INTERVENTION_COLUMNS
                ),
                params![result_id, workplace_id],
                intervention_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Save a modified intervention if nobody wrote it since `expected_updated_at`.
    pub fn update_intervention(
        &self,
        intervention: &ClinicalIntervention,
        expected_updated_at: &DateTime<Utc>,
    ) -> DbResult<()> {
        let rows = self.conn.execute(
            r#"
            UPDATE clinical_interventions SET
                priority = ?4,
                strategies = ?5,
                assignments = ?6,
                outcomes = ?7,
                status = ?8,
                started_at = ?9,
                completed_at = ?10,
                updated_at = ?11
            WHERE id = ?1 AND workplace_id = ?2 AND updated_at = ?3 AND is_deleted = 0
            "#,
            params![
                intervention.id,
                intervention.workplace_id,
                timestamp(expected_updated_at),
                intervention.priority.as_str(),
                serde_json::to_string(&intervention.strategies)?,
                serde_json::to_string(&intervention.assignments)?,
                intervention
                    .outcomes
                    .as_ref()
                    .map(serde_json::to_string)
                    .transpose()?,
                intervention.status.as_str(),
                opt_timestamp(&intervention.started_at),
                opt_timestamp(&intervention.completed_at),
                timestamp(&intervention.updated_at),
            ],
        )?;

        expect_one(
            rows,
            format!(
                "Intervention {} was modified concurrently",
                intervention.intervention_number
            ),
        )
    }

    /// A patient's interventions, newest first.
    pub fn list_patient_interventions(
        &self,
        workplace_id: &str,
        patient_id: &str,
    ) -> DbResult<Vec<ClinicalIntervention>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM clinical_interventions \
             WHERE workplace_id = ?1 AND patient_id = ?2 AND is_deleted = 0 \
             ORDER BY created_at DESC",
            INTERVENTION_COLUMNS
        ))?;
        let rows = stmt.query_map(params![workplace_id, patient_id], intervention_row)?;

        let mut interventions = Vec::new();
        for row in rows {
            interventions.push(row?.try_into()?);
        }
        Ok(interventions)
    }

    pub fn intervention_status_counts(
        &self,
        scope: &ReportScope,
    ) -> DbResult<Vec<(InterventionStatus, u32)>> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT status, COUNT(*) FROM clinical_interventions \
             WHERE is_deleted = 0 AND {} GROUP BY status ORDER BY status",
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
}

/// Intermediate row struct for database mapping.
struct InterventionRow {
    id: String,
    intervention_number: String,
    workplace_id: String,
    patient_id: String,
    category: String,
    priority: String,
    issue_description: String,
    identified_by: String,
    identified_at: String,
    strategies: String,
    assignments: String,
    outcomes: Option<String>,
    status: String,
    diagnostic_result_id: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn intervention_row(row: &Row<'_>) -> rusqlite::Result<InterventionRow> {
    Ok(InterventionRow {
        id: row.get(0)?,
        intervention_number: row.get(1)?,
        workplace_id: row.get(2)?,
        patient_id: row.get(3)?,
        category: row.get(4)?,
        priority: row.get(5)?,
        issue_description: row.get(6)?,
        identified_by: row.get(7)?,
        identified_at: row.get(8)?,
        strategies: row.get(9)?,
        assignments: row.get(10)?,
        outcomes: row.get(11)?,
        status: row.get(12)?,
        diagnostic_result_id: row.get(13)?,
        started_at: row.get(14)?,
        completed_at: row.get(15)?,
        is_deleted: row.get(16)?,
        created_at: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

impl TryFrom<InterventionRow> for ClinicalIntervention {
    type Error = DbError;

    fn try_from(row: InterventionRow) -> Result<Self, Self::Error> {
        let strategies: Vec<InterventionStrategy> = serde_json::from_str(&row.strategies)?;
        let assignments: Vec<TeamAssignment> = serde_json::from_str(&row.assignments)?;
        let outcomes: Option<InterventionOutcome> =
            row.outcomes.as_deref().map(serde_json::from_str).transpose()?;
        let category = InterventionCategory::parse(&row.category).ok_or_else(|| {
            DbError::Constraint(format!("Unknown intervention category: {}", row.category))
        })?;
        let priority = InterventionPriority::parse(&row.priority).ok_or_else(|| {
            DbError::Constraint(format!("Unknown intervention priority: {}", row.priority))
        })?;

        Ok(ClinicalIntervention {
            id: row.id,
            intervention_number: row.intervention_number,
            workplace_id: row.workplace_id,
            patient_id: row.patient_id,
            category,
            priority,
            issue_description: row.issue_description,
            identified_by: row.identified_by,
            identified_at: parse_timestamp(&row.identified_at)?,
            strategies,
            assignments,
            outcomes,
            status: string_to_status(&row.status)?,
            diagnostic_result_id: row.diagnostic_result_id,
            started_at: parse_opt_timestamp(row.started_at)?,
            completed_at: parse_opt_timestamp(row.completed_at)?,
            is_deleted: row.is_deleted,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn string_to_status(s: &str) -> Result<InterventionStatus, DbError> {
    InterventionStatus::parse(s)
        .ok_or_else(|| DbError::Constraint(format!("Unknown intervention status: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use crate::models::{intervention_number, intervention_number_prefix, NewIntervention};

    fn open(db: &Database, patient_id: &str, now: DateTime<Utc>) -> ClinicalIntervention {
        let prefix = intervention_number_prefix(now);
        let sequence = db.next_intervention_sequence("ws-1", &prefix).unwrap();
        let intervention = ClinicalIntervention::new(
            "ws-1".into(),
            patient_id.to_string(),
            "pharm-1".into(),
            intervention_number(now, sequence),
            NewIntervention {
                category: InterventionCategory::DrugInteraction,
                priority: None,
                issue_description: "Warfarin with NSAID".into(),
                strategies: vec![],
            },
            InterventionPriority::Medium,
        );
        db.insert_intervention(&intervention).unwrap();
        intervention
    }

    #[test]
    fn test_numbers_increase_within_month() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let now = Utc::now();

        let first = open(&db, &patient.id, now);
        let second = open(&db, &patient.id, now);
        assert!(first.intervention_number.ends_with("-0001"));
        assert!(second.intervention_number.ends_with("-0002"));

        // sequences are per workspace
        let prefix = intervention_number_prefix(now);
        assert_eq!(db.next_intervention_sequence("ws-2", &prefix).unwrap(), 1);
    }

    #[test]
    fn test_update_is_optimistic() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let created = open(&db, &patient.id, Utc::now());
        let version = created.updated_at;

        let mut started = created.clone();
        started
            .set_status(InterventionStatus::InProgress, Utc::now())
            .unwrap();
        db.update_intervention(&started, &version).unwrap();

        let stored = db.get_intervention("ws-1", &created.id).unwrap().unwrap();
        assert_eq!(stored.status, InterventionStatus::InProgress);
        assert!(stored.started_at.is_some());

        let mut cancelled = created;
        cancelled
            .set_status(InterventionStatus::Cancelled, Utc::now())
            .unwrap();
        assert!(matches!(
            db.update_intervention(&cancelled, &version),
            Err(DbError::Conflict(_))
        ));

        let counts = db
            .intervention_status_counts(&ReportScope::workspace("ws-1"))
            .unwrap();
        assert_eq!(counts, vec![(InterventionStatus::InProgress, 1)]);
    }

    #[test]
    fn test_lookup_is_workspace_scoped() {
        let db = Database::open_in_memory().unwrap();
        let patient = fixtures::patient(&db, "ws-1");
        let created = open(&db, &patient.id, Utc::now());

        assert!(db.get_intervention("ws-2", &created.id).unwrap().is_none());
        assert_eq!(
            db.list_patient_interventions("ws-1", &patient.id).unwrap().len(),
            1
        );
    }
}
