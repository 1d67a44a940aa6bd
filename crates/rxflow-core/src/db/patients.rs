//! Patient database operations.

use rusqlite::{params, OptionalExtension, Row};

use super::{conflict_on_unique, parse_date, parse_timestamp, timestamp, Database, DbError, DbResult};
use crate::models::Patient;

const PATIENT_COLUMNS: &str = "id, workplace_id, mrn, first_name, last_name, date_of_birth, \
                               gender, is_deleted, created_at, updated_at";

impl Database {
    /// Insert a new patient. A duplicate MRN in the workspace is a conflict.
    pub fn insert_patient(&self, patient: &Patient) -> DbResult<()> {
        self.conn
            .execute(
                r#"
                INSERT INTO patients (
                    id, workplace_id, mrn, first_name, last_name, date_of_birth,
                    gender, is_deleted, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                "#,
                params![
                    patient.id,
                    patient.workplace_id,
                    patient.mrn,
                    patient.first_name,
                    patient.last_name,
                    patient.date_of_birth.map(|d| d.format("%Y-%m-%d").to_string()),
                    patient.gender,
                    patient.is_deleted,
                    timestamp(&patient.created_at),
                    timestamp(&patient.updated_at),
                ],
            )
            .map_err(|e| {
                conflict_on_unique(e, &format!("Patient with MRN {} already exists", patient.mrn))
            })?;
        Ok(())
    }

    /// Get a live patient within a workspace.
    pub fn get_patient(&self, workplace_id: &str, id: &str) -> DbResult<Option<Patient>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM patients WHERE id = ?1 AND workplace_id = ?2 AND is_deleted = 0",
                    PATIENT_COLUMNS
                ),
                params![id, workplace_id],
                patient_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// List live patients in a workspace, by name.
    pub fn list_patients(&self, workplace_id: &str) -> DbResult<Vec<Patient>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM patients WHERE workplace_id = ? AND is_deleted = 0 \
             ORDER BY last_name, first_name",
            PATIENT_COLUMNS
        ))?;

        let rows = stmt.query_map([workplace_id], patient_row)?;
        let mut patients = Vec::new();
        for row in rows {
            patients.push(row?.try_into()?);
        }
        Ok(patients)
    }
}

/// Intermediate row struct for database mapping.
struct PatientRow {
    id: String,
    workplace_id: String,
    mrn: String,
    first_name: String,
    last_name: String,
    date_of_birth: Option<String>,
    gender: Option<String>,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn patient_row(row: &Row<'_>) -> rusqlite::Result<PatientRow> {
    Ok(PatientRow {
        id: row.get(0)?,
        workplace_id: row.get(1)?,
        mrn: row.get(2)?,
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        date_of_birth: row.get(5)?,
        gender: row.get(6)?,
        is_deleted: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

impl TryFrom<PatientRow> for Patient {
    type Error = DbError;

    fn try_from(row: PatientRow) -> Result<Self, Self::Error> {
        Ok(Patient {
            id: row.id,
            workplace_id: row.workplace_id,
            mrn: row.mrn,
            first_name: row.first_name,
            last_name: row.last_name,
            date_of_birth: parse_date(row.date_of_birth)?,
            gender: row.gender,
            is_deleted: row.is_deleted,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewPatient;
    use chrono::{NaiveDate, SubsecRound};

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn new_patient(mrn: &str, last: &str) -> NewPatient {
        NewPatient {
            mrn: mrn.into(),
            first_name: "Ada".into(),
            last_name: last.into(),
            date_of_birth: NaiveDate::from_ymd_opt(1980, 5, 17),
            gender: Some("female".into()),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let db = setup_db();
        let patient = Patient::new("ws-1".into(), new_patient("MRN-1", "Obi"));
        db.insert_patient(&patient).unwrap();

        let retrieved = db.get_patient("ws-1", &patient.id).unwrap().unwrap();
        assert_eq!(retrieved.last_name, "Obi");
        assert_eq!(retrieved.date_of_birth, NaiveDate::from_ymd_opt(1980, 5, 17));
        assert_eq!(retrieved.created_at, patient.created_at.trunc_subsecs(6));
    }

    #[test]
    fn test_patient_invisible_from_other_workspace() {
        let db = setup_db();
        let patient = Patient::new("ws-1".into(), new_patient("MRN-1", "Obi"));
        db.insert_patient(&patient).unwrap();

        assert!(db.get_patient("ws-2", &patient.id).unwrap().is_none());
        assert!(db.list_patients("ws-2").unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_mrn_conflicts_within_workspace_only() {
        let db = setup_db();
        db.insert_patient(&Patient::new("ws-1".into(), new_patient("MRN-1", "Obi")))
            .unwrap();

        let dup = db.insert_patient(&Patient::new("ws-1".into(), new_patient("MRN-1", "Ade")));
        assert!(matches!(dup, Err(DbError::Conflict(_))));

        db.insert_patient(&Patient::new("ws-2".into(), new_patient("MRN-1", "Ade")))
            .unwrap();
    }
}
