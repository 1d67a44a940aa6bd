//! Database layer for rxflow.

mod adherence;
mod audit;
mod follow_ups;
mod interventions;
mod patients;
mod requests;
mod results;
mod schema;
mod workspaces;

pub use adherence::*;
pub use follow_ups::*;
pub use requests::*;
pub use results::*;
pub use schema::*;

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// A uniqueness rule or an optimistic status check failed.
    #[error("Conflict: {0}")]
    Conflict(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Filter for reporting queries over `created_at`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReportScope {
    /// `None` spans every workspace
    pub workplace_id: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl ReportScope {
    pub fn workspace(workplace_id: impl Into<String>) -> Self {
        Self {
            workplace_id: Some(workplace_id.into()),
            ..Self::default()
        }
    }

    /// Positional parameters for `(?1 IS NULL OR workplace_id = ?1)`,
    /// `(?2 IS NULL OR created_at >= ?2)` and `(?3 IS NULL OR created_at < ?3)`.
    pub(crate) fn params(&self) -> (Option<String>, Option<String>, Option<String>) {
        (
            self.workplace_id.clone(),
            opt_timestamp(&self.from),
            opt_timestamp(&self.to),
        )
    }
}

/// WHERE fragment matching [`ReportScope::params`].
pub(crate) const SCOPE_FILTER: &str = "(?1 IS NULL OR workplace_id = ?1) \
    AND (?2 IS NULL OR created_at >= ?2) AND (?3 IS NULL OR created_at < ?3)";

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a transaction, committing only if it succeeds.
    ///
    /// Calls must not nest.
    pub fn atomically<T, F>(&self, f: F) -> DbResult<T>
    where
        F: FnOnce(&Database) -> DbResult<T>,
    {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Fixed-width UTC timestamp so stored values compare lexicographically.
pub(crate) fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn opt_timestamp(at: &Option<DateTime<Utc>>) -> Option<String> {
    at.as_ref().map(timestamp)
}

pub(crate) fn parse_timestamp(s: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DbError::Constraint(format!("Invalid timestamp '{}': {}", s, e)))
}

pub(crate) fn parse_opt_timestamp(s: Option<String>) -> DbResult<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_timestamp).transpose()
}

pub(crate) fn parse_date(s: Option<String>) -> DbResult<Option<NaiveDate>> {
    s.map(|d| {
        NaiveDate::parse_from_str(&d, "%Y-%m-%d")
            .map_err(|e| DbError::Constraint(format!("Invalid date '{}': {}", d, e)))
    })
    .transpose()
}

/// Turn a UNIQUE violation into [`DbError::Conflict`].
pub(crate) fn conflict_on_unique(err: rusqlite::Error, message: &str) -> DbError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            DbError::Conflict(message.to_string())
        }
        _ => DbError::Sqlite(err),
    }
}

/// A conditional update that touched no rows lost a race.
pub(crate) fn expect_one(rows: usize, message: impl Into<String>) -> DbResult<()> {
    if rows == 1 {
        Ok(())
    } else {
        Err(DbError::Conflict(message.into()))
    }
}


#[cfg(test)]
pub(crate) mod fixtures {
    use super::Database;
    use crate::models::{
        DiagnosticRequest, InputSnapshot, NewDiagnosticRequest, NewPatient, Patient,
        SymptomOnset, SymptomSet, SymptomSeverity,
    };
    use chrono::Utc;

    pub fn snapshot(symptom: &str) -> InputSnapshot {
        InputSnapshot {
            symptoms: SymptomSet {
                subjective: vec![symptom.to_string()],
                objective: vec![],
                duration: "2 days".into(),
                severity: SymptomSeverity::Moderate,
                onset: SymptomOnset::Acute,
            },
            vitals: None,
            current_medications: vec![],
            allergies: vec![],
            medical_history: vec![],
            social_history: None,
        }
    }

    pub fn patient(db: &Database, workplace_id: &str) -> Patient {
        let patient = Patient::new(
            workplace_id.to_string(),
            NewPatient {
                mrn: uuid::Uuid::new_v4().to_string(),
                first_name: "Ada".into(),
                last_name: "Obi".into(),
                date_of_birth: None,
                gender: None,
            },
        );
        db.insert_patient(&patient).unwrap();
        patient
    }

    pub fn request(workplace_id: &str, patient_id: &str, symptom: &str) -> DiagnosticRequest {
        DiagnosticRequest::new(
            workplace_id.to_string(),
            "pharm-1".into(),
            NewDiagnosticRequest {
                patient_id: patient_id.to_string(),
                location_id: None,
                input_snapshot: snapshot(symptom),
                priority: None,
                consent_obtained: Some(true),
                consent_timestamp: None,
            },
            Utc::now(),
        )
    }
}
