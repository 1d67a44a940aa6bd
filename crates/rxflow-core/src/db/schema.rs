//! SQLite schema definition.

/// Complete database schema for rxflow.
///
/// Timestamps are RFC 3339 UTC strings with microsecond precision, nested
/// documents are JSON text, and every tenant table carries `workplace_id`
/// and a soft-delete flag.
pub const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Workspace settings
-- ============================================================================

CREATE TABLE IF NOT EXISTS workspace_settings (
    workplace_id TEXT PRIMARY KEY,
    adherence_threshold REAL NOT NULL DEFAULT 70,
    ai_diagnostics_enabled INTEGER NOT NULL DEFAULT 1,
    monthly_diagnostic_limit INTEGER,            -- NULL means unlimited
    updated_at TEXT NOT NULL
);

-- ============================================================================
-- Patients
-- ============================================================================

CREATE TABLE IF NOT EXISTS patients (
    id TEXT PRIMARY KEY,
    workplace_id TEXT NOT NULL,
    mrn TEXT NOT NULL,
    first_name TEXT NOT NULL,
    last_name TEXT NOT NULL,
    date_of_birth TEXT,                          -- YYYY-MM-DD
    gender TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_patients_mrn
    ON patients(workplace_id, mrn) WHERE is_deleted = 0;

-- ============================================================================
-- Diagnostic requests
-- ============================================================================

CREATE TABLE IF NOT EXISTS diagnostic_requests (
    id TEXT PRIMARY KEY,
    workplace_id TEXT NOT NULL,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    pharmacist_id TEXT NOT NULL,
    location_id TEXT,
    input_snapshot TEXT NOT NULL,                -- JSON InputSnapshot, never updated
    consent_obtained INTEGER NOT NULL,
    consent_timestamp TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('pending', 'processing', 'completed', 'failed', 'cancelled')),
    priority TEXT NOT NULL DEFAULT 'routine',
    retry_count INTEGER NOT NULL DEFAULT 0,
    processing_started_at TEXT,
    processing_completed_at TEXT,
    error_message TEXT,
    cancelled_by TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- At most one active request per patient
CREATE UNIQUE INDEX IF NOT EXISTS uq_requests_active_patient
    ON diagnostic_requests(workplace_id, patient_id)
    WHERE status IN ('pending', 'processing') AND is_deleted = 0;

CREATE INDEX IF NOT EXISTS idx_requests_patient ON diagnostic_requests(workplace_id, patient_id, created_at);
CREATE INDEX IF NOT EXISTS idx_requests_status ON diagnostic_requests(status, created_at);

-- ============================================================================
-- Diagnostic results
-- ============================================================================

CREATE TABLE IF NOT EXISTS diagnostic_results (
    id TEXT PRIMARY KEY,
    request_id TEXT NOT NULL UNIQUE REFERENCES diagnostic_requests(id),
    workplace_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    analysis TEXT NOT NULL,                      -- JSON ClinicalAnalysis
    ai_metadata TEXT NOT NULL,                   -- JSON AiMetadata
    overall_risk TEXT NOT NULL,
    disclaimer TEXT NOT NULL,
    pharmacist_review TEXT,                      -- JSON PharmacistReview, written once
    review_status TEXT,
    reviewed_at TEXT,
    follow_up_required INTEGER NOT NULL DEFAULT 0,
    follow_up_date TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_results_workplace ON diagnostic_results(workplace_id, created_at);

-- ============================================================================
-- Follow-ups
-- ============================================================================

CREATE TABLE IF NOT EXISTS follow_ups (
    id TEXT PRIMARY KEY,
    workplace_id TEXT NOT NULL,
    patient_id TEXT NOT NULL,
    request_id TEXT NOT NULL REFERENCES diagnostic_requests(id),
    result_id TEXT REFERENCES diagnostic_results(id),
    assigned_to TEXT NOT NULL,
    follow_up_type TEXT NOT NULL,
    priority TEXT NOT NULL,
    description TEXT NOT NULL,
    objectives TEXT NOT NULL DEFAULT '[]',       -- JSON array of strings
    scheduled_date TEXT NOT NULL,
    estimated_duration_minutes INTEGER NOT NULL DEFAULT 30,
    status TEXT NOT NULL CHECK (status IN ('scheduled', 'in_progress', 'completed', 'missed', 'rescheduled', 'cancelled')),
    outcome TEXT,                                -- JSON FollowUpOutcome
    completed_at TEXT,
    rule_basis TEXT,
    max_follow_ups INTEGER,
    auto_scheduled INTEGER NOT NULL DEFAULT 0,
    rescheduled_from TEXT REFERENCES follow_ups(id),
    reschedule_reason TEXT,
    reminder_sent_at TEXT,
    created_by TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_follow_ups_request ON follow_ups(request_id, rule_basis);
CREATE INDEX IF NOT EXISTS idx_follow_ups_due ON follow_ups(status, scheduled_date);

-- ============================================================================
-- Adherence tracking
-- ============================================================================

CREATE TABLE IF NOT EXISTS adherence_tracking (
    id TEXT PRIMARY KEY,
    workplace_id TEXT NOT NULL,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    medications TEXT NOT NULL DEFAULT '[]',      -- JSON array of MedicationAdherence
    overall_adherence_score REAL NOT NULL DEFAULT 0,
    adherence_category TEXT NOT NULL,
    monitoring_frequency TEXT NOT NULL,
    next_assessment_date TEXT NOT NULL,
    last_assessment_date TEXT,
    alerts TEXT NOT NULL DEFAULT '[]',           -- JSON array of AdherenceAlert
    interventions TEXT NOT NULL DEFAULT '[]',    -- JSON array of AdherenceIntervention
    created_by TEXT NOT NULL,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_adherence_patient
    ON adherence_tracking(workplace_id, patient_id) WHERE is_deleted = 0;
CREATE INDEX IF NOT EXISTS idx_adherence_due ON adherence_tracking(next_assessment_date);

-- ============================================================================
-- Clinical interventions
-- ============================================================================

CREATE TABLE IF NOT EXISTS clinical_interventions (
    id TEXT PRIMARY KEY,
    intervention_number TEXT NOT NULL,
    workplace_id TEXT NOT NULL,
    patient_id TEXT NOT NULL REFERENCES patients(id),
    category TEXT NOT NULL,
    priority TEXT NOT NULL,
    issue_description TEXT NOT NULL,
    identified_by TEXT NOT NULL,
    identified_at TEXT NOT NULL,
    strategies TEXT NOT NULL DEFAULT '[]',       -- JSON array of InterventionStrategy
    assignments TEXT NOT NULL DEFAULT '[]',      -- JSON array of TeamAssignment
    outcomes TEXT,                               -- JSON InterventionOutcome
    status TEXT NOT NULL,
    diagnostic_result_id TEXT REFERENCES diagnostic_results(id),
    started_at TEXT,
    completed_at TEXT,
    is_deleted INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS uq_interventions_number
    ON clinical_interventions(workplace_id, intervention_number);
CREATE UNIQUE INDEX IF NOT EXISTS uq_interventions_result
    ON clinical_interventions(diagnostic_result_id) WHERE diagnostic_result_id IS NOT NULL;

-- ============================================================================
-- Audit log (append-only, hash-chained per workspace)
-- ============================================================================

CREATE TABLE IF NOT EXISTS audit_log (
    id TEXT PRIMARY KEY,
    workplace_id TEXT NOT NULL,
    sequence INTEGER NOT NULL,
    actor_id TEXT NOT NULL,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    details TEXT NOT NULL DEFAULT 'null',        -- JSON
    created_at TEXT NOT NULL,
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL,
    UNIQUE (workplace_id, sequence)
);

CREATE TRIGGER IF NOT EXISTS audit_log_no_update BEFORE UPDATE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS audit_log_no_delete BEFORE DELETE ON audit_log
BEGIN
    SELECT RAISE(ABORT, 'Audit log is append-only');
END;
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_valid() {
        let conn = Connection::open_in_memory().unwrap();
        let result = conn.execute_batch(SCHEMA);
        assert!(result.is_ok(), "Schema should be valid SQL: {:?}", result);
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        assert!(conn.execute_batch(SCHEMA).is_ok());
    }

    #[test]
    fn test_audit_log_rejects_updates() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO audit_log (id, workplace_id, sequence, actor_id, action, entity_type, entity_id, created_at, prev_hash, hash)
             VALUES ('a1', 'ws-1', 1, 'u1', 'request_created', 'diagnostic_request', 'r1', 'now', 'p', 'h')",
            [],
        )
        .unwrap();

        let result = conn.execute("UPDATE audit_log SET hash = 'x' WHERE id = 'a1'", []);
        assert!(result.is_err());
        let result = conn.execute("DELETE FROM audit_log WHERE id = 'a1'", []);
        assert!(result.is_err());
    }
}
