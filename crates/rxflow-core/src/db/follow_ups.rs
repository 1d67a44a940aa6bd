//! Follow-up database operations.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;

use super::{
    expect_one, opt_timestamp, parse_opt_timestamp, parse_timestamp, timestamp, Database,
    DbError, DbResult, ReportScope, SCOPE_FILTER,
};
use crate::models::{
    DiagnosticFollowUp, FollowUpOutcome, FollowUpPriority, FollowUpStatus, FollowUpType,
    RuleBasis,
};

const FOLLOW_UP_COLUMNS: &str = "id, workplace_id, patient_id, request_id, result_id, \
    assigned_to, follow_up_type, priority, description, objectives, scheduled_date, \
    estimated_duration_minutes, status, outcome, completed_at, rule_basis, max_follow_ups, \
    auto_scheduled, rescheduled_from, reschedule_reason, reminder_sent_at, created_by, \
    is_deleted, created_at, updated_at";

/// Follow-up totals for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUpCounts {
    pub scheduled: u32,
    pub in_progress: u32,
    pub completed: u32,
    pub missed: u32,
    pub rescheduled: u32,
    pub cancelled: u32,
    pub overdue: u32,
}

impl Database {
    pub fn insert_follow_up(&self, follow_up: &DiagnosticFollowUp) -> DbResult<()> {
        let objectives_json = serde_json::to_string(&follow_up.objectives)?;
        let outcome_json = follow_up
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT INTO follow_ups (
                id, workplace_id, patient_id, request_id, result_id, assigned_to,
                follow_up_type, priority, description, objectives, scheduled_date,
                estimated_duration_minutes, status, outcome, completed_at, rule_basis,
                max_follow_ups, auto_scheduled, rescheduled_from, reschedule_reason,
                reminder_sent_at, created_by, is_deleted, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15,
                      ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)
            "#,
            params![
                follow_up.id,
                follow_up.workplace_id,
                follow_up.patient_id,
                follow_up.request_id,
                follow_up.result_id,
                follow_up.assigned_to,
                follow_up.follow_up_type.as_str(),
                follow_up.priority.as_str(),
                follow_up.description,
                objectives_json,
                timestamp(&follow_up.scheduled_date),
                follow_up.estimated_duration_minutes,
                follow_up.status.as_str(),
                outcome_json,
                opt_timestamp(&follow_up.completed_at),
                follow_up.rule_basis.as_ref().map(RuleBasis::key),
                follow_up.max_follow_ups,
                follow_up.auto_scheduled,
                follow_up.rescheduled_from,
                follow_up.reschedule_reason,
                opt_timestamp(&follow_up.reminder_sent_at),
                follow_up.created_by,
                follow_up.is_deleted,
                timestamp(&follow_up.created_at),
                timestamp(&follow_up.updated_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_follow_up(
        &self,
        workplace_id: &str,
        id: &str,
    ) -> DbResult<Option<DiagnosticFollowUp>> {
        self.conn
            .query_row(
                &format!(
                    "SELECT {} FROM follow_ups WHERE id = ?1 AND workplace_id = ?2 AND is_deleted = 0",
                    FOLLOW_UP_COLUMNS
                ),
                params![id, workplace_id],
                follow_up_row,
            )
            .optional()?
            .map(TryInto::try_into)
            .transpose()
    }

    /// Persist a status change if the stored status is still `expected`.
    pub fn save_follow_up_transition(
        &self,
        follow_up: &DiagnosticFollowUp,
        expected: FollowUpStatus,
    ) -> DbResult<()> {
        let outcome_json = follow_up
            .outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let rows = self.conn.execute(
            r#"
            UPDATE follow_ups SET
                status = ?4,
                outcome = ?5,
                completed_at = ?6,
                reschedule_reason = ?7,
                updated_at = ?8
            WHERE id = ?1 AND workplace_id = ?2 AND status = ?3 AND is_deleted = 0
            "#,
            params![
                follow_up.id,
                follow_up.workplace_id,
                expected.as_str(),
                follow_up.status.as_str(),
                outcome_json,
                opt_timestamp(&follow_up.completed_at),
                follow_up.reschedule_reason,
                timestamp(&follow_up.updated_at),
            ],
        )?;

        expect_one(
            rows,
            format!("Follow-up {} is no longer {}", follow_up.id, expected.as_str()),
        )
    }

    /// Follow-ups for a request, by scheduled date.
    pub fn list_follow_ups_for_request(
        &self,
        workplace_id: &str,
        request_id: &str,
    ) -> DbResult<Vec<DiagnosticFollowUp>> {
        self.query_follow_ups(
            &format!(
                "SELECT {} FROM follow_ups \
                 WHERE workplace_id = ?1 AND request_id = ?2 AND is_deleted = 0 \
                 ORDER BY scheduled_date",
                FOLLOW_UP_COLUMNS
            ),
            params![workplace_id, request_id],
        )
    }

    /// Follow-ups counting towards a rule's limit. Rescheduled and
    /// cancelled ones are excluded.
    pub fn count_follow_ups_for_basis(
        &self,
        workplace_id: &str,
        request_id: &str,
        basis: &RuleBasis,
    ) -> DbResult<u32> {
        let count: u32 = self.conn.query_row(
            r#"
            SELECT COUNT(*) FROM follow_ups
            WHERE workplace_id = ?1 AND request_id = ?2 AND rule_basis = ?3
              AND status NOT IN ('rescheduled', 'cancelled') AND is_deleted = 0
            "#,
            params![workplace_id, request_id, basis.key()],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Open follow-ups past their scheduled date, oldest first.
    pub fn list_overdue_follow_ups(
        &self,
        workplace_id: &str,
        now: DateTime<Utc>,
    ) -> DbResult<Vec<DiagnosticFollowUp>> {
        self.query_follow_ups(
            &format!(
                "SELECT {} FROM follow_ups \
                 WHERE workplace_id = ?1 AND status IN ('scheduled', 'in_progress') \
                   AND scheduled_date < ?2 AND is_deleted = 0 \
                 ORDER BY scheduled_date",
                FOLLOW_UP_COLUMNS
            ),
            params![workplace_id, timestamp(&now)],
        )
    }

    /// Scheduled follow-ups in any workspace due before `cutoff`.
    pub fn list_late_scheduled_follow_ups(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<DiagnosticFollowUp>> {
        self.query_follow_ups(
            &format!(
                "SELECT {} FROM follow_ups \
                 WHERE status = 'scheduled' AND scheduled_date < ?1 AND is_deleted = 0 \
                 ORDER BY scheduled_date",
                FOLLOW_UP_COLUMNS
            ),
            params![timestamp(&cutoff)],
        )
    }

    /// Scheduled follow-ups due before `until` that have had no reminder.
    pub fn list_reminders_due(
        &self,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> DbResult<Vec<DiagnosticFollowUp>> {
        self.query_follow_ups(
            &format!(
                "SELECT {} FROM follow_ups \
                 WHERE status = 'scheduled' AND reminder_sent_at IS NULL AND is_deleted = 0 \
                   AND scheduled_date >= ?1 AND scheduled_date < ?2 \
                 ORDER BY scheduled_date",
                FOLLOW_UP_COLUMNS
            ),
            params![timestamp(&now), timestamp(&until)],
        )
    }

    /// Stamp a reminder. False if another sweep already did.
    pub fn mark_reminder_sent(&self, id: &str, now: DateTime<Utc>) -> DbResult<bool> {
        let rows = self.conn.execute(
            "UPDATE follow_ups SET reminder_sent_at = ?2 WHERE id = ?1 AND reminder_sent_at IS NULL",
            params![id, timestamp(&now)],
        )?;
        Ok(rows == 1)
    }

    /// Follow-up counts by status plus the number currently overdue.
    pub fn follow_up_counts(
        &self,
        scope: &ReportScope,
        now: DateTime<Utc>,
    ) -> DbResult<FollowUpCounts> {
        let (ws, from, to) = scope.params();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT status, COUNT(*), \
                    SUM(CASE WHEN status IN ('scheduled', 'in_progress') AND scheduled_date < ?4 \
                        THEN 1 ELSE 0 END) \
             FROM follow_ups WHERE is_deleted = 0 AND {} GROUP BY status",
            SCOPE_FILTER
        ))?;

        let rows = stmt.query_map(params![ws, from, to, timestamp(&now)], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, u32>(1)?,
                row.get::<_, u32>(2)?,
            ))
        })?;

        let mut counts = FollowUpCounts::default();
        for row in rows {
            let (status, count, overdue) = row?;
            counts.overdue += overdue;
            match string_to_status(&status)? {
                FollowUpStatus::Scheduled => counts.scheduled = count,
                FollowUpStatus::InProgress => counts.in_progress = count,
                FollowUpStatus::Completed => counts.completed = count,
                FollowUpStatus::Missed => counts.missed = count,
                FollowUpStatus::Rescheduled => counts.rescheduled = count,
                FollowUpStatus::Cancelled => counts.cancelled = count,
            }
        }
        Ok(counts)
    }

    fn query_follow_ups<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> DbResult<Vec<DiagnosticFollowUp>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, follow_up_row)?;

        let mut follow_ups = Vec::new();
        for row in rows {
            follow_ups.push(row?.try_into()?);
        }
        Ok(follow_ups)
    }
}

/// Intermediate row struct for database mapping.
struct FollowUpRow {
    id: String,
    workplace_id: String,
    patient_id: String,
    request_id: String,
    result_id: Option<String>,
    assigned_to: String,
    follow_up_type: String,
    priority: String,
    description: String,
    objectives: String,
    scheduled_date: String,
    estimated_duration_minutes: u32,
    status: String,
    outcome: Option<String>,
    completed_at: Option<String>,
    rule_basis: Option<String>,
    max_follow_ups: Option<u32>,
    auto_scheduled: bool,
    rescheduled_from: Option<String>,
    reschedule_reason: Option<String>,
    reminder_sent_at: Option<String>,
    created_by: String,
    is_deleted: bool,
    created_at: String,
    updated_at: String,
}

fn follow_up_row(row: &Row<'_>) -> rusqlite::Result<FollowUpRow> {
    Ok(FollowUpRow {
        id: row.get(0)?,
        workplace_id: row.get(1)?,
        patient_id: row.get(2)?,
        request_id: row.get(3)?,
        result_id: row.get(4)?,
        assigned_to: row.get(5)?,
        follow_up_type: row.get(6)?,
        priority: row.get(7)?,
        description: row.get(8)?,
        objectives: row.get(9)?,
        scheduled_date: row.get(10)?,
        estimated_duration_minutes: row.get(11)?,
        status: row.get(12)?,
        outcome: row.get(13)?,
        completed_at: row.get(14)?,
        rule_basis: row.get(15)?,
        max_follow_ups: row.get(16)?,
        auto_scheduled: row.get(17)?,
        rescheduled_from: row.get(18)?,
        reschedule_reason: row.get(19)?,
        reminder_sent_at: row.get(20)?,
        created_by: row.get(21)?,
        is_deleted: row.get(22)?,
        created_at: row.get(23)?,
        updated_at: row.get(24)?,
    })
}

impl TryFrom<FollowUpRow> for DiagnosticFollowUp {
    type Error = DbError;

    fn try_from(row: FollowUpRow) -> Result<Self, Self::Error> {
        let objectives: Vec<String> = serde_json::from_str(&row.objectives)?;
        let outcome: Option<FollowUpOutcome> =
            row.outcome.as_deref().map(serde_json::from_str).transpose()?;
        let follow_up_type = FollowUpType::parse(&row.follow_up_type).ok_or_else(|| {
            DbError::Constraint(format!("Unknown follow-up type: {}", row.follow_up_type))
        })?;
        let priority = FollowUpPriority::parse(&row.priority).ok_or_else(|| {
            DbError::Constraint(format!("Unknown follow-up priority: {}", row.priority))
        })?;
        let rule_basis = row
            .rule_basis
            .map(|key| {
                RuleBasis::from_key(&key)
                    .ok_or_else(|| DbError::Constraint(format!("Unknown rule basis: {}", key)))
            })
            .transpose()?;

        Ok(DiagnosticFollowUp {
            id: row.id,
            workplace_id: row.workplace_id,
            patient_id: row.patient_id,
            request_id: row.request_id,
            result_id: row.result_id,
            assigned_to: row.assigned_to,
            follow_up_type,
            priority,
            description: row.description,
            objectives,
            scheduled_date: parse_timestamp(&row.scheduled_date)?,
            estimated_duration_minutes: row.estimated_duration_minutes,
            status: string_to_status(&row.status)?,
            outcome,
            completed_at: parse_opt_timestamp(row.completed_at)?,
            rule_basis,
            max_follow_ups: row.max_follow_ups,
            auto_scheduled: row.auto_scheduled,
            rescheduled_from: row.rescheduled_from,
            reschedule_reason: row.reschedule_reason,
            reminder_sent_at: parse_opt_timestamp(row.reminder_sent_at)?,
            created_by: row.created_by,
            is_deleted: row.is_deleted,
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
        })
    }
}

fn string_to_status(s: &str) -> Result<FollowUpStatus, DbError> {
    FollowUpStatus::parse(s)
        .ok_or_else(|| DbError::Constraint(format!("Unknown follow-up status: {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fixtures;
    use chrono::Duration;

    fn follow_up(db: &Database, scheduled_date: DateTime<Utc>) -> DiagnosticFollowUp {
        let patient = fixtures::patient(db, "ws-1");
        let request = fixtures::request("ws-1", &patient.id, "headache");
        db.insert_request(&request).unwrap();

        let now = Utc::now();
        let follow_up = DiagnosticFollowUp {
            id: uuid::Uuid::new_v4().to_string(),
            workplace_id: "ws-1".into(),
            patient_id: patient.id,
            request_id: request.id,
            result_id: None,
            assigned_to: "pharm-1".into(),
            follow_up_type: FollowUpType::SymptomCheck,
            priority: FollowUpPriority::High,
            description: "Check symptoms".into(),
            objectives: vec!["Confirm resolution".into()],
            scheduled_date,
            estimated_duration_minutes: 15,
            status: FollowUpStatus::Scheduled,
            outcome: None,
            completed_at: None,
            rule_basis: Some(RuleBasis::HighRisk),
            max_follow_ups: Some(2),
            auto_scheduled: true,
            rescheduled_from: None,
            reschedule_reason: None,
            reminder_sent_at: None,
            created_by: "pharm-1".into(),
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        db.insert_follow_up(&follow_up).unwrap();
        follow_up
    }

    #[test]
    fn test_insert_and_get_follow_up() {
        let db = Database::open_in_memory().unwrap();
        let created = follow_up(&db, Utc::now() + Duration::days(3));

        let stored = db.get_follow_up("ws-1", &created.id).unwrap().unwrap();
        assert_eq!(stored.rule_basis, Some(RuleBasis::HighRisk));
        assert_eq!(stored.objectives, created.objectives);
        assert_eq!(
            db.count_follow_ups_for_basis("ws-1", &created.request_id, &RuleBasis::HighRisk)
                .unwrap(),
            1
        );
    }

    #[test]
    fn test_late_scheduled_follow_ups() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let late = follow_up(&db, now - Duration::hours(3));
        follow_up(&db, now - Duration::minutes(30));

        let listed = db.list_late_scheduled_follow_ups(now - Duration::hours(2)).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, late.id);
    }

    #[test]
    fn test_overdue_and_counts() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        follow_up(&db, now - Duration::hours(1));
        follow_up(&db, now + Duration::days(1));

        let overdue = db.list_overdue_follow_ups("ws-1", now).unwrap();
        assert_eq!(overdue.len(), 1);

        let counts = db.follow_up_counts(&ReportScope::workspace("ws-1"), now).unwrap();
        assert_eq!(counts.scheduled, 2);
        assert_eq!(counts.overdue, 1);
    }

    #[test]
    fn test_reminder_stamp_is_one_shot() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        let soon = follow_up(&db, now + Duration::hours(4));

        let due = db.list_reminders_due(now, now + Duration::hours(24)).unwrap();
        assert_eq!(due.len(), 1);
        assert!(db.mark_reminder_sent(&soon.id, now).unwrap());
        assert!(!db.mark_reminder_sent(&soon.id, now).unwrap());
        assert!(db
            .list_reminders_due(now, now + Duration::hours(24))
            .unwrap()
            .is_empty());
    }
}
