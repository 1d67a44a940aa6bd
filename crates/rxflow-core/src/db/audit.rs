//! Append-only audit log storage.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};

use super::{conflict_on_unique, parse_timestamp, timestamp, Database, DbError, DbResult};
use crate::models::{verify_events, AuditAction, AuditEntry, AuditEvent, ChainVerification, GENESIS_HASH};

const AUDIT_COLUMNS: &str = "sequence, id, workplace_id, actor_id, action, entity_type, \
    entity_id, details, created_at, prev_hash, hash";

impl Database {
    /// Seal `entry` onto its workspace chain and store it.
    ///
    /// Run inside [`Database::atomically`] together with the change being
    /// audited so the two commit or roll back as one.
    pub fn append_audit(&self, entry: AuditEntry) -> DbResult<AuditEvent> {
        let head: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT sequence, hash FROM audit_log WHERE workplace_id = ?1 \
                 ORDER BY sequence DESC LIMIT 1",
                params![entry.workplace_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (sequence, prev_hash) = head.unwrap_or((0, GENESIS_HASH.to_string()));

        let event = AuditEvent::seal(entry, sequence + 1, prev_hash)?;
        self.conn
            .execute(
                r#"
                INSERT INTO audit_log (
                    id, workplace_id, sequence, actor_id, action, entity_type, entity_id,
                    details, created_at, prev_hash, hash
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                "#,
                params![
                    event.id,
                    event.workplace_id,
                    event.sequence,
                    event.actor_id,
                    event.action.as_str(),
                    event.entity_type,
                    event.entity_id,
                    serde_json::to_string(&event.details)?,
                    timestamp(&event.created_at),
                    event.prev_hash,
                    event.hash,
                ],
            )
            .map_err(|e| conflict_on_unique(e, "Audit chain head moved during append"))?;

        Ok(event)
    }

    /// Workspace events in chain order, optionally limited to a time range.
    pub fn list_audit_events(
        &self,
        workplace_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> DbResult<Vec<AuditEvent>> {
        self.query_audit(
            &format!(
                "SELECT {} FROM audit_log \
                 WHERE workplace_id = ?1 \
                   AND (?2 IS NULL OR created_at >= ?2) AND (?3 IS NULL OR created_at < ?3) \
                 ORDER BY sequence",
                AUDIT_COLUMNS
            ),
            params![
                workplace_id,
                from.as_ref().map(timestamp),
                to.as_ref().map(timestamp)
            ],
        )
    }

    /// Events recorded against one entity, oldest first.
    pub fn list_entity_audit(&self, workplace_id: &str, entity_id: &str) -> DbResult<Vec<AuditEvent>> {
        self.query_audit(
            &format!(
                "SELECT {} FROM audit_log WHERE workplace_id = ?1 AND entity_id = ?2 ORDER BY sequence",
                AUDIT_COLUMNS
            ),
            params![workplace_id, entity_id],
        )
    }

    /// Walk the whole workspace chain from genesis.
    pub fn verify_audit_chain(&self, workplace_id: &str) -> DbResult<ChainVerification> {
        let events = self.list_audit_events(workplace_id, None, None)?;
        Ok(verify_events(&events))
    }

    fn query_audit<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<AuditEvent>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, audit_row)?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?.try_into()?);
        }
        Ok(events)
    }
}

/// Intermediate row struct for database mapping.
struct AuditRow {
    sequence: i64,
    id: String,
    workplace_id: String,
    actor_id: String,
    action: String,
    entity_type: String,
    entity_id: String,
    details: String,
    created_at: String,
    prev_hash: String,
    hash: String,
}

fn audit_row(row: &Row<'_>) -> rusqlite::Result<AuditRow> {
    Ok(AuditRow {
        sequence: row.get(0)?,
        id: row.get(1)?,
        workplace_id: row.get(2)?,
        actor_id: row.get(3)?,
        action: row.get(4)?,
        entity_type: row.get(5)?,
        entity_id: row.get(6)?,
        details: row.get(7)?,
        created_at: row.get(8)?,
        prev_hash: row.get(9)?,
        hash: row.get(10)?,
    })
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        let action = AuditAction::parse(&row.action)
            .ok_or_else(|| DbError::Constraint(format!("Unknown audit action: {}", row.action)))?;

        Ok(AuditEvent {
            sequence: row.sequence,
            id: row.id,
            workplace_id: row.workplace_id,
            actor_id: row.actor_id,
            action,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            details: serde_json::from_str(&row.details)?,
            created_at: parse_timestamp(&row.created_at)?,
            prev_hash: row.prev_hash,
            hash: row.hash,
        })
    }
}
