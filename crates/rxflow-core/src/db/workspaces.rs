//! Workspace settings database operations.

use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use super::{timestamp, Database, DbResult};
use crate::models::WorkspaceSettings;

impl Database {
    /// Settings for a workspace, falling back to defaults when none are stored.
    pub fn get_settings(&self, workplace_id: &str) -> DbResult<WorkspaceSettings> {
        let stored = self
            .conn
            .query_row(
                r#"
                SELECT adherence_threshold, ai_diagnostics_enabled, monthly_diagnostic_limit
                FROM workspace_settings WHERE workplace_id = ?1
                "#,
                params![workplace_id],
                |row| {
                    Ok(WorkspaceSettings {
                        workplace_id: workplace_id.to_string(),
                        adherence_threshold: row.get(0)?,
                        ai_diagnostics_enabled: row.get(1)?,
                        monthly_diagnostic_limit: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(stored.unwrap_or_else(|| WorkspaceSettings::defaults_for(workplace_id)))
    }

    pub fn upsert_settings(&self, settings: &WorkspaceSettings) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO workspace_settings (
                workplace_id, adherence_threshold, ai_diagnostics_enabled,
                monthly_diagnostic_limit, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(workplace_id) DO UPDATE SET
                adherence_threshold = excluded.adherence_threshold,
                ai_diagnostics_enabled = excluded.ai_diagnostics_enabled,
                monthly_diagnostic_limit = excluded.monthly_diagnostic_limit,
                updated_at = excluded.updated_at
            "#,
            params![
                settings.workplace_id,
                settings.adherence_threshold,
                settings.ai_diagnostics_enabled,
                settings.monthly_diagnostic_limit,
                timestamp(&Utc::now()),
            ],
        )?;
        Ok(())
    }
}
