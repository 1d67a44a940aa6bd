//! Periodic maintenance sweeps and notification dispatch.
//!
//! Every sweep is safe to run twice, and safe to run from two processes at
//! once: state changes are conditional updates and notifications are
//! claimed by stamping before they are sent.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::{AdherenceService, DiagnosticService, FollowUpService, ReassessmentSummary, WorkflowResult};
use crate::db::{Database, DbError};
use crate::models::{AdherenceAlert, AdherenceTracking, AlertSeverity, DiagnosticFollowUp};

/// Follow-ups scheduled within this window get a reminder.
pub const REMINDER_WINDOW_HOURS: i64 = 24;

/// Default age after which a pending request is redispatched, or a
/// processing one is failed.
pub const DEFAULT_STALE_REQUEST_MINUTES: i64 = 10;

#[derive(Error, Debug)]
#[error("Notification failed: {0}")]
pub struct NotificationError(pub String);

/// Where reminders and alerts are delivered.
pub trait NotificationSink: Send + Sync {
    fn follow_up_reminder(&self, follow_up: &DiagnosticFollowUp) -> Result<(), NotificationError>;

    fn adherence_alert(
        &self,
        tracking: &AdherenceTracking,
        alert: &AdherenceAlert,
    ) -> Result<(), NotificationError>;
}

/// Logs notifications instead of delivering them.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn follow_up_reminder(&self, follow_up: &DiagnosticFollowUp) -> Result<(), NotificationError> {
        info!(
            follow_up_id = %follow_up.id,
            workplace_id = %follow_up.workplace_id,
            assigned_to = %follow_up.assigned_to,
            scheduled_date = %follow_up.scheduled_date,
            "Follow-up reminder"
        );
        Ok(())
    }

    fn adherence_alert(
        &self,
        tracking: &AdherenceTracking,
        alert: &AdherenceAlert,
    ) -> Result<(), NotificationError> {
        info!(
            tracking_id = %tracking.id,
            workplace_id = %tracking.workplace_id,
            patient_id = %tracking.patient_id,
            severity = ?alert.severity,
            message = %alert.message,
            "Adherence alert"
        );
        Ok(())
    }
}

/// A pending request old enough to need processing again.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaleRequest {
    pub workplace_id: String,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub stale_requests: Vec<StaleRequest>,
    pub timed_out_requests: usize,
    pub missed_follow_ups: usize,
    pub reassessment: ReassessmentSummary,
    pub reminders_sent: usize,
    pub alerts_notified: usize,
}

pub struct MaintenanceService<'a> {
    db: &'a Database,
    sink: &'a dyn NotificationSink,
    stale_after: Duration,
}

impl<'a> MaintenanceService<'a> {
    pub fn new(db: &'a Database, sink: &'a dyn NotificationSink) -> Self {
        Self {
            db,
            sink,
            stale_after: Duration::minutes(DEFAULT_STALE_REQUEST_MINUTES),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Run every sweep in order. Stale pending requests are only reported;
    /// the caller decides whether to reprocess them. Requests stuck in
    /// processing are failed so they can be retried.
    pub fn run(&self, now: DateTime<Utc>) -> WorkflowResult<MaintenanceReport> {
        let cutoff = now - self.stale_after;
        let timed_out_requests = DiagnosticService::new(self.db)
            .fail_stuck_requests(cutoff, now)?
            .len();
        let stale_requests = self
            .db
            .list_stale_pending_requests(cutoff)?
            .into_iter()
            .map(|r| StaleRequest {
                workplace_id: r.workplace_id,
                request_id: r.id,
            })
            .collect();
        let missed_follow_ups = FollowUpService::new(self.db).mark_missed(now)?.len();
        let reassessment = AdherenceService::new(self.db).reassess_due(now)?;
        let reminders_sent = self.send_follow_up_reminders(now)?;
        let alerts_notified = self.notify_adherence_alerts(now)?;

        let report = MaintenanceReport {
            stale_requests,
            timed_out_requests,
            missed_follow_ups,
            reassessment,
            reminders_sent,
            alerts_notified,
        };
        info!(
            stale = report.stale_requests.len(),
            timed_out = report.timed_out_requests,
            missed = report.missed_follow_ups,
            reassessed = report.reassessment.reassessed,
            reminders = report.reminders_sent,
            alerts = report.alerts_notified,
            "Maintenance run finished"
        );
        Ok(report)
    }

    /// Remind assignees of follow-ups due in the next day. Each reminder is
    /// stamped first, so a failed delivery is not retried.
    pub fn send_follow_up_reminders(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let until = now + Duration::hours(REMINDER_WINDOW_HOURS);
        let mut sent = 0;
        for follow_up in self.db.list_reminders_due(now, until)? {
            if !self.db.mark_reminder_sent(&follow_up.id, now)? {
                continue;
            }
            match self.sink.follow_up_reminder(&follow_up) {
                Ok(()) => sent += 1,
                Err(e) => warn!(follow_up_id = %follow_up.id, error = %e, "Reminder delivery failed"),
            }
        }
        Ok(sent)
    }

    /// Notify unacknowledged high and critical adherence alerts once.
    pub fn notify_adherence_alerts(&self, now: DateTime<Utc>) -> Result<usize, DbError> {
        let mut notified = 0;
        for mut tracking in self.db.list_trackings_with_unnotified_alerts()? {
            let due: Vec<usize> = tracking
                .alerts
                .iter()
                .enumerate()
                .filter(|(_, a)| {
                    a.notified_at.is_none()
                        && !a.acknowledged
                        && !a.resolved
                        && a.severity >= AlertSeverity::High
                })
                .map(|(i, _)| i)
                .collect();
            if due.is_empty() {
                continue;
            }

            let expected = tracking.updated_at;
            for &i in &due {
                tracking.alerts[i].notified_at = Some(now);
            }
            tracking.updated_at = now;
            match self.db.update_tracking(&tracking, &expected) {
                Ok(()) => {}
                Err(DbError::Conflict(_)) => {
                    warn!(tracking_id = %tracking.id, "Tracking changed before alerts were claimed, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            }

            for &i in &due {
                match self.sink.adherence_alert(&tracking, &tracking.alerts[i]) {
                    Ok(()) => notified += 1,
                    Err(e) => warn!(tracking_id = %tracking.id, error = %e, "Alert delivery failed"),
                }
            }
        }
        Ok(notified)
    }
}
