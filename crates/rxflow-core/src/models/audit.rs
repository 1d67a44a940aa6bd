//! Hash-chained audit events.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// `prev_hash` of the first event in a workspace chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    PatientCreated,
    SettingsUpdated,
    RequestCreated,
    RequestProcessingStarted,
    RequestCompleted,
    RequestFailed,
    RequestRetried,
    RequestCancelled,
    RequestDeleted,
    ReviewSubmitted,
    InterventionCreated,
    InterventionUpdated,
    FollowUpCreated,
    FollowUpStarted,
    FollowUpCompleted,
    FollowUpRescheduled,
    FollowUpCancelled,
    FollowUpMissed,
    AdherenceCreated,
    AdherenceUpdated,
    AdherenceAlertAcknowledged,
    AdherenceAlertResolved,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PatientCreated => "patient_created",
            AuditAction::SettingsUpdated => "settings_updated",
            AuditAction::RequestCreated => "request_created",
            AuditAction::RequestProcessingStarted => "request_processing_started",
            AuditAction::RequestCompleted => "request_completed",
            AuditAction::RequestFailed => "request_failed",
            AuditAction::RequestRetried => "request_retried",
            AuditAction::RequestCancelled => "request_cancelled",
            AuditAction::RequestDeleted => "request_deleted",
            AuditAction::ReviewSubmitted => "review_submitted",
            AuditAction::InterventionCreated => "intervention_created",
            AuditAction::InterventionUpdated => "intervention_updated",
            AuditAction::FollowUpCreated => "follow_up_created",
            AuditAction::FollowUpStarted => "follow_up_started",
            AuditAction::FollowUpCompleted => "follow_up_completed",
            AuditAction::FollowUpRescheduled => "follow_up_rescheduled",
            AuditAction::FollowUpCancelled => "follow_up_cancelled",
            AuditAction::FollowUpMissed => "follow_up_missed",
            AuditAction::AdherenceCreated => "adherence_created",
            AuditAction::AdherenceUpdated => "adherence_updated",
            AuditAction::AdherenceAlertAcknowledged => "adherence_alert_acknowledged",
            AuditAction::AdherenceAlertResolved => "adherence_alert_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        serde_json::from_value(serde_json::Value::String(s.to_string())).ok()
    }
}

/// What an event is about, before it is placed on the chain.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub workplace_id: String,
    pub actor_id: String,
    pub action: AuditAction,
    pub entity_type: &'static str,
    pub entity_id: String,
    pub details: serde_json::Value,
}

impl AuditEntry {
    pub fn new(
        workplace_id: &str,
        actor_id: &str,
        action: AuditAction,
        entity_type: &'static str,
        entity_id: &str,
    ) -> Self {
        Self {
            workplace_id: workplace_id.to_string(),
            actor_id: actor_id.to_string(),
            action,
            entity_type,
            entity_id: entity_id.to_string(),
            details: serde_json::Value::Null,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub sequence: i64,
    pub id: String,
    pub workplace_id: String,
    pub actor_id: String,
    pub action: AuditAction,
    pub entity_type: String,
    pub entity_id: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

/// The hashed portion of an event. Field order is fixed and `details`
/// objects serialize with sorted keys.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    id: &'a str,
    workplace_id: &'a str,
    actor_id: &'a str,
    action: &'a str,
    entity_type: &'a str,
    entity_id: &'a str,
    details: &'a serde_json::Value,
    created_at: String,
}

impl AuditEvent {
    /// Seal an entry onto a chain whose head is `prev_hash`.
    pub fn seal(entry: AuditEntry, sequence: i64, prev_hash: String) -> Result<Self, serde_json::Error> {
        let mut event = Self {
            sequence,
            id: uuid::Uuid::new_v4().to_string(),
            workplace_id: entry.workplace_id,
            actor_id: entry.actor_id,
            action: entry.action,
            entity_type: entry.entity_type.to_string(),
            entity_id: entry.entity_id,
            details: entry.details,
            // stored at microsecond precision
            created_at: Utc::now().trunc_subsecs(6),
            prev_hash,
            hash: String::new(),
        };
        event.hash = event.compute_hash()?;
        Ok(event)
    }

    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let body = EventBody {
            id: &self.id,
            workplace_id: &self.workplace_id,
            actor_id: &self.actor_id,
            action: self.action.as_str(),
            entity_type: &self.entity_type,
            entity_id: &self.entity_id,
            details: &self.details,
            created_at: self.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        };
        let canonical = serde_json::to_string(&body)?;

        let mut hasher = Sha256::new();
        hasher.update(self.prev_hash.as_bytes());
        hasher.update(canonical.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }
}

/// Outcome of walking a workspace's audit chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChainVerification {
    pub valid: bool,
    pub events_checked: usize,
    pub head_hash: String,
    /// Sequence of the first event whose link or hash does not match
    pub first_broken_sequence: Option<i64>,
}

/// Check that each event links to its predecessor and hashes to its stored value.
pub fn verify_events(events: &[AuditEvent]) -> ChainVerification {
    let mut expected_prev = GENESIS_HASH.to_string();

    for event in events {
        let intact = event.prev_hash == expected_prev
            && event.compute_hash().map(|h| h == event.hash).unwrap_or(false);
        if !intact {
            return ChainVerification {
                valid: false,
                events_checked: events.len(),
                head_hash: expected_prev,
                first_broken_sequence: Some(event.sequence),
            };
        }
        expected_prev = event.hash.clone();
    }

    ChainVerification {
        valid: true,
        events_checked: events.len(),
        head_hash: expected_prev,
        first_broken_sequence: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(n: usize) -> Vec<AuditEvent> {
        let mut prev = GENESIS_HASH.to_string();
        (0..n)
            .map(|i| {
                let entry = AuditEntry::new("ws-1", "pharm-1", AuditAction::RequestCreated, "diagnostic_request", &format!("req-{}", i))
                    .with_details(json!({"priority": "routine", "attempt": i}));
                let event = AuditEvent::seal(entry, i as i64 + 1, prev.clone()).unwrap();
                prev = event.hash.clone();
                event
            })
            .collect()
    }

    #[test]
    fn test_intact_chain_verifies() {
        let events = chain(4);
        let result = verify_events(&events);
        assert!(result.valid);
        assert_eq!(result.events_checked, 4);
        assert_eq!(result.head_hash, events[3].hash);
    }

    #[test]
    fn test_tampered_details_break_chain() {
        let mut events = chain(3);
        events[1].details = json!({"priority": "stat"});
        let result = verify_events(&events);
        assert!(!result.valid);
        assert_eq!(result.first_broken_sequence, Some(2));
    }

    #[test]
    fn test_action_strings_round_trip() {
        assert_eq!(
            AuditAction::parse(AuditAction::FollowUpRescheduled.as_str()),
            Some(AuditAction::FollowUpRescheduled)
        );
        assert_eq!(AuditAction::parse("drafted"), None);
    }
}
