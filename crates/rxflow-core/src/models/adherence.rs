//! Medication adherence tracking, scoring and alerting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Medication scores below this are "poor" and raise a low-adherence alert.
pub const POOR_MEDICATION_SCORE: f64 = 70.0;

/// Reported missed doses at or above this raise a missed-doses alert.
pub const MISSED_DOSE_ALERT_COUNT: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdherenceStatus {
    Adherent,
    PartiallyAdherent,
    NonAdherent,
    Unknown,
}

impl AdherenceStatus {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            AdherenceStatus::Adherent
        } else if score >= 50.0 {
            AdherenceStatus::PartiallyAdherent
        } else {
            AdherenceStatus::NonAdherent
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdherenceCategory {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl AdherenceCategory {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            AdherenceCategory::Excellent
        } else if score >= 80.0 {
            AdherenceCategory::Good
        } else if score >= 70.0 {
            AdherenceCategory::Fair
        } else {
            AdherenceCategory::Poor
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringFrequency {
    Daily,
    #[default]
    Weekly,
    Biweekly,
    Monthly,
}

impl MonitoringFrequency {
    pub fn interval(&self) -> Duration {
        match self {
            MonitoringFrequency::Daily => Duration::days(1),
            MonitoringFrequency::Weekly => Duration::days(7),
            MonitoringFrequency::Biweekly => Duration::days(14),
            MonitoringFrequency::Monthly => Duration::days(30),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum RefillSource {
    #[default]
    Pharmacy,
    PatientReport,
    Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefillRecord {
    pub date: DateTime<Utc>,
    pub days_supply: u32,
    pub quantity: f64,
    #[serde(default)]
    pub source: RefillSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MedicationAdherence {
    pub medication_name: String,
    #[serde(default)]
    pub dosage: String,
    #[serde(default)]
    pub frequency: String,
    #[serde(default)]
    pub prescribed_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub refill_history: Vec<RefillRecord>,
    #[serde(default)]
    pub last_refill_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub expected_refill_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub missed_doses: u32,
    #[serde(default)]
    pub total_doses: u32,
    /// 0..=100
    pub adherence_score: f64,
    pub adherence_status: AdherenceStatus,
}

impl MedicationAdherence {
    /// A medication with no adherence data yet.
    pub fn new(name: impl Into<String>, dosage: impl Into<String>, frequency: impl Into<String>) -> Self {
        Self {
            medication_name: name.into(),
            dosage: dosage.into(),
            frequency: frequency.into(),
            prescribed_date: None,
            refill_history: Vec::new(),
            last_refill_date: None,
            expected_refill_date: None,
            missed_doses: 0,
            total_doses: 0,
            adherence_score: 100.0,
            adherence_status: AdherenceStatus::Unknown,
        }
    }

    /// Append a refill and move the refill dates forward.
    pub fn record_refill(&mut self, refill: RefillRecord) {
        let is_latest = self.last_refill_date.map_or(true, |last| refill.date >= last);
        if is_latest {
            self.last_refill_date = Some(refill.date);
            self.expected_refill_date = Some(refill.date + Duration::days(refill.days_supply as i64));
        }
        self.refill_history.push(refill);
        self.refill_history.sort_by_key(|r| r.date);
    }

    /// Recompute the score from refills, then dose counts. Without either, the
    /// assessed score is kept.
    pub fn recompute_score(&mut self, now: DateTime<Utc>) {
        if let Some(first) = self.refill_history.first() {
            let observed_days = (now - first.date).num_days().max(1) as f64;
            let supplied: f64 = self.refill_history.iter().map(|r| r.days_supply as f64).sum();
            self.adherence_score = round1((supplied / observed_days).min(1.0) * 100.0);
        } else if self.total_doses > 0 {
            let taken = self.total_doses.saturating_sub(self.missed_doses) as f64;
            self.adherence_score = round1(taken / self.total_doses as f64 * 100.0);
        }
        self.adherence_score = self.adherence_score.clamp(0.0, 100.0);
        self.adherence_status = AdherenceStatus::from_score(self.adherence_score);
    }

    /// Days past the expected refill date, if overdue.
    pub fn days_overdue(&self, now: DateTime<Utc>) -> Option<i64> {
        let expected = self.expected_refill_date?;
        if now > expected {
            Some((now - expected).num_days())
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    RefillOverdue,
    LowAdherence,
    MissedDoses,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceAlert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub message: String,
    pub medication_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub action_taken: Option<String>,
    pub resolved: bool,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// Set once a notification has been dispatched for this alert
    pub notified_at: Option<DateTime<Utc>>,
}

impl AdherenceAlert {
    fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        medication_name: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alert_type,
            severity,
            message,
            medication_name,
            created_at: now,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            action_taken: None,
            resolved: false,
            resolved_by: None,
            resolved_at: None,
            notified_at: None,
        }
    }

    /// Returns false when the alert was already acknowledged.
    pub fn acknowledge(&mut self, by: &str, action: Option<String>, now: DateTime<Utc>) -> bool {
        if self.acknowledged {
            return false;
        }
        self.acknowledged = true;
        self.acknowledged_by = Some(by.to_string());
        self.acknowledged_at = Some(now);
        self.action_taken = action;
        true
    }

    /// Returns false when the alert was already resolved.
    pub fn resolve(&mut self, by: &str, now: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_by = Some(by.to_string());
        self.resolved_at = Some(now);
        true
    }
}

/// A pharmacist action recorded against the tracking record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceIntervention {
    pub kind: String,
    pub description: String,
    pub recorded_by: String,
    pub recorded_at: DateTime<Utc>,
}

/// Adherence record for one patient in one workspace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdherenceTracking {
    pub id: String,
    pub workplace_id: String,
    pub patient_id: String,
    pub medications: Vec<MedicationAdherence>,
    /// Derived from `medications`; see [`AdherenceTracking::calculate_overall_adherence`]
    pub overall_adherence_score: f64,
    pub adherence_category: AdherenceCategory,
    pub monitoring_frequency: MonitoringFrequency,
    pub next_assessment_date: DateTime<Utc>,
    pub last_assessment_date: Option<DateTime<Utc>>,
    pub alerts: Vec<AdherenceAlert>,
    pub interventions: Vec<AdherenceIntervention>,
    pub created_by: String,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdherenceTracking {
    pub fn new(
        workplace_id: String,
        patient_id: String,
        medications: Vec<MedicationAdherence>,
        monitoring_frequency: MonitoringFrequency,
        created_by: String,
    ) -> Self {
        let now = Utc::now();
        let mut tracking = Self {
            id: uuid::Uuid::new_v4().to_string(),
            workplace_id,
            patient_id,
            medications,
            overall_adherence_score: 0.0,
            adherence_category: AdherenceCategory::Poor,
            monitoring_frequency,
            next_assessment_date: now + monitoring_frequency.interval(),
            last_assessment_date: None,
            alerts: Vec::new(),
            interventions: Vec::new(),
            created_by,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        tracking.refresh_overall();
        tracking
    }

    /// Mean of the medication scores, rounded to one decimal; 0 with no medications.
    pub fn calculate_overall_adherence(&self) -> f64 {
        if self.medications.is_empty() {
            return 0.0;
        }
        let total: f64 = self.medications.iter().map(|m| m.adherence_score).sum();
        round1(total / self.medications.len() as f64)
    }

    fn refresh_overall(&mut self) {
        self.overall_adherence_score = self.calculate_overall_adherence();
        self.adherence_category = AdherenceCategory::from_score(self.overall_adherence_score);
    }

    pub fn medication_mut(&mut self, name: &str) -> Option<&mut MedicationAdherence> {
        self.medications
            .iter_mut()
            .find(|m| m.medication_name.eq_ignore_ascii_case(name))
    }

    pub fn alert_mut(&mut self, alert_id: &str) -> Option<&mut AdherenceAlert> {
        self.alerts.iter_mut().find(|a| a.id == alert_id)
    }

    pub fn open_alerts(&self) -> impl Iterator<Item = &AdherenceAlert> {
        self.alerts.iter().filter(|a| !a.resolved)
    }

    /// Recompute every score, then raise any alerts now warranted.
    /// Returns the number of alerts added.
    pub fn reassess(&mut self, now: DateTime<Utc>, threshold: f64) -> usize {
        for medication in &mut self.medications {
            medication.recompute_score(now);
        }
        self.refresh_overall();
        self.last_assessment_date = Some(now);
        self.next_assessment_date = now + self.monitoring_frequency.interval();
        self.updated_at = now;
        self.evaluate_alerts(now, threshold)
    }

    /// Raise a missed-doses alert for `name` from freshly reported dose data.
    /// Scheduled reassessments never call this, so a resolved alert stays
    /// resolved until new counts arrive.
    pub fn check_missed_doses(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        let Some(medication) = self
            .medications
            .iter()
            .find(|m| m.medication_name.eq_ignore_ascii_case(name))
        else {
            return false;
        };
        if medication.missed_doses < MISSED_DOSE_ALERT_COUNT {
            return false;
        }
        let message = format!("{} missed dose(s) of {}", medication.missed_doses, medication.medication_name);
        let medication_name = medication.medication_name.clone();
        self.raise(AlertType::MissedDoses, AlertSeverity::Medium, message, Some(medication_name), now)
    }

    fn has_open_alert(&self, alert_type: AlertType, medication: Option<&str>) -> bool {
        self.open_alerts()
            .any(|a| a.alert_type == alert_type && a.medication_name.as_deref() == medication)
    }

    fn raise(
        &mut self,
        alert_type: AlertType,
        severity: AlertSeverity,
        message: String,
        medication: Option<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.has_open_alert(alert_type, medication.as_deref()) {
            return false;
        }
        self.alerts
            .push(AdherenceAlert::new(alert_type, severity, message, medication, now));
        true
    }

    fn evaluate_alerts(&mut self, now: DateTime<Utc>, threshold: f64) -> usize {
        let mut pending = Vec::new();

        for medication in &self.medications {
            let name = medication.medication_name.clone();

            if let Some(days) = medication.days_overdue(now) {
                let severity = if days > 14 {
                    AlertSeverity::Critical
                } else if days > 7 {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                };
                pending.push((
                    AlertType::RefillOverdue,
                    severity,
                    format!("{} refill overdue by {} day(s)", name, days),
                    Some(name.clone()),
                ));
            }

            if medication.adherence_score < POOR_MEDICATION_SCORE {
                let severity = if medication.adherence_score < 50.0 {
                    AlertSeverity::High
                } else {
                    AlertSeverity::Medium
                };
                pending.push((
                    AlertType::LowAdherence,
                    severity,
                    format!("{} adherence at {:.1}%", name, medication.adherence_score),
                    Some(name.clone()),
                ));
            }

        }

        if !self.medications.is_empty() && self.overall_adherence_score < threshold {
            pending.push((
                AlertType::LowAdherence,
                AlertSeverity::High,
                format!(
                    "Overall adherence {:.1}% is below the {:.0}% threshold",
                    self.overall_adherence_score, threshold
                ),
                None,
            ));
        }

        pending
            .into_iter()
            .filter(|(alert_type, severity, message, medication)| {
                self.raise(*alert_type, *severity, message.clone(), medication.clone(), now)
            })
            .count()
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
