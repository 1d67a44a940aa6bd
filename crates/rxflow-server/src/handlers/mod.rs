//! Route handlers, one module per resource.

pub mod adherence;
pub mod audit;
pub mod diagnostics;
pub mod follow_ups;
pub mod health;
pub mod interventions;
pub mod patients;
pub mod workspace;

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Optional reporting window from the query string.
#[derive(Debug, Default, Deserialize)]
pub struct WindowQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}
