//! Tenant context and per-workspace settings.

use serde::{Deserialize, Serialize};

/// Default overall adherence score below which an alert is raised.
pub const DEFAULT_ADHERENCE_THRESHOLD: f64 = 70.0;

/// Caller role as supplied by the authentication layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Pharmacist,
    Owner,
    SuperAdmin,
}

impl UserRole {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pharmacist" => Some(UserRole::Pharmacist),
            "owner" => Some(UserRole::Owner),
            "super_admin" => Some(UserRole::SuperAdmin),
            _ => None,
        }
    }
}

/// Identity of the caller and the workspace every query is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceContext {
    pub user_id: String,
    /// `None` only for super-admins acting outside a workspace
    pub workplace_id: Option<String>,
    pub role: UserRole,
}

impl WorkspaceContext {
    pub fn pharmacist(user_id: impl Into<String>, workplace_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            workplace_id: Some(workplace_id.into()),
            role: UserRole::Pharmacist,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == UserRole::SuperAdmin
    }
}

/// Tenant-configurable workflow settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSettings {
    pub workplace_id: String,
    pub adherence_threshold: f64,
    /// Plan gate for AI-assisted diagnostics
    pub ai_diagnostics_enabled: bool,
    /// Diagnostic requests allowed per calendar month; `None` is unlimited
    pub monthly_diagnostic_limit: Option<u32>,
}

impl WorkspaceSettings {
    pub fn defaults_for(workplace_id: impl Into<String>) -> Self {
        Self {
            workplace_id: workplace_id.into(),
            adherence_threshold: DEFAULT_ADHERENCE_THRESHOLD,
            ai_diagnostics_enabled: true,
            monthly_diagnostic_limit: None,
        }
    }
}
