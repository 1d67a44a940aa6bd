//! Shared error type for status state machines.

use thiserror::Error;

/// A status change that the entity's state machine does not allow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} {entity} in status '{from}'")]
    Invalid {
        entity: &'static str,
        from: &'static str,
        action: &'static str,
    },

    #[error("retry limit reached ({retry_count} of {max} attempts used)")]
    RetryLimit { retry_count: u32, max: u32 },

    #[error("cannot {action} {entity}: {reason}")]
    Precondition {
        entity: &'static str,
        action: &'static str,
        reason: &'static str,
    },
}
