// ── Core error types ──
//
// Errors surfaced by autoarm-core. Trigger handlers never propagate these;
// they are logged and counted. Only validation during setup and the
// explicit service calls return them to a caller.

use thiserror::Error;

use crate::condition::ConditionError;

/// Failure reported by a host-platform port.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    #[error("Entity not found: {entity_id}")]
    EntityNotFound { entity_id: String },

    #[error("State write rejected for {entity_id}: {reason}")]
    WriteRejected { entity_id: String, reason: String },

    #[error("Calendar {calendar} unavailable: {reason}")]
    CalendarUnavailable { calendar: String, reason: String },

    #[error("Notification via {action} failed: {reason}")]
    NotifyFailed { action: String, reason: String },

    #[error("Host unavailable: {message}")]
    Unavailable { message: String },
}

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid pattern {pattern:?} for {state}: {reason}")]
    InvalidPattern {
        state: String,
        pattern: String,
        reason: String,
    },

    // ── Evaluation errors ────────────────────────────────────────────
    #[error(transparent)]
    Condition(#[from] ConditionError),

    // ── Host errors ──────────────────────────────────────────────────
    #[error(transparent)]
    Host(#[from] HostError),

    #[error("Calendar {calendar}: {message}")]
    Calendar { calendar: String, message: String },

    // ── Lifecycle errors ─────────────────────────────────────────────
    #[error("Engine is not running")]
    NotRunning,

    #[error("Internal error: {0}")]
    Internal(String),
}
