use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::StayRange;

/// Why a unit cannot take a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailability {
    Locked,
    Overlaps { reservation_id: Ulid, range: StayRange },
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidRange {
        check_in: NaiveDate,
        check_out: NaiveDate,
    },
    UnitUnavailable {
        unit_id: Ulid,
        reason: Unavailability,
    },
    InvalidTransition {
        entity: &'static str,
        id: Ulid,
        state: &'static str,
        action: &'static str,
    },
    /// Lost a race for the unit; safe to retry.
    Conflict(Ulid),
    Validation(String),
    Forbidden {
        actor: String,
        action: &'static str,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        EngineError::Validation(msg.into())
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidRange { check_in, check_out } => {
                write!(f, "invalid date range: check-out {check_out} must be after check-in {check_in}")
            }
            EngineError::UnitUnavailable { unit_id, reason } => match reason {
                Unavailability::Locked => write!(f, "unit {unit_id} is locked"),
                Unavailability::Overlaps { reservation_id, range } => write!(
                    f,
                    "unit {unit_id} is already booked for {range} by reservation {reservation_id}"
                ),
            },
            EngineError::InvalidTransition {
                entity,
                id,
                state,
                action,
            } => write!(f, "cannot {action} {entity} {id} while it is {state}"),
            EngineError::Conflict(id) => {
                write!(f, "concurrent update on unit {id}, retry the request")
            }
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::Forbidden { actor, action } => {
                write!(f, "{actor} is not allowed to {action}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
