use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::{Minute, Slot};

/// Why a candidate slot cannot be reserved. Stable codes surfaced to
/// callers so they can pick user-facing copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictReason {
    OutsideHours,
    CapacityExceeded,
    TooSoon,
    TooFar,
    RoomUnavailable,
}

impl ConflictReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictReason::OutsideHours => "outside_hours",
            ConflictReason::CapacityExceeded => "capacity_exceeded",
            ConflictReason::TooSoon => "too_soon",
            ConflictReason::TooFar => "too_far",
            ConflictReason::RoomUnavailable => "room_unavailable",
        }
    }
}

/// Malformed input — the caller can always recover by correcting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    BadSlot(Slot),
    DurationMismatch { expected: Minute, got: Minute },
    PlayersOutOfRange { players: u32, min: u32, max: u32 },
    EmptyField(&'static str),
    InvalidValue(&'static str),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::BadSlot(slot) => {
                write!(f, "bad slot [{}, {})", slot.start, slot.end)
            }
            ValidationError::DurationMismatch { expected, got } => {
                write!(f, "slot duration {got} does not match room duration {expected}")
            }
            ValidationError::PlayersOutOfRange { players, min, max } => {
                write!(f, "{players} players outside room range [{min}, {max}]")
            }
            ValidationError::EmptyField(field) => write!(f, "{field} must not be empty"),
            ValidationError::InvalidValue(msg) => write!(f, "{msg}"),
        }
    }
}

/// A rejected status/payment transition. `AlreadyInState` is reported
/// separately from an illegal jump so callers can tell a repeated call
/// apart from a real mistake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    AlreadyInState(&'static str),
    IllegalTransition {
        from: &'static str,
        to: &'static str,
    },
}

impl std::fmt::Display for LifecycleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleError::AlreadyInState(state) => write!(f, "already {state}"),
            LifecycleError::IllegalTransition { from, to } => {
                write!(f, "illegal transition {from} -> {to}")
            }
        }
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    Validation(ValidationError),
    Conflict {
        room_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        reason: ConflictReason,
    },
    Lifecycle {
        booking_id: Ulid,
        error: LifecycleError,
    },
    RoomHasBookings(Ulid),
    LimitExceeded(&'static str),
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Validation(e) => write!(f, "validation: {e}"),
            EngineError::Conflict {
                room_id,
                date,
                slot,
                reason,
            } => {
                write!(
                    f,
                    "room {room_id} unavailable on {date} [{}, {}): {}",
                    slot.start,
                    slot.end,
                    reason.as_str()
                )
            }
            EngineError::Lifecycle { booking_id, error } => {
                write!(f, "booking {booking_id}: {error}")
            }
            EngineError::RoomHasBookings(id) => {
                write!(f, "cannot delete room {id}: bookings exist")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
