use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};

use crate::model::*;

use super::policy::{governing_window, legal_windows};
use super::{ConflictReason, ValidationError};

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Current wall clock shifted into the organization's timezone. Stored
/// times are naive-local; this is the only place UTC enters the picture.
pub fn now_local(utc_offset_minutes: i32) -> NaiveDateTime {
    let utc = chrono::DateTime::from_timestamp_millis(now_ms())
        .expect("system clock in range")
        .naive_utc();
    utc + Duration::minutes(utc_offset_minutes as i64)
}

fn minute_to_time(minute: Minute) -> NaiveTime {
    NaiveTime::from_hms_opt(minute as u32 / 60, minute as u32 % 60, 0)
        .expect("minute-of-day in range")
}

/// Shape checks that don't depend on other bookings: slot within the day,
/// positive length matching the room's session duration, party size in
/// the room's bounds.
pub(crate) fn validate_booking_shape(
    room: &Room,
    slot: &Slot,
    players: u32,
) -> Result<(), ValidationError> {
    if slot.start < 0 || slot.end > MINUTES_PER_DAY || slot.is_empty() {
        return Err(ValidationError::BadSlot(*slot));
    }
    if slot.duration_minutes() != room.duration_minutes {
        return Err(ValidationError::DurationMismatch {
            expected: room.duration_minutes,
            got: slot.duration_minutes(),
        });
    }
    if players < room.min_players || players > room.max_players {
        return Err(ValidationError::PlayersOutOfRange {
            players,
            min: room.min_players,
            max: room.max_players,
        });
    }
    Ok(())
}

/// Advance-window rules: a booking must start at least `min_advance_hours`
/// from now and its date must lie within `advance_booking_days` of today.
pub fn check_advance_window(
    room: &Room,
    date: NaiveDate,
    start: Minute,
    now: NaiveDateTime,
) -> Result<(), ConflictReason> {
    let start_at = date.and_time(minute_to_time(start.clamp(0, MINUTES_PER_DAY - 1)));
    if start_at < now + Duration::hours(room.min_advance_hours as i64) {
        return Err(ConflictReason::TooSoon);
    }
    if date > now.date() + Duration::days(room.advance_booking_days as i64) {
        return Err(ConflictReason::TooFar);
    }
    Ok(())
}

/// Full availability verdict for a candidate slot. Pure read; `reserve`
/// re-runs this under the room's write lock before committing.
///
/// Order matters for the reason code a caller sees: room state, then the
/// advance window, then operating hours, then capacity.
pub fn evaluate_slot(
    rs: &RoomState,
    date: NaiveDate,
    slot: &Slot,
    exclude: Option<ulid::Ulid>,
    now: NaiveDateTime,
) -> Result<(), ConflictReason> {
    if !rs.room.accepts_bookings() {
        return Err(ConflictReason::RoomUnavailable);
    }
    check_advance_window(&rs.room, date, slot.start, now)?;

    let windows = legal_windows(rs, date);
    let Some(window) = governing_window(&windows, slot) else {
        return Err(ConflictReason::OutsideHours);
    };

    let overlapping = rs
        .bookings_on(date)
        .iter()
        .filter(|b| b.status.is_active())
        .filter(|b| exclude != Some(b.id))
        .filter(|b| b.slot.overlaps(slot))
        .count();
    if overlapping as u32 >= window.max_concurrent {
        return Err(ConflictReason::CapacityExceeded);
    }
    Ok(())
}
