use crate::model::*;

use super::LifecycleError;

/// Apply a status transition. The legal edges:
///
/// ```text
/// pending   -> confirmed | cancelled
/// confirmed -> completed | cancelled | no_show
/// ```
///
/// Terminal timestamps are written exactly once, here. Requesting the
/// current status again fails with `AlreadyInState` and mutates nothing,
/// so a repeated cancel cannot move `cancelled_at`.
pub fn transition_status(
    booking: &mut Booking,
    to: BookingStatus,
    at: Ms,
    reason: Option<String>,
) -> Result<(), LifecycleError> {
    use BookingStatus::*;

    let from = booking.status;
    if from == to {
        return Err(LifecycleError::AlreadyInState(from.as_str()));
    }

    match (from, to) {
        (Pending, Confirmed) => {
            booking.confirmed_at = Some(at);
        }
        (Pending | Confirmed, Cancelled) => {
            booking.cancelled_at = Some(at);
            booking.cancellation_reason = reason;
        }
        (Confirmed, Completed) => {
            booking.completed_at = Some(at);
        }
        (Confirmed, NoShow) => {}
        _ => {
            return Err(LifecycleError::IllegalTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
    }

    booking.status = to;
    Ok(())
}

/// Payment status is tracked independently of the booking status:
///
/// ```text
/// pending -> paid | failed
/// failed  -> paid
/// paid    -> refunded
/// ```
pub fn transition_payment(
    booking: &mut Booking,
    to: PaymentStatus,
    at: Ms,
) -> Result<(), LifecycleError> {
    use PaymentStatus::*;

    let from = booking.payment_status;
    if from == to {
        return Err(LifecycleError::AlreadyInState(from.as_str()));
    }

    match (from, to) {
        (Pending | Failed, Paid) => {
            booking.paid_at = Some(at);
        }
        (Pending, Failed) => {}
        (Paid, Refunded) => {}
        _ => {
            return Err(LifecycleError::IllegalTransition {
                from: from.as_str(),
                to: to.as_str(),
            });
        }
    }

    booking.payment_status = to;
    Ok(())
}
