use chrono::NaiveDate;

use crate::model::*;

/// Per-player rate for `(room, date)`. Precedence: exception price, then
/// holiday price, then weekend price, then base. Holiday/weekend rates only
/// apply when the room configures them.
pub fn select_rate(
    room: &Room,
    date: NaiveDate,
    exception_price: Option<Cents>,
    calendar: &OrgCalendar,
) -> Cents {
    if let Some(price) = exception_price {
        return price;
    }
    if calendar.is_holiday(date)
        && let Some(price) = room.holiday_price_cents
    {
        return price;
    }
    if calendar.is_weekend(date)
        && let Some(price) = room.weekend_price_cents
    {
        return price;
    }
    room.base_price_cents
}

/// Full price breakdown. Integer cents throughout; the group discount
/// truncates toward zero at the cent boundary (9.999 € of discount is
/// 999 cents, never 1000). Tax is passed through untouched.
pub fn quote(
    room: &Room,
    date: NaiveDate,
    players: u32,
    exception_price: Option<Cents>,
    calendar: &OrgCalendar,
    tax_cents: Cents,
) -> PriceBreakdown {
    let rate_cents = select_rate(room, date, exception_price, calendar);

    let discount_cents = match room.group_discount_threshold {
        Some(threshold) if players >= threshold && room.group_discount_percent > 0 => {
            rate_cents * room.group_discount_percent as Cents / 100
        }
        _ => 0,
    };

    PriceBreakdown {
        rate_cents,
        discount_cents,
        tax_cents,
        total_cents: rate_cents - discount_cents + tax_cents,
    }
}
