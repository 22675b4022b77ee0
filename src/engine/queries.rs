use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_advance_window, evaluate_slot, now_local};
use super::error::ValidationError;
use super::policy::free_windows;
use super::{Engine, EngineError, pricing};

/// Filters for the booking listing; all optional, all ANDed.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingFilter {
    pub room_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub status: Option<BookingStatus>,
}

impl Engine {
    pub fn list_rooms(&self) -> Vec<Room> {
        let mut rooms: Vec<Room> = self
            .state
            .iter()
            .map(|entry| {
                let rs = entry.value().clone();
                let guard = rs.try_read().expect("list_rooms: uncontended read");
                guard.room.clone()
            })
            .collect();
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        rooms
    }

    /// Bookings across the organization, newest date first.
    pub async fn list_bookings(&self, filter: BookingFilter) -> Vec<Booking> {
        let room_ids: Vec<Ulid> = match filter.room_id {
            Some(id) => vec![id],
            None => self.state.iter().map(|e| *e.key()).collect(),
        };

        let mut out = Vec::new();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            let matching = match filter.date {
                Some(date) => guard.bookings_on(date),
                None => &guard.bookings[..],
            };
            out.extend(
                matching
                    .iter()
                    .filter(|b| filter.status.is_none_or(|s| b.status == s))
                    .cloned(),
            );
        }

        out.sort_by(|a, b| (b.date, b.slot.start).cmp(&(a.date, a.slot.start)));
        out
    }

    /// Free sub-windows for `(room, date)`. Unknown rooms read as fully
    /// booked rather than erroring, matching the listing semantics.
    pub async fn availability(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        min_duration: Option<Minute>,
    ) -> Result<Vec<Slot>, EngineError> {
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(Vec::new()),
        };
        let guard = rs.read().await;
        Ok(free_windows(&guard, date, min_duration))
    }

    /// The pure availability verdict for one candidate slot.
    pub async fn slot_check(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        exclude: Option<Ulid>,
    ) -> Result<SlotCheck, EngineError> {
        if slot.start < 0 || slot.end > MINUTES_PER_DAY || slot.is_empty() {
            return Err(EngineError::Validation(ValidationError::BadSlot(slot)));
        }
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let now = self.org_now().await;
        Ok(match evaluate_slot(&guard, date, &slot, exclude, now) {
            Ok(()) => SlotCheck {
                available: true,
                reason: None,
            },
            Err(reason) => SlotCheck {
                available: false,
                reason: Some(reason),
            },
        })
    }

    /// Price a hypothetical booking without reserving anything.
    pub async fn quote_price(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        players: u32,
    ) -> Result<PriceBreakdown, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        if players < guard.room.min_players || players > guard.room.max_players {
            return Err(EngineError::Validation(ValidationError::PlayersOutOfRange {
                players,
                min: guard.room.min_players,
                max: guard.room.max_players,
            }));
        }
        let calendar = self.calendar.read().await;
        let exception_price = guard.exception_on(date).and_then(|e| e.price_cents);
        Ok(pricing::quote(
            &guard.room,
            date,
            players,
            exception_price,
            &calendar,
            0,
        ))
    }

    /// Bookable start slots for `(room, date, players)`, half-hour aligned
    /// within the free windows, each carrying its quoted total.
    pub async fn recommendations(
        &self,
        room_id: Ulid,
        date: NaiveDate,
        players: u32,
    ) -> Result<Vec<Recommendation>, EngineError> {
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.read().await;
        let room = &guard.room;
        if players < room.min_players || players > room.max_players {
            return Err(EngineError::Validation(ValidationError::PlayersOutOfRange {
                players,
                min: room.min_players,
                max: room.max_players,
            }));
        }
        if !room.accepts_bookings() {
            return Ok(Vec::new());
        }

        let calendar = self.calendar.read().await.clone();
        let now = now_local(calendar.utc_offset_minutes);
        let duration = room.duration_minutes;
        let exception_price = guard.exception_on(date).and_then(|e| e.price_cents);
        let price = pricing::quote(room, date, players, exception_price, &calendar, 0);

        let mut out = Vec::new();
        for free in free_windows(&guard, date, Some(duration)) {
            let mut start = (free.start + 29) / 30 * 30;
            while start + duration <= free.end {
                if check_advance_window(room, date, start, now).is_ok() {
                    out.push(Recommendation {
                        slot: Slot::new(start, start + duration),
                        total_cents: price.total_cents,
                    });
                    if out.len() >= MAX_RECOMMENDATIONS {
                        return Ok(out);
                    }
                }
                start += 30;
            }
        }
        Ok(out)
    }

    /// Organization-wide booking stats, optionally restricted to a date
    /// range (inclusive). Cancelled bookings stay out of revenue and the
    /// average party size.
    pub async fn org_stats(
        &self,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> OrgStats {
        let mut stats = OrgStats::default();
        let mut players_sum: u64 = 0;
        let mut players_count: u64 = 0;
        let mut rating_sum: u64 = 0;

        let room_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for rid in room_ids {
            let Some(rs) = self.get_room(&rid) else { continue };
            let guard = rs.read().await;
            for r in &guard.reviews {
                // A review sits in the range when its booking does.
                let Some(b) = guard.booking(r.booking_id) else { continue };
                if from.is_some_and(|f| b.date < f) || to.is_some_and(|t| b.date > t) {
                    continue;
                }
                stats.total_reviews += 1;
                rating_sum += r.rating as u64;
            }
            for b in &guard.bookings {
                if from.is_some_and(|f| b.date < f) || to.is_some_and(|t| b.date > t) {
                    continue;
                }
                stats.total_bookings += 1;
                match b.status {
                    BookingStatus::Pending => stats.pending += 1,
                    BookingStatus::Confirmed => stats.confirmed += 1,
                    BookingStatus::Completed => stats.completed += 1,
                    BookingStatus::Cancelled => stats.cancelled += 1,
                    BookingStatus::NoShow => stats.no_show += 1,
                }
                if b.status != BookingStatus::Cancelled {
                    players_sum += b.players as u64;
                    players_count += 1;
                    if b.payment_status == PaymentStatus::Paid {
                        stats.revenue_cents += b.price.total_cents;
                    }
                }
            }
        }

        if players_count > 0 {
            stats.avg_players_x100 = players_sum * 100 / players_count;
        }
        if stats.total_reviews > 0 {
            stats.avg_rating_x100 = rating_sum * 100 / stats.total_reviews;
        }
        stats
    }
}
