use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{evaluate_slot, now_ms, validate_booking_shape};
use super::error::ValidationError;
use super::{Engine, EngineError, lifecycle, pricing};

/// Everything needed to atomically place a booking. The slot end derives
/// from the room's session duration.
#[derive(Debug, Clone)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    pub players: u32,
    pub customer: Customer,
    pub tax_cents: Cents,
}

fn validate_room_config(room: &Room) -> Result<(), EngineError> {
    if room.name.is_empty() {
        return Err(EngineError::Validation(ValidationError::EmptyField("name")));
    }
    if room.name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if room.min_players == 0 || room.min_players > room.max_players {
        return Err(EngineError::Validation(ValidationError::InvalidValue(
            "player bounds must satisfy 0 < min <= max",
        )));
    }
    if room.duration_minutes <= 0 || room.duration_minutes > MINUTES_PER_DAY {
        return Err(EngineError::Validation(ValidationError::InvalidValue(
            "session duration must fit within one day",
        )));
    }
    if room.base_price_cents < 0
        || room.weekend_price_cents.is_some_and(|p| p < 0)
        || room.holiday_price_cents.is_some_and(|p| p < 0)
    {
        return Err(EngineError::Validation(ValidationError::InvalidValue(
            "prices must be non-negative",
        )));
    }
    if room.group_discount_percent > 100 {
        return Err(EngineError::Validation(ValidationError::InvalidValue(
            "discount percent must be at most 100",
        )));
    }
    if room.advance_booking_days > MAX_ADVANCE_DAYS {
        return Err(EngineError::LimitExceeded("advance booking horizon too wide"));
    }
    Ok(())
}

fn validate_day_window(window: &Slot) -> Result<(), EngineError> {
    if window.start < 0 || window.end > MINUTES_PER_DAY || window.is_empty() {
        return Err(EngineError::Validation(ValidationError::BadSlot(*window)));
    }
    Ok(())
}

fn validate_customer(customer: &Customer) -> Result<(), EngineError> {
    if customer.name.is_empty() {
        return Err(EngineError::Validation(ValidationError::EmptyField(
            "customer_name",
        )));
    }
    if customer.email.is_empty() {
        return Err(EngineError::Validation(ValidationError::EmptyField(
            "customer_email",
        )));
    }
    if customer.name.len() > MAX_CUSTOMER_FIELD_LEN
        || customer.email.len() > MAX_CUSTOMER_FIELD_LEN
        || customer.phone.as_ref().is_some_and(|p| p.len() > MAX_CUSTOMER_FIELD_LEN)
    {
        return Err(EngineError::LimitExceeded("customer field too long"));
    }
    Ok(())
}

impl Engine {
    // ── Rooms ────────────────────────────────────────────

    pub async fn create_room(&self, room: Room) -> Result<(), EngineError> {
        validate_room_config(&room)?;
        if self.state.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.state.contains_key(&room.id) {
            return Err(EngineError::AlreadyExists(room.id));
        }

        let event = Event::RoomCreated { room: room.clone() };
        self.wal_append(&event).await?;
        let id = room.id;
        self.state.insert(
            id,
            std::sync::Arc::new(tokio::sync::RwLock::new(RoomState::new(room))),
        );
        self.notify.send(id, &event);
        Ok(())
    }

    pub async fn update_room(&self, id: Ulid, patch: RoomPatch) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let mut patched = guard.room.clone();
        patch.apply(&mut patched);
        validate_room_config(&patched)?;

        let event = Event::RoomUpdated { id, patch };
        self.persist_and_apply(id, &mut guard, &event).await
    }

    /// Rooms with recorded bookings cannot be deleted — booking history is
    /// audit data. Templates and exceptions cascade away with the room.
    pub async fn delete_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.read().await;
        if !guard.bookings.is_empty() {
            return Err(EngineError::RoomHasBookings(id));
        }
        drop(guard);

        let event = Event::RoomDeleted { id };
        self.wal_append(&event).await?;
        self.drop_room_entities(&id);
        self.state.remove(&id);
        self.notify.send(id, &event);
        Ok(())
    }

    // ── Templates & exceptions ───────────────────────────

    pub async fn add_template(&self, template: Template) -> Result<(), EngineError> {
        validate_day_window(&template.window)?;
        if template.max_concurrent == 0 {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "max_concurrent must be at least 1",
            )));
        }
        if template.day_of_week.is_some_and(|d| d > 6) {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "day_of_week must be 0 (Sunday) through 6 (Saturday)",
            )));
        }
        if self.entity_to_room.contains_key(&template.id) {
            return Err(EngineError::AlreadyExists(template.id));
        }
        let rs = self
            .get_room(&template.room_id)
            .ok_or(EngineError::NotFound(template.room_id))?;
        let mut guard = rs.write().await;
        if guard.templates.len() >= MAX_TEMPLATES_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many templates on room"));
        }

        let room_id = template.room_id;
        let event = Event::TemplateAdded { template };
        self.persist_and_apply(room_id, &mut guard, &event).await
    }

    pub async fn remove_template(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.templates.iter().any(|t| t.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::TemplateRemoved { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    /// Insert or replace the exception for `(room, date)` — one exception
    /// per date, last write wins.
    pub async fn set_exception(&self, exception: ExceptionRule) -> Result<(), EngineError> {
        if let Some(ref window) = exception.window {
            validate_day_window(window)?;
        }
        if exception.price_cents.is_some_and(|p| p < 0) {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "prices must be non-negative",
            )));
        }
        if exception.reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("exception reason too long"));
        }
        if self.entity_to_room.contains_key(&exception.id) {
            return Err(EngineError::AlreadyExists(exception.id));
        }
        let rs = self
            .get_room(&exception.room_id)
            .ok_or(EngineError::NotFound(exception.room_id))?;
        let mut guard = rs.write().await;
        if guard.exceptions.len() >= MAX_EXCEPTIONS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many exceptions on room"));
        }

        let room_id = exception.room_id;
        let event = Event::ExceptionSet { exception };
        self.persist_and_apply(room_id, &mut guard, &event).await
    }

    pub async fn remove_exception(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if !guard.exceptions.iter().any(|e| e.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::ExceptionRemoved { id, room_id };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    // ── Tenant calendar ──────────────────────────────────

    /// Idempotent: re-adding a holiday that exists is a no-op success.
    pub async fn add_holiday(&self, date: NaiveDate) -> Result<(), EngineError> {
        {
            let cal = self.calendar.read().await;
            if cal.holidays.contains(&date) {
                return Ok(());
            }
            if cal.holidays.len() >= MAX_HOLIDAYS {
                return Err(EngineError::LimitExceeded("too many holidays"));
            }
        }
        self.persist_calendar(&Event::HolidayAdded { date }).await
    }

    pub async fn remove_holiday(&self, date: NaiveDate) -> Result<(), EngineError> {
        if !self.calendar.read().await.holidays.contains(&date) {
            return Ok(());
        }
        self.persist_calendar(&Event::HolidayRemoved { date }).await
    }

    pub async fn set_utc_offset(&self, minutes: i32) -> Result<(), EngineError> {
        if !(-14 * 60..=14 * 60).contains(&minutes) {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "utc offset must be within +/-14 hours",
            )));
        }
        self.persist_calendar(&Event::UtcOffsetSet { minutes }).await
    }

    // ── Reservations ─────────────────────────────────────

    /// The atomic check-then-reserve unit. Validation, the availability
    /// verdict, pricing, and the WAL commit all happen under the room's
    /// write lock, so concurrent callers can never overshoot a window's
    /// `max_concurrent`.
    pub async fn reserve(&self, req: ReservationRequest) -> Result<Booking, EngineError> {
        validate_customer(&req.customer)?;
        if self.entity_to_room.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if req.tax_cents < 0 {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "tax must be non-negative",
            )));
        }

        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(req.room_id))?;
        let mut guard = rs.write().await;
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let slot = Slot::new(req.start, req.start + guard.room.duration_minutes);
        validate_booking_shape(&guard.room, &slot, req.players)
            .map_err(EngineError::Validation)?;

        let calendar = self.calendar.read().await.clone();
        let now = super::conflict::now_local(calendar.utc_offset_minutes);
        if let Err(reason) = evaluate_slot(&guard, req.date, &slot, None, now) {
            metrics::counter!(crate::observability::RESERVATION_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::Conflict {
                room_id: req.room_id,
                date: req.date,
                slot,
                reason,
            });
        }

        let exception_price = guard.exception_on(req.date).and_then(|e| e.price_cents);
        let price = pricing::quote(
            &guard.room,
            req.date,
            req.players,
            exception_price,
            &calendar,
            req.tax_cents,
        );

        let booking = Booking {
            id: req.id,
            room_id: req.room_id,
            date: req.date,
            slot,
            players: req.players,
            customer: req.customer,
            price,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            created_at: now_ms(),
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            paid_at: None,
            cancellation_reason: None,
            game_master: None,
        };

        let event = Event::BookingReserved {
            booking: Box::new(booking.clone()),
        };
        self.persist_and_apply(req.room_id, &mut guard, &event).await?;
        Ok(booking)
    }

    // ── Booking lifecycle ────────────────────────────────

    pub async fn update_booking_status(
        &self,
        id: Ulid,
        status: BookingStatus,
        reason: Option<String>,
    ) -> Result<Ulid, EngineError> {
        if reason.as_ref().is_some_and(|r| r.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("cancellation reason too long"));
        }
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;

        // Dry-run on a copy; the event application performs the real change.
        let mut probe = booking.clone();
        let at = now_ms();
        lifecycle::transition_status(&mut probe, status, at, reason.clone())
            .map_err(|error| EngineError::Lifecycle { booking_id: id, error })?;

        let event = Event::BookingStatusChanged {
            id,
            room_id,
            status,
            at,
            reason,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    pub async fn update_payment_status(
        &self,
        id: Ulid,
        payment_status: PaymentStatus,
    ) -> Result<Ulid, EngineError> {
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;

        let mut probe = booking.clone();
        let at = now_ms();
        lifecycle::transition_payment(&mut probe, payment_status, at)
            .map_err(|error| EngineError::Lifecycle { booking_id: id, error })?;

        let event = Event::PaymentStatusChanged {
            id,
            room_id,
            payment_status,
            at,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    /// One review per booking, completed sessions only.
    pub async fn submit_review(
        &self,
        id: Ulid,
        booking_id: Ulid,
        rating: u8,
        comment: Option<String>,
    ) -> Result<Ulid, EngineError> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "rating must be 1 through 5",
            )));
        }
        if comment.as_ref().is_some_and(|c| c.len() > MAX_REASON_LEN) {
            return Err(EngineError::LimitExceeded("review comment too long"));
        }
        if self.entity_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let (room_id, mut guard) = self.resolve_entity_write(&booking_id).await?;
        let booking = guard.booking(booking_id).ok_or(EngineError::NotFound(booking_id))?;
        if booking.status != BookingStatus::Completed {
            return Err(EngineError::Validation(ValidationError::InvalidValue(
                "only completed bookings can be reviewed",
            )));
        }
        if guard.reviews.iter().any(|r| r.booking_id == booking_id) {
            return Err(EngineError::AlreadyExists(booking_id));
        }

        let event = Event::ReviewSubmitted {
            review: Review {
                id,
                booking_id,
                room_id,
                rating,
                comment,
                created_at: now_ms(),
            },
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }

    pub async fn assign_game_master(
        &self,
        id: Ulid,
        game_master: Option<String>,
    ) -> Result<Ulid, EngineError> {
        if game_master.as_ref().is_some_and(|g| g.len() > MAX_NAME_LEN) {
            return Err(EngineError::LimitExceeded("game master name too long"));
        }
        let (room_id, mut guard) = self.resolve_entity_write(&id).await?;
        if guard.booking(id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::GameMasterAssigned {
            id,
            room_id,
            game_master,
        };
        self.persist_and_apply(room_id, &mut guard, &event).await?;
        Ok(room_id)
    }
}
