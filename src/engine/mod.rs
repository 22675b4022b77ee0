mod conflict;
mod error;
mod lifecycle;
mod mutations;
mod policy;
mod pricing;
mod queries;

pub use conflict::{check_advance_window, evaluate_slot, now_local};
pub use error::{ConflictReason, EngineError, LifecycleError, ValidationError};
pub use lifecycle::{transition_payment, transition_status};
pub use mutations::ReservationRequest;
pub use policy::{
    LegalWindow, free_windows, governing_window, legal_windows, merge_overlapping,
    saturated_slots, subtract_slots,
};
pub use pricing::{quote, select_rate};
pub use queries::BookingFilter;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Engine ───────────────────────────────────────────────

/// One organization's booking engine: every room's state, the tenant
/// calendar, and the WAL that makes it all durable.
pub struct Engine {
    pub state: DashMap<Ulid, SharedRoomState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (template/exception/booking) id → room id
    pub(super) entity_to_room: DashMap<Ulid, Ulid>,
    /// Tenant calendar: weekend set, holidays, UTC offset.
    pub(super) calendar: RwLock<OrgCalendar>,
}

/// Apply a room-scoped event directly (no locking — caller holds the lock).
fn apply_to_room(rs: &mut RoomState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    match event {
        Event::RoomUpdated { patch, .. } => {
            patch.apply(&mut rs.room);
        }
        Event::TemplateAdded { template } => {
            entity_map.insert(template.id, template.room_id);
            rs.templates.push(template.clone());
        }
        Event::TemplateRemoved { id, .. } => {
            rs.remove_template(*id);
            entity_map.remove(id);
        }
        Event::ExceptionSet { exception } => {
            entity_map.insert(exception.id, exception.room_id);
            if let Some(old) = rs.set_exception(exception.clone())
                && old.id != exception.id
            {
                entity_map.remove(&old.id);
            }
        }
        Event::ExceptionRemoved { id, .. } => {
            rs.remove_exception(*id);
            entity_map.remove(id);
        }
        Event::BookingReserved { booking } => {
            entity_map.insert(booking.id, booking.room_id);
            rs.insert_booking((**booking).clone());
        }
        Event::BookingStatusChanged {
            id,
            status,
            at,
            reason,
            ..
        } => {
            if let Some(b) = rs.booking_mut(*id) {
                // Legality was checked before the event was logged.
                let _ = lifecycle::transition_status(b, *status, *at, reason.clone());
            }
        }
        Event::PaymentStatusChanged {
            id,
            payment_status,
            at,
            ..
        } => {
            if let Some(b) = rs.booking_mut(*id) {
                let _ = lifecycle::transition_payment(b, *payment_status, *at);
            }
        }
        Event::GameMasterAssigned { id, game_master, .. } => {
            if let Some(b) = rs.booking_mut(*id) {
                b.game_master = game_master.clone();
            }
        }
        Event::ReviewSubmitted { review } => {
            entity_map.insert(review.id, review.room_id);
            rs.reviews.push(review.clone());
        }
        // Handled at the DashMap / calendar level, not here
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::HolidayAdded { .. }
        | Event::HolidayRemoved { .. }
        | Event::UtcOffsetSet { .. } => {}
    }
}

fn apply_to_calendar(calendar: &mut OrgCalendar, event: &Event) {
    match event {
        Event::HolidayAdded { date } => {
            calendar.holidays.insert(*date);
        }
        Event::HolidayRemoved { date } => {
            calendar.holidays.remove(date);
        }
        Event::UtcOffsetSet { minutes } => {
            calendar.utc_offset_minutes = *minutes;
        }
        _ => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            notify,
            entity_to_room: DashMap::new(),
            calendar: RwLock::new(OrgCalendar::default()),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            match event {
                Event::RoomCreated { room } => {
                    engine
                        .state
                        .insert(room.id, Arc::new(RwLock::new(RoomState::new(room.clone()))));
                }
                Event::RoomDeleted { id } => {
                    engine.drop_room_entities(id);
                    engine.state.remove(id);
                }
                Event::HolidayAdded { .. }
                | Event::HolidayRemoved { .. }
                | Event::UtcOffsetSet { .. } => {
                    let mut cal = engine
                        .calendar
                        .try_write()
                        .expect("replay: uncontended write");
                    apply_to_calendar(&mut cal, event);
                }
                other => {
                    if let Some(room_id) = event_room_id(other)
                        && let Some(entry) = engine.state.get(&room_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        apply_to_room(&mut guard, other, &engine.entity_to_room);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_room.get(entity_id).map(|e| *e.value())
    }

    pub async fn org_calendar(&self) -> OrgCalendar {
        self.calendar.read().await.clone()
    }

    /// Current time in the organization's timezone.
    pub async fn org_now(&self) -> chrono::NaiveDateTime {
        now_local(self.calendar.read().await.utc_offset_minutes)
    }

    /// WAL-append + apply + notify in one call. Eliminates the repeated 3-line pattern.
    pub(super) async fn persist_and_apply(
        &self,
        room_id: Ulid,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_room(rs, event, &self.entity_to_room);
        self.notify.send(room_id, event);
        Ok(())
    }

    /// WAL-append + apply for tenant-level calendar events (no room channel).
    pub(super) async fn persist_calendar(&self, event: &Event) -> Result<(), EngineError> {
        let mut cal = self.calendar.write().await;
        self.wal_append(event).await?;
        apply_to_calendar(&mut cal, event);
        Ok(())
    }

    /// Lookup entity → room, get room, acquire write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }

    /// Drop reverse mappings for every entity owned by a room.
    fn drop_room_entities(&self, room_id: &Ulid) {
        if let Some(entry) = self.state.get(room_id) {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read() {
                for t in &guard.templates {
                    self.entity_to_room.remove(&t.id);
                }
                for e in &guard.exceptions {
                    self.entity_to_room.remove(&e.id);
                }
                for b in &guard.bookings {
                    self.entity_to_room.remove(&b.id);
                }
                for r in &guard.reviews {
                    self.entity_to_room.remove(&r.id);
                }
            }
        }
    }

    /// Compact the WAL: rewrite it with only the events needed to recreate
    /// current state. A `BookingReserved` snapshot carries the booking's
    /// full lifecycle fields, so one event per booking suffices.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        {
            let cal = self.calendar.read().await;
            if cal.utc_offset_minutes != 0 {
                events.push(Event::UtcOffsetSet {
                    minutes: cal.utc_offset_minutes,
                });
            }
            let mut holidays: Vec<_> = cal.holidays.iter().copied().collect();
            holidays.sort();
            for date in holidays {
                events.push(Event::HolidayAdded { date });
            }
        }

        let room_ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        for id in room_ids {
            let entry = match self.state.get(&id) {
                Some(e) => e,
                None => continue,
            };
            let rs = entry.value().clone();
            let guard = rs.try_read().expect("compact: uncontended read");

            events.push(Event::RoomCreated {
                room: guard.room.clone(),
            });
            for template in &guard.templates {
                events.push(Event::TemplateAdded {
                    template: template.clone(),
                });
            }
            for exception in &guard.exceptions {
                events.push(Event::ExceptionSet {
                    exception: exception.clone(),
                });
            }
            for booking in &guard.bookings {
                events.push(Event::BookingReserved {
                    booking: Box::new(booking.clone()),
                });
            }
            for review in &guard.reviews {
                events.push(Event::ReviewSubmitted {
                    review: review.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Storage("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Storage("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Storage(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Extract the room id from a room-scoped event.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::TemplateAdded { template } => Some(template.room_id),
        Event::ExceptionSet { exception } => Some(exception.room_id),
        Event::BookingReserved { booking } => Some(booking.room_id),
        Event::ReviewSubmitted { review } => Some(review.room_id),
        Event::TemplateRemoved { room_id, .. }
        | Event::ExceptionRemoved { room_id, .. }
        | Event::BookingStatusChanged { room_id, .. }
        | Event::PaymentStatusChanged { room_id, .. }
        | Event::GameMasterAssigned { room_id, .. } => Some(*room_id),
        Event::RoomUpdated { id, .. } => Some(*id),
        Event::RoomCreated { .. }
        | Event::RoomDeleted { .. }
        | Event::HolidayAdded { .. }
        | Event::HolidayRemoved { .. }
        | Event::UtcOffsetSet { .. } => None,
    }
}
