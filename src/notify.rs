use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for per-room event streams. Dashboards subscribe to a
/// room and see every committed mutation touching it.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a room. Creates the channel if needed.
    pub fn subscribe(&self, room_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(room_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, room_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&room_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a room is deleted).
    pub fn remove(&self, room_id: &Ulid) {
        self.channels.remove(room_id);
    }
}

/// NOTIFY payload for an event: the event kind plus the ids a dashboard
/// needs to refetch, as compact JSON.
pub fn payload_json(event: &Event) -> String {
    let value = match event {
        Event::RoomCreated { room } => serde_json::json!({"kind": "room_created", "room_id": room.id.to_string()}),
        Event::RoomUpdated { id, .. } => serde_json::json!({"kind": "room_updated", "room_id": id.to_string()}),
        Event::RoomDeleted { id } => serde_json::json!({"kind": "room_deleted", "room_id": id.to_string()}),
        Event::TemplateAdded { template } => serde_json::json!({"kind": "template_added", "room_id": template.room_id.to_string(), "id": template.id.to_string()}),
        Event::TemplateRemoved { id, room_id } => serde_json::json!({"kind": "template_removed", "room_id": room_id.to_string(), "id": id.to_string()}),
        Event::ExceptionSet { exception } => serde_json::json!({"kind": "exception_set", "room_id": exception.room_id.to_string(), "id": exception.id.to_string(), "date": exception.date.to_string()}),
        Event::ExceptionRemoved { id, room_id } => serde_json::json!({"kind": "exception_removed", "room_id": room_id.to_string(), "id": id.to_string()}),
        Event::HolidayAdded { date } => serde_json::json!({"kind": "holiday_added", "date": date.to_string()}),
        Event::HolidayRemoved { date } => serde_json::json!({"kind": "holiday_removed", "date": date.to_string()}),
        Event::UtcOffsetSet { minutes } => serde_json::json!({"kind": "utc_offset_set", "minutes": minutes}),
        Event::BookingReserved { booking } => serde_json::json!({"kind": "booking_reserved", "room_id": booking.room_id.to_string(), "id": booking.id.to_string(), "date": booking.date.to_string()}),
        Event::BookingStatusChanged { id, room_id, status, .. } => serde_json::json!({"kind": "booking_status_changed", "room_id": room_id.to_string(), "id": id.to_string(), "status": status.as_str()}),
        Event::PaymentStatusChanged { id, room_id, payment_status, .. } => serde_json::json!({"kind": "payment_status_changed", "room_id": room_id.to_string(), "id": id.to_string(), "payment_status": payment_status.as_str()}),
        Event::GameMasterAssigned { id, room_id, .. } => serde_json::json!({"kind": "game_master_assigned", "room_id": room_id.to_string(), "id": id.to_string()}),
        Event::ReviewSubmitted { review } => serde_json::json!({"kind": "review_submitted", "room_id": review.room_id.to_string(), "id": review.id.to_string(), "rating": review.rating}),
    };
    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::test_room;
    use crate::model::*;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let room = test_room();
        let rid = room.id;
        let mut rx = hub.subscribe(rid);

        let event = Event::RoomCreated { room };
        hub.send(rid, &event);

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        // No subscriber — should not panic
        hub.send(rid, &Event::RoomDeleted { id: rid });
    }

    #[tokio::test]
    async fn remove_drops_channel() {
        let hub = NotifyHub::new();
        let rid = Ulid::new();
        let _rx = hub.subscribe(rid);
        hub.remove(&rid);
        // Sending after removal is a no-op
        hub.send(rid, &Event::RoomDeleted { id: rid });
    }

    #[test]
    fn payload_is_valid_json_with_kind() {
        let room = test_room();
        let event = Event::BookingStatusChanged {
            id: Ulid::new(),
            room_id: room.id,
            status: BookingStatus::Cancelled,
            at: 0,
            reason: None,
        };
        let payload = payload_json(&event);
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(value["kind"], "booking_status_changed");
        assert_eq!(value["status"], "cancelled");
        assert_eq!(value["room_id"], room.id.to_string());
    }
}
