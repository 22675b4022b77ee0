use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — audit timestamps only.
pub type Ms = i64;

/// Minute-of-day in the organization's timezone. Stored times are never
/// converted between zones.
pub type Minute = i32;

/// Money in minor currency units.
pub type Cents = i64;

pub const MINUTES_PER_DAY: Minute = 1_440;

/// Day-of-week as Postgres counts it: 0 = Sunday .. 6 = Saturday.
pub type DayOfWeek = u8;

pub fn day_of_week(date: NaiveDate) -> DayOfWeek {
    date.weekday().num_days_from_sunday() as DayOfWeek
}

/// Half-open interval `[start, end)` of minutes within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Slot {
    pub start: Minute,
    pub end: Minute,
}

impl Slot {
    pub fn new(start: Minute, end: Minute) -> Self {
        Self { start, end }
    }

    pub fn duration_minutes(&self) -> Minute {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Half-open overlap. Zero-length slots overlap nothing.
    pub fn overlaps(&self, other: &Slot) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    /// Returns true if `other` lies entirely within `self`.
    pub fn contains_slot(&self, other: &Slot) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Rooms ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Active,
    Maintenance,
    Inactive,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Active => "active",
            RoomStatus::Maintenance => "maintenance",
            RoomStatus::Inactive => "inactive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(RoomStatus::Active),
            "maintenance" => Some(RoomStatus::Maintenance),
            "inactive" => Some(RoomStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub min_players: u32,
    pub max_players: u32,
    pub duration_minutes: Minute,
    pub base_price_cents: Cents,
    pub weekend_price_cents: Option<Cents>,
    pub holiday_price_cents: Option<Cents>,
    pub group_discount_threshold: Option<u32>,
    pub group_discount_percent: u32,
    /// How far ahead a booking may be placed, in days.
    pub advance_booking_days: u32,
    /// How close to the start a booking may still be placed, in hours.
    pub min_advance_hours: u32,
    pub status: RoomStatus,
    pub is_bookable: bool,
}

impl Room {
    pub fn accepts_bookings(&self) -> bool {
        self.status == RoomStatus::Active && self.is_bookable
    }
}

/// Partial room update. `None` leaves the field untouched; the doubled
/// options clear a nullable field when set to `Some(None)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPatch {
    pub name: Option<String>,
    pub status: Option<RoomStatus>,
    pub is_bookable: Option<bool>,
    pub base_price_cents: Option<Cents>,
    pub weekend_price_cents: Option<Option<Cents>>,
    pub holiday_price_cents: Option<Option<Cents>>,
    pub group_discount_threshold: Option<Option<u32>>,
    pub group_discount_percent: Option<u32>,
    pub advance_booking_days: Option<u32>,
    pub min_advance_hours: Option<u32>,
}

impl RoomPatch {
    pub fn apply(&self, room: &mut Room) {
        if let Some(ref v) = self.name {
            room.name = v.clone();
        }
        if let Some(v) = self.status {
            room.status = v;
        }
        if let Some(v) = self.is_bookable {
            room.is_bookable = v;
        }
        if let Some(v) = self.base_price_cents {
            room.base_price_cents = v;
        }
        if let Some(v) = self.weekend_price_cents {
            room.weekend_price_cents = v;
        }
        if let Some(v) = self.holiday_price_cents {
            room.holiday_price_cents = v;
        }
        if let Some(v) = self.group_discount_threshold {
            room.group_discount_threshold = v;
        }
        if let Some(v) = self.group_discount_percent {
            room.group_discount_percent = v;
        }
        if let Some(v) = self.advance_booking_days {
            room.advance_booking_days = v;
        }
        if let Some(v) = self.min_advance_hours {
            room.min_advance_hours = v;
        }
    }

    pub fn is_noop(&self) -> bool {
        *self == RoomPatch::default()
    }
}

// ── Availability rules ───────────────────────────────────────────

/// Recurring weekly opening window. `day_of_week: None` applies every day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Template {
    pub id: Ulid,
    pub room_id: Ulid,
    pub day_of_week: Option<DayOfWeek>,
    pub window: Slot,
    pub max_concurrent: u32,
    pub active: bool,
}

impl Template {
    pub fn applies_on(&self, date: NaiveDate) -> bool {
        self.active && self.day_of_week.is_none_or(|d| d == day_of_week(date))
    }
}

/// Date-specific override. Takes precedence over every template that day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionRule {
    pub id: Ulid,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub closed: bool,
    pub window: Option<Slot>,
    pub price_cents: Option<Cents>,
    pub reason: Option<String>,
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(BookingStatus::Pending),
            "confirmed" => Some(BookingStatus::Confirmed),
            "completed" => Some(BookingStatus::Completed),
            "cancelled" => Some(BookingStatus::Cancelled),
            "no_show" => Some(BookingStatus::NoShow),
            _ => None,
        }
    }

    /// Active bookings hold their slot; terminal ones never block.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Pending | BookingStatus::Confirmed)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "refunded" => Some(PaymentStatus::Refunded),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
}

/// All monetary math happens in cents; the discount truncates toward zero
/// at the cent boundary. Tax is supplied externally and never discounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub rate_cents: Cents,
    pub discount_cents: Cents,
    pub tax_cents: Cents,
    pub total_cents: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub players: u32,
    pub customer: Customer,
    pub price: PriceBreakdown,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub created_at: Ms,
    pub confirmed_at: Option<Ms>,
    pub completed_at: Option<Ms>,
    pub cancelled_at: Option<Ms>,
    pub paid_at: Option<Ms>,
    pub cancellation_reason: Option<String>,
    pub game_master: Option<String>,
}

/// Post-visit review, one per completed booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub room_id: Ulid,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: Ms,
}

// ── Per-room state ───────────────────────────────────────────────

/// Everything the engine knows about one room. Bookings are kept sorted by
/// `(date, slot.start)`; cancelled bookings stay (audit history), they just
/// stop blocking.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    pub templates: Vec<Template>,
    pub exceptions: Vec<ExceptionRule>,
    pub bookings: Vec<Booking>,
    pub reviews: Vec<Review>,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            templates: Vec::new(),
            exceptions: Vec::new(),
            bookings: Vec::new(),
            reviews: Vec::new(),
        }
    }

    /// Insert maintaining sort order by `(date, slot.start)`.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.slot.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.slot.start) <= key);
        self.bookings.insert(pos, booking);
    }

    /// Bookings on `date`, any status. Binary search on the sorted vector.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// Exceptions are unique per date (last write wins at insert time).
    pub fn exception_on(&self, date: NaiveDate) -> Option<&ExceptionRule> {
        self.exceptions.iter().find(|e| e.date == date)
    }

    /// Replace any previous exception for the same date.
    pub fn set_exception(&mut self, exception: ExceptionRule) -> Option<ExceptionRule> {
        let old = self
            .exceptions
            .iter()
            .position(|e| e.date == exception.date)
            .map(|pos| self.exceptions.remove(pos));
        self.exceptions.push(exception);
        old
    }

    pub fn remove_exception(&mut self, id: Ulid) -> Option<ExceptionRule> {
        self.exceptions
            .iter()
            .position(|e| e.id == id)
            .map(|pos| self.exceptions.remove(pos))
    }

    pub fn remove_template(&mut self, id: Ulid) -> Option<Template> {
        self.templates
            .iter()
            .position(|t| t.id == id)
            .map(|pos| self.templates.remove(pos))
    }
}

// ── Organization calendar ────────────────────────────────────────

/// Tenant-level calendar configuration: which weekdays price as weekend,
/// which dates price as holidays, and the UTC offset used to derive "now"
/// in organization-local time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgCalendar {
    pub weekend: Vec<DayOfWeek>,
    pub holidays: std::collections::HashSet<NaiveDate>,
    pub utc_offset_minutes: i32,
}

impl Default for OrgCalendar {
    fn default() -> Self {
        Self {
            weekend: vec![0, 6], // Sunday, Saturday
            holidays: std::collections::HashSet::new(),
            utc_offset_minutes: 0,
        }
    }
}

impl OrgCalendar {
    pub fn is_weekend(&self, date: NaiveDate) -> bool {
        self.weekend.contains(&day_of_week(date))
    }

    pub fn is_holiday(&self, date: NaiveDate) -> bool {
        self.holidays.contains(&date)
    }
}

// ── WAL events ───────────────────────────────────────────────────

/// Flat event log record. Every committed mutation is one of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomUpdated {
        id: Ulid,
        patch: RoomPatch,
    },
    RoomDeleted {
        id: Ulid,
    },
    TemplateAdded {
        template: Template,
    },
    TemplateRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    ExceptionSet {
        exception: ExceptionRule,
    },
    ExceptionRemoved {
        id: Ulid,
        room_id: Ulid,
    },
    HolidayAdded {
        date: NaiveDate,
    },
    HolidayRemoved {
        date: NaiveDate,
    },
    UtcOffsetSet {
        minutes: i32,
    },
    BookingReserved {
        booking: Box<Booking>,
    },
    BookingStatusChanged {
        id: Ulid,
        room_id: Ulid,
        status: BookingStatus,
        at: Ms,
        reason: Option<String>,
    },
    PaymentStatusChanged {
        id: Ulid,
        room_id: Ulid,
        payment_status: PaymentStatus,
        at: Ms,
    },
    GameMasterAssigned {
        id: Ulid,
        room_id: Ulid,
        game_master: Option<String>,
    },
    ReviewSubmitted {
        review: Review,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotCheck {
    pub available: bool,
    pub reason: Option<crate::engine::ConflictReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OrgStats {
    pub total_bookings: u64,
    pub pending: u64,
    pub confirmed: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub no_show: u64,
    /// Paid, non-cancelled revenue.
    pub revenue_cents: Cents,
    /// Average party size across non-cancelled bookings, scaled by 100.
    pub avg_players_x100: u64,
    pub total_reviews: u64,
    /// Average review rating scaled by 100 (1..=5 stars).
    pub avg_rating_x100: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recommendation {
    pub slot: Slot,
    pub total_cents: Cents,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn slot_half_open_overlap() {
        let a = Slot::new(9 * 60, 10 * 60);
        let b = Slot::new(10 * 60, 11 * 60);
        let c = Slot::new(9 * 60, 10 * 60 + 1);
        assert!(!a.overlaps(&b)); // adjacent, not overlapping
        assert!(c.overlaps(&b));
        assert!(b.overlaps(&c));
    }

    #[test]
    fn zero_length_slot_overlaps_nothing() {
        let empty = Slot::new(600, 600);
        let wide = Slot::new(0, MINUTES_PER_DAY);
        assert!(!empty.overlaps(&wide));
        assert!(!wide.overlaps(&empty));
        assert!(!empty.overlaps(&empty));
    }

    #[test]
    fn slot_containment() {
        let outer = Slot::new(540, 1020);
        let inner = Slot::new(600, 660);
        let partial = Slot::new(500, 600);
        assert!(outer.contains_slot(&inner));
        assert!(outer.contains_slot(&outer));
        assert!(!outer.contains_slot(&partial));
    }

    #[test]
    fn day_of_week_is_postgres_dow() {
        assert_eq!(day_of_week(date("2026-08-02")), 0); // Sunday
        assert_eq!(day_of_week(date("2026-08-03")), 1); // Monday
        assert_eq!(day_of_week(date("2026-08-08")), 6); // Saturday
    }

    #[test]
    fn bookings_stay_sorted() {
        let room = test_room();
        let mut rs = RoomState::new(room);
        rs.insert_booking(test_booking(date("2026-08-10"), 600));
        rs.insert_booking(test_booking(date("2026-08-09"), 900));
        rs.insert_booking(test_booking(date("2026-08-10"), 540));
        let keys: Vec<_> = rs.bookings.iter().map(|b| (b.date, b.slot.start)).collect();
        let mut sorted = keys.clone();
        sorted.sort();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn bookings_on_selects_single_date() {
        let mut rs = RoomState::new(test_room());
        rs.insert_booking(test_booking(date("2026-08-09"), 600));
        rs.insert_booking(test_booking(date("2026-08-10"), 600));
        rs.insert_booking(test_booking(date("2026-08-10"), 720));
        rs.insert_booking(test_booking(date("2026-08-11"), 600));
        let day = rs.bookings_on(date("2026-08-10"));
        assert_eq!(day.len(), 2);
        assert!(day.iter().all(|b| b.date == date("2026-08-10")));
    }

    #[test]
    fn exception_last_write_wins() {
        let mut rs = RoomState::new(test_room());
        let d = date("2026-12-24");
        let first = ExceptionRule {
            id: Ulid::new(),
            room_id: rs.room.id,
            date: d,
            closed: true,
            window: None,
            price_cents: None,
            reason: Some("inventory".into()),
        };
        let second = ExceptionRule {
            id: Ulid::new(),
            room_id: rs.room.id,
            date: d,
            closed: false,
            window: Some(Slot::new(600, 900)),
            price_cents: Some(15_000),
            reason: None,
        };
        rs.set_exception(first.clone());
        let replaced = rs.set_exception(second.clone());
        assert_eq!(replaced, Some(first));
        assert_eq!(rs.exception_on(d), Some(&second));
        assert_eq!(rs.exceptions.len(), 1);
    }

    #[test]
    fn template_applies_on() {
        let mut t = Template {
            id: Ulid::new(),
            room_id: Ulid::new(),
            day_of_week: Some(6), // Saturday
            window: Slot::new(540, 1320),
            max_concurrent: 1,
            active: true,
        };
        assert!(t.applies_on(date("2026-08-08"))); // Saturday
        assert!(!t.applies_on(date("2026-08-07"))); // Friday
        t.day_of_week = None;
        assert!(t.applies_on(date("2026-08-07")));
        t.active = false;
        assert!(!t.applies_on(date("2026-08-07")));
    }

    #[test]
    fn room_patch_clears_nullable_field() {
        let mut room = test_room();
        room.weekend_price_cents = Some(12_000);
        let patch = RoomPatch {
            weekend_price_cents: Some(None),
            ..Default::default()
        };
        patch.apply(&mut room);
        assert_eq!(room.weekend_price_cents, None);
    }

    #[test]
    fn calendar_defaults() {
        let cal = OrgCalendar::default();
        assert!(cal.is_weekend(date("2026-08-08"))); // Saturday
        assert!(cal.is_weekend(date("2026-08-09"))); // Sunday
        assert!(!cal.is_weekend(date("2026-08-07"))); // Friday
        assert!(!cal.is_holiday(date("2026-12-25")));
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RoomCreated { room: test_room() };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    pub(crate) fn test_room() -> Room {
        Room {
            id: Ulid::new(),
            name: "The Vault".into(),
            min_players: 2,
            max_players: 8,
            duration_minutes: 60,
            base_price_cents: 10_000,
            weekend_price_cents: None,
            holiday_price_cents: None,
            group_discount_threshold: None,
            group_discount_percent: 0,
            advance_booking_days: 30,
            min_advance_hours: 2,
            status: RoomStatus::Active,
            is_bookable: true,
        }
    }

    pub(crate) fn test_booking(date: NaiveDate, start: Minute) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            date,
            slot: Slot::new(start, start + 60),
            players: 4,
            customer: Customer {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                phone: None,
            },
            price: PriceBreakdown {
                rate_cents: 10_000,
                discount_cents: 0,
                tax_cents: 0,
                total_cents: 10_000,
            },
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            created_at: 0,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            paid_at: None,
            cancellation_reason: None,
            game_master: None,
        }
    }
}
