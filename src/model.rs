use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since midnight — the only time-of-day type.
pub type Minutes = i32;

/// Table size classes a restaurant can offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TableSize {
    Two,
    Four,
    Six,
}

impl TableSize {
    pub const ALL: [TableSize; 3] = [TableSize::Two, TableSize::Four, TableSize::Six];

    pub fn seats(self) -> u32 {
        match self {
            TableSize::Two => 2,
            TableSize::Four => 4,
            TableSize::Six => 6,
        }
    }

    /// Column name used on the wire.
    pub fn column(self) -> &'static str {
        match self {
            TableSize::Two => "two_person",
            TableSize::Four => "four_person",
            TableSize::Six => "six_person",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        TableSize::ALL.into_iter().find(|s| s.column() == name)
    }
}

/// Table counts per size class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub two: u32,
    pub four: u32,
    pub six: u32,
}

impl TableCounts {
    pub const ZERO: TableCounts = TableCounts { two: 0, four: 0, six: 0 };

    pub fn new(two: u32, four: u32, six: u32) -> Self {
        Self { two, four, six }
    }

    pub fn get(&self, size: TableSize) -> u32 {
        match size {
            TableSize::Two => self.two,
            TableSize::Four => self.four,
            TableSize::Six => self.six,
        }
    }

    pub fn set(&mut self, size: TableSize, count: u32) {
        match size {
            TableSize::Two => self.two = count,
            TableSize::Four => self.four = count,
            TableSize::Six => self.six = count,
        }
    }

    pub fn total(&self) -> u32 {
        self.two + self.four + self.six
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn add(&mut self, other: &TableCounts) {
        self.two += other.two;
        self.four += other.four;
        self.six += other.six;
    }

    /// `max(0, self - other)` per size.
    pub fn saturating_sub(&self, other: &TableCounts) -> TableCounts {
        TableCounts {
            two: self.two.saturating_sub(other.two),
            four: self.four.saturating_sub(other.four),
            six: self.six.saturating_sub(other.six),
        }
    }

    /// First size class where `self` asks for more than `available`.
    pub fn first_shortfall(&self, available: &TableCounts) -> Option<TableSize> {
        TableSize::ALL
            .into_iter()
            .find(|&s| self.get(s) > available.get(s))
    }

    pub fn seats(&self) -> u32 {
        TableSize::ALL.iter().map(|&s| self.get(s) * s.seats()).sum()
    }
}

/// Partial table update: omitted sizes keep their previous count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TablesPatch {
    pub two: Option<u32>,
    pub four: Option<u32>,
    pub six: Option<u32>,
}

impl TablesPatch {
    pub fn apply(&self, base: &TableCounts) -> TableCounts {
        TableCounts {
            two: self.two.unwrap_or(base.two),
            four: self.four.unwrap_or(base.four),
            six: self.six.unwrap_or(base.six),
        }
    }

    pub fn set(&mut self, size: TableSize, count: u32) {
        match size {
            TableSize::Two => self.two = Some(count),
            TableSize::Four => self.four = Some(count),
            TableSize::Six => self.six = Some(count),
        }
    }
}

impl From<TableCounts> for TablesPatch {
    fn from(t: TableCounts) -> Self {
        Self {
            two: Some(t.two),
            four: Some(t.four),
            six: Some(t.six),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
}

impl ReservationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ReservationStatus::Confirmed => "confirmed",
            ReservationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restaurant {
    pub id: Ulid,
    pub owner_id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub cuisines: Vec<String>,
    /// Opening time; always strictly before `closing`.
    pub opening: Minutes,
    pub closing: Minutes,
    pub capacity: TableCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub user_id: Ulid,
    pub date: NaiveDate,
    pub time: Minutes,
    pub tables: TableCounts,
    pub entry_code: String,
    pub status: ReservationStatus,
    pub viewed: bool,
}

impl Reservation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        crate::time::starts_at(self.date, self.time)
    }
}

/// Authenticated caller, supplied by the session layer and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Ulid,
    pub email: String,
    pub is_owner: bool,
}

impl Principal {
    pub fn diner(id: Ulid, email: impl Into<String>) -> Self {
        Self { id, email: email.into(), is_owner: false }
    }

    pub fn owner(id: Ulid, email: impl Into<String>) -> Self {
        Self { id, email: email.into(), is_owner: true }
    }
}

/// A restaurant plus all of its reservations, sorted by `(date, time)`.
#[derive(Debug, Clone)]
pub struct RestaurantState {
    pub restaurant: Restaurant,
    pub reservations: Vec<Reservation>,
}

impl RestaurantState {
    pub fn new(restaurant: Restaurant) -> Self {
        Self {
            restaurant,
            reservations: Vec::new(),
        }
    }

    /// Insert a reservation maintaining sort order by `(date, time)`.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let key = (reservation.date, reservation.time);
        let pos = self
            .reservations
            .partition_point(|r| (r.date, r.time) <= key);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    pub fn reservation_mut(&mut self, id: Ulid) -> Option<&mut Reservation> {
        self.reservations.iter_mut().find(|r| r.id == id)
    }

    /// All reservations (any status) on one calendar day.
    pub fn on_date(&self, date: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < date);
        let hi = self.reservations.partition_point(|r| r.date <= date);
        &self.reservations[lo..hi]
    }

    /// Reservations dated `from` or later.
    pub fn from_date(&self, from: NaiveDate) -> &[Reservation] {
        let lo = self.reservations.partition_point(|r| r.date < from);
        &self.reservations[lo..]
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RestaurantCreated {
        restaurant: Restaurant,
    },
    RestaurantUpdated {
        restaurant: Restaurant,
    },
    ReservationCreated {
        reservation: Reservation,
    },
    ReservationUpdated {
        id: Ulid,
        restaurant_id: Ulid,
        date: NaiveDate,
        time: Minutes,
        tables: TableCounts,
    },
    ReservationCancelled {
        id: Ulid,
        restaurant_id: Ulid,
    },
    ReservationsViewed {
        restaurant_id: Ulid,
    },
}

impl Event {
    pub fn restaurant_id(&self) -> Ulid {
        match self {
            Event::RestaurantCreated { restaurant } | Event::RestaurantUpdated { restaurant } => {
                restaurant.id
            }
            Event::ReservationCreated { reservation } => reservation.restaurant_id,
            Event::ReservationUpdated { restaurant_id, .. }
            | Event::ReservationCancelled { restaurant_id, .. }
            | Event::ReservationsViewed { restaurant_id } => *restaurant_id,
        }
    }
}

// ── Command inputs ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRestaurant {
    pub id: Ulid,
    pub name: String,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub cuisines: Vec<String>,
    pub opening: String,
    pub closing: String,
    pub capacity: TableCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestaurantPatch {
    pub name: Option<String>,
    pub location: Option<String>,
    pub contact: Option<String>,
    pub cuisines: Option<Vec<String>>,
    pub opening: Option<String>,
    pub closing: Option<String>,
    pub capacity: TablesPatch,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationPatch {
    pub date: Option<NaiveDate>,
    pub time: Option<String>,
    pub tables: Option<TablesPatch>,
}

impl ReservationPatch {
    pub fn is_empty(&self) -> bool {
        self.date.is_none() && self.time.is_none() && self.tables.is_none()
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub time: String,
    pub tables: TableCounts,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub before_slot: Slot,
    pub current_slot: Slot,
    pub after_slot: Slot,
}

impl Availability {
    pub fn slots(&self) -> [(&'static str, &Slot); 3] {
        [
            ("before", &self.before_slot),
            ("current", &self.current_slot),
            ("after", &self.after_slot),
        ]
    }
}
