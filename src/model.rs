use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Hour of day on the whole-hour booking grid — the only time granularity.
pub type Hour = u8;

/// Half-open hour interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: Hour,
    pub end: Hour,
}

impl Slot {
    pub fn new(start: Hour, end: Hour) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn duration_hours(&self) -> u8 {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The wall-clock instant this slot begins on `date`.
    pub fn starts_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_hms_opt(u32::from(self.start), 0, 0)
            .expect("slot hour on grid")
    }
}

// ── Resource catalog types ───────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Building {
    #[serde(rename = "CC1")]
    Cc1,
    #[serde(rename = "CC2")]
    Cc2,
    #[serde(rename = "CC3")]
    Cc3,
}

impl Building {
    pub const ALL: [Building; 3] = [Building::Cc1, Building::Cc2, Building::Cc3];

    pub fn as_str(&self) -> &'static str {
        match self {
            Building::Cc1 => "CC1",
            Building::Cc2 => "CC2",
            Building::Cc3 => "CC3",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Facility {
    Projector,
    #[serde(rename = "AC")]
    Ac,
    Whiteboard,
    Computer,
    #[serde(rename = "Audio System")]
    AudioSystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroundType {
    Outdoor,
    Indoor,
    Aquatic,
}

/// What a bookable resource is. Classrooms and playgrounds share identity
/// and scheduling but differ in capacity semantics and metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResourceKind {
    Classroom {
        room_number: String,
        building: Building,
        capacity: u32,
        facilities: Vec<Facility>,
    },
    Playground {
        name: String,
        ground: GroundType,
        max_players: u32,
        equipment: Vec<String>,
    },
}

impl ResourceKind {
    /// The head-count a booking on this resource may not exceed.
    pub fn head_limit(&self) -> u32 {
        match self {
            ResourceKind::Classroom { capacity, .. } => *capacity,
            ResourceKind::Playground { max_players, .. } => *max_players,
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ResourceKind::Classroom { room_number, .. } => room_number,
            ResourceKind::Playground { name, .. } => name,
        }
    }

    pub fn is_classroom(&self) -> bool {
        matches!(self, ResourceKind::Classroom { .. })
    }
}

/// Catalog listing filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceFilter {
    Classrooms,
    Playgrounds,
}

// ── Booking types ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    Cancelled,
}

impl BookingStatus {
    /// Cancelled and rejected bookings release their slot.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Rejected)
    }

    /// No transitions out of these states.
    pub fn is_closed(&self) -> bool {
        matches!(self, BookingStatus::Cancelled | BookingStatus::Rejected)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMember {
    pub name: String,
    pub roll_number: String,
}

/// Variant-specific booking payload — a tagged union over the shared
/// envelope, matched against the target resource's variant at request time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "booking_type", rename_all = "snake_case")]
pub enum BookingDetails {
    Classroom {
        purpose: String,
        professor: String,
        subject: String,
        student_year: String,
        expected_students: u32,
    },
    Playground {
        purpose: String,
        team_name: String,
        captain_contact: String,
        members: Vec<TeamMember>,
    },
}

impl BookingDetails {
    pub fn purpose(&self) -> &str {
        match self {
            BookingDetails::Classroom { purpose, .. }
            | BookingDetails::Playground { purpose, .. } => purpose,
        }
    }

    /// People the booking brings in — checked against the resource limit.
    pub fn head_count(&self) -> u32 {
        match self {
            BookingDetails::Classroom {
                expected_students, ..
            } => *expected_students,
            BookingDetails::Playground { members, .. } => members.len() as u32,
        }
    }

    pub fn matches_kind(&self, kind: &ResourceKind) -> bool {
        matches!(
            (self, kind),
            (
                BookingDetails::Classroom { .. },
                ResourceKind::Classroom { .. }
            ) | (
                BookingDetails::Playground { .. },
                ResourceKind::Playground { .. }
            )
        )
    }
}

/// A reservation of one resource for one slot on one day.
/// `owner` is immutable after creation; only status, notes and
/// `updated_at` change afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub owner: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub slot: Slot,
    pub details: BookingDetails,
    pub status: BookingStatus,
    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Booking {
    pub fn starts_at(&self) -> NaiveDateTime {
        self.slot.starts_at(self.date)
    }
}

/// Derived position of a booking's day relative to today — a pure
/// function of stored fields and the current day, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeline {
    Upcoming,
    Today,
    Past,
}

impl Timeline {
    pub fn of(date: NaiveDate, today: NaiveDate) -> Self {
        match date.cmp(&today) {
            std::cmp::Ordering::Greater => Timeline::Upcoming,
            std::cmp::Ordering::Equal => Timeline::Today,
            std::cmp::Ordering::Less => Timeline::Past,
        }
    }
}

/// Display label combining stored status and derived timeline.
pub fn display_status(booking: &Booking, today: NaiveDate) -> &'static str {
    match booking.status {
        BookingStatus::Cancelled => "cancelled",
        BookingStatus::Rejected => "rejected",
        BookingStatus::Pending => "pending",
        BookingStatus::Approved => match Timeline::of(booking.date, today) {
            Timeline::Upcoming => "upcoming",
            Timeline::Today => "today",
            Timeline::Past => "completed",
        },
    }
}

// ── Per-resource scheduling state ────────────────────────────────

/// All state for one resource: catalog metadata plus its bookings,
/// grouped per day and sorted by start hour within each day.
#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub is_active: bool,
    pub days: BTreeMap<NaiveDate, Vec<Booking>>,
}

impl ResourceState {
    pub fn new(id: Ulid, kind: ResourceKind) -> Self {
        Self {
            id,
            kind,
            is_active: true,
            days: BTreeMap::new(),
        }
    }

    /// Insert a booking maintaining sort order by slot start within its day.
    pub fn insert_booking(&mut self, booking: Booking) {
        let day = self.days.entry(booking.date).or_default();
        let pos = day
            .binary_search_by_key(&booking.slot.start, |b| b.slot.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
    }

    /// All bookings on a day, any status.
    pub fn on_date(&self, date: NaiveDate) -> &[Booking] {
        self.days.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn booking_mut(&mut self, date: NaiveDate, id: Ulid) -> Option<&mut Booking> {
        self.days
            .get_mut(&date)
            .and_then(|day| day.iter_mut().find(|b| b.id == id))
    }

    pub fn booking(&self, date: NaiveDate, id: Ulid) -> Option<&Booking> {
        self.on_date(date).iter().find(|b| b.id == id)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceAdded {
        id: Ulid,
        kind: ResourceKind,
    },
    ResourceDeactivated {
        id: Ulid,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingCancelled {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        at: NaiveDateTime,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub kind: ResourceKind,
    pub is_active: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classroom_kind() -> ResourceKind {
        ResourceKind::Classroom {
            room_number: "CC1-001".into(),
            building: Building::Cc1,
            capacity: 60,
            facilities: vec![Facility::Projector, Facility::Whiteboard],
        }
    }

    fn classroom_details(expected: u32) -> BookingDetails {
        BookingDetails::Classroom {
            purpose: "Lecture".into(),
            professor: "Dr. Rao".into(),
            subject: "Algorithms".into(),
            student_year: "2nd".into(),
            expected_students: expected,
        }
    }

    fn booking_on(date: NaiveDate, start: Hour, end: Hour) -> Booking {
        let ts = date.and_hms_opt(0, 0, 0).unwrap();
        Booking {
            id: Ulid::new(),
            owner: Ulid::new(),
            resource_id: Ulid::new(),
            date,
            slot: Slot::new(start, end),
            details: classroom_details(30),
            status: BookingStatus::Approved,
            notes: None,
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn slot_basics() {
        let s = Slot::new(10, 12);
        assert_eq!(s.duration_hours(), 2);
        let d = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(s.starts_at(d), d.and_hms_opt(10, 0, 0).unwrap());
    }

    #[test]
    fn slot_overlap_half_open() {
        let a = Slot::new(10, 12);
        let b = Slot::new(11, 12);
        let c = Slot::new(12, 13);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // adjacent, not overlapping
        assert!(!c.overlaps(&a));
    }

    #[test]
    fn status_slot_blocking() {
        assert!(BookingStatus::Approved.blocks_slot());
        assert!(BookingStatus::Pending.blocks_slot());
        assert!(!BookingStatus::Cancelled.blocks_slot());
        assert!(!BookingStatus::Rejected.blocks_slot());
        assert!(BookingStatus::Cancelled.is_closed());
        assert!(!BookingStatus::Approved.is_closed());
    }

    #[test]
    fn details_head_count() {
        assert_eq!(classroom_details(45).head_count(), 45);
        let team = BookingDetails::Playground {
            purpose: "Practice".into(),
            team_name: "Strikers".into(),
            captain_contact: "9999999999".into(),
            members: vec![
                TeamMember {
                    name: "A".into(),
                    roll_number: "R1".into(),
                },
                TeamMember {
                    name: "B".into(),
                    roll_number: "R2".into(),
                },
            ],
        };
        assert_eq!(team.head_count(), 2);
        assert!(!team.matches_kind(&classroom_kind()));
        assert!(classroom_details(1).matches_kind(&classroom_kind()));
    }

    #[test]
    fn insert_booking_keeps_day_sorted() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let mut rs = ResourceState::new(Ulid::new(), classroom_kind());
        rs.insert_booking(booking_on(date, 14, 16));
        rs.insert_booking(booking_on(date, 9, 10));
        rs.insert_booking(booking_on(date, 11, 12));
        let starts: Vec<Hour> = rs.on_date(date).iter().map(|b| b.slot.start).collect();
        assert_eq!(starts, vec![9, 11, 14]);
    }

    #[test]
    fn days_are_independent() {
        let d1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let d2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        let mut rs = ResourceState::new(Ulid::new(), classroom_kind());
        rs.insert_booking(booking_on(d1, 9, 10));
        assert_eq!(rs.on_date(d1).len(), 1);
        assert!(rs.on_date(d2).is_empty());
    }

    #[test]
    fn timeline_derivation() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let tomorrow = NaiveDate::from_ymd_opt(2024, 5, 16).unwrap();
        let yesterday = NaiveDate::from_ymd_opt(2024, 5, 14).unwrap();
        assert_eq!(Timeline::of(tomorrow, today), Timeline::Upcoming);
        assert_eq!(Timeline::of(today, today), Timeline::Today);
        assert_eq!(Timeline::of(yesterday, today), Timeline::Past);
    }

    #[test]
    fn display_status_cancelled_wins_over_timeline() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 15).unwrap();
        let mut b = booking_on(today, 9, 10);
        assert_eq!(display_status(&b, today), "today");
        b.status = BookingStatus::Cancelled;
        assert_eq!(display_status(&b, today), "cancelled");
        b.status = BookingStatus::Approved;
        b.date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        assert_eq!(display_status(&b, today), "completed");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let event = Event::BookingCreated {
            booking: booking_on(date, 10, 12),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
