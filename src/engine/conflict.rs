use chrono::{Duration, NaiveDate, NaiveDateTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::BookingError;

/// Institution-local wall clock. The campus day is time-zone-naive.
pub fn now_local() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

/// Check the requested slot against the hour grid and opening hours.
/// Returns the validated half-open slot.
pub(crate) fn validate_slot(start: Hour, duration: u8) -> Result<Slot, BookingError> {
    if !(MIN_BOOKING_HOURS..=MAX_BOOKING_HOURS).contains(&duration) {
        return Err(BookingError::OutOfWindow("duration must be 1 or 2 hours"));
    }
    if start < OPENING_HOUR {
        return Err(BookingError::OutOfWindow("starts before opening hour"));
    }
    let end = start + duration;
    if end > CLOSING_HOUR {
        return Err(BookingError::OutOfWindow("ends after closing hour"));
    }
    Ok(Slot::new(start, end))
}

/// Validate the variant payload against the target resource: variant match,
/// field completeness, head-count bound.
pub(crate) fn validate_details(
    details: &BookingDetails,
    kind: &ResourceKind,
) -> Result<(), BookingError> {
    if !details.matches_kind(kind) {
        return Err(BookingError::WrongKind);
    }
    if details.purpose().is_empty() {
        return Err(BookingError::MissingField("purpose"));
    }
    if details.purpose().len() > MAX_TEXT_LEN {
        return Err(BookingError::LimitExceeded("purpose too long"));
    }
    match details {
        BookingDetails::Classroom {
            professor,
            subject,
            student_year,
            ..
        } => {
            if professor.is_empty() {
                return Err(BookingError::MissingField("professor"));
            }
            if subject.is_empty() {
                return Err(BookingError::MissingField("subject"));
            }
            if student_year.is_empty() {
                return Err(BookingError::MissingField("student_year"));
            }
        }
        BookingDetails::Playground {
            team_name,
            captain_contact,
            members,
            ..
        } => {
            if team_name.is_empty() {
                return Err(BookingError::MissingField("team_name"));
            }
            if captain_contact.is_empty() {
                return Err(BookingError::MissingField("captain_contact"));
            }
            if members.is_empty() {
                return Err(BookingError::MissingField("members"));
            }
            if members.len() > MAX_TEAM_SIZE {
                return Err(BookingError::LimitExceeded("team too large"));
            }
            if members.iter().any(|m| m.name.is_empty()) {
                return Err(BookingError::MissingField("member name"));
            }
        }
    }
    let limit = kind.head_limit();
    let requested = details.head_count();
    if requested > limit {
        return Err(BookingError::CapacityExceeded { limit, requested });
    }
    Ok(())
}

/// The authoritative conflict check: reject if the slot overlaps any
/// booking on (resource, date) that still holds its slot. Cancelled and
/// rejected bookings do not count.
pub(crate) fn check_no_conflict(
    rs: &ResourceState,
    date: NaiveDate,
    slot: &Slot,
) -> Result<(), BookingError> {
    for booking in rs.on_date(date) {
        if booking.status.blocks_slot() && booking.slot.overlaps(slot) {
            return Err(BookingError::SlotTaken(booking.id));
        }
    }
    Ok(())
}

/// Ownership, lifecycle and lead-time rules for cancellation.
/// Cancellation needs strictly more than the lead time left before start.
pub(crate) fn check_cancellable(
    booking: &Booking,
    requesting_user: Ulid,
    now: NaiveDateTime,
) -> Result<(), BookingError> {
    if booking.owner != requesting_user {
        return Err(BookingError::NotOwner(booking.id));
    }
    if booking.status.is_closed() {
        return Err(BookingError::AlreadyClosed(booking.id));
    }
    let cutoff = booking.starts_at() - Duration::hours(CANCEL_LEAD_HOURS);
    if now >= cutoff {
        return Err(BookingError::TooLate);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn classroom_details() -> BookingDetails {
        BookingDetails::Classroom {
            purpose: "Lecture".into(),
            professor: "Dr. Iyer".into(),
            subject: "Databases".into(),
            student_year: "3rd".into(),
            expected_students: 40,
        }
    }

    fn classroom_kind(capacity: u32) -> ResourceKind {
        ResourceKind::Classroom {
            room_number: "CC2-010".into(),
            building: Building::Cc2,
            capacity,
            facilities: vec![],
        }
    }

    fn approved(rs: &mut ResourceState, d: NaiveDate, start: Hour, end: Hour) -> Ulid {
        let ts = d.and_hms_opt(0, 0, 0).unwrap();
        let id = Ulid::new();
        rs.insert_booking(Booking {
            id,
            owner: Ulid::new(),
            resource_id: rs.id,
            date: d,
            slot: Slot::new(start, end),
            details: classroom_details(),
            status: BookingStatus::Approved,
            notes: None,
            created_at: ts,
            updated_at: ts,
        });
        id
    }

    #[test]
    fn slot_validation_window_boundaries() {
        // 17:00 + 1h ends exactly at closing — allowed
        assert!(validate_slot(17, 1).is_ok());
        // 17:00 + 2h would end at 19:00 — rejected
        assert!(matches!(
            validate_slot(17, 2),
            Err(BookingError::OutOfWindow(_))
        ));
        assert!(matches!(
            validate_slot(8, 1),
            Err(BookingError::OutOfWindow(_))
        ));
        assert!(matches!(
            validate_slot(10, 0),
            Err(BookingError::OutOfWindow(_))
        ));
        assert!(matches!(
            validate_slot(10, 3),
            Err(BookingError::OutOfWindow(_))
        ));
        assert_eq!(validate_slot(9, 2).unwrap(), Slot::new(9, 11));
    }

    #[test]
    fn details_capacity_boundary() {
        // exactly at capacity is fine, one over fails
        assert!(validate_details(&classroom_details(), &classroom_kind(40)).is_ok());
        assert!(matches!(
            validate_details(&classroom_details(), &classroom_kind(39)),
            Err(BookingError::CapacityExceeded {
                limit: 39,
                requested: 40
            })
        ));
    }

    #[test]
    fn details_missing_fields() {
        let d = BookingDetails::Classroom {
            purpose: "Lecture".into(),
            professor: "".into(),
            subject: "Databases".into(),
            student_year: "3rd".into(),
            expected_students: 10,
        };
        assert!(matches!(
            validate_details(&d, &classroom_kind(60)),
            Err(BookingError::MissingField("professor"))
        ));

        let team = BookingDetails::Playground {
            purpose: "Practice".into(),
            team_name: "Strikers".into(),
            captain_contact: "12345".into(),
            members: vec![],
        };
        let ground = ResourceKind::Playground {
            name: "Football Ground".into(),
            ground: GroundType::Outdoor,
            max_players: 22,
            equipment: vec![],
        };
        assert!(matches!(
            validate_details(&team, &ground),
            Err(BookingError::MissingField("members"))
        ));
    }

    #[test]
    fn details_wrong_variant() {
        let ground = ResourceKind::Playground {
            name: "Cricket Ground".into(),
            ground: GroundType::Outdoor,
            max_players: 22,
            equipment: vec![],
        };
        assert!(matches!(
            validate_details(&classroom_details(), &ground),
            Err(BookingError::WrongKind)
        ));
    }

    #[test]
    fn conflict_detection_half_open() {
        let d = date(2024, 5, 1);
        let mut rs = ResourceState::new(Ulid::new(), classroom_kind(60));
        let existing = approved(&mut rs, d, 10, 12);

        // contained overlap
        let err = check_no_conflict(&rs, d, &Slot::new(11, 12)).unwrap_err();
        assert!(matches!(err, BookingError::SlotTaken(id) if id == existing));
        // adjacent is fine
        assert!(check_no_conflict(&rs, d, &Slot::new(12, 13)).is_ok());
        assert!(check_no_conflict(&rs, d, &Slot::new(9, 10)).is_ok());
        // other dates unaffected
        assert!(check_no_conflict(&rs, date(2024, 5, 2), &Slot::new(10, 12)).is_ok());
    }

    #[test]
    fn cancelled_booking_releases_slot() {
        let d = date(2024, 5, 1);
        let mut rs = ResourceState::new(Ulid::new(), classroom_kind(60));
        let id = approved(&mut rs, d, 10, 12);
        rs.booking_mut(d, id).unwrap().status = BookingStatus::Cancelled;
        assert!(check_no_conflict(&rs, d, &Slot::new(10, 12)).is_ok());
    }

    #[test]
    fn cancellation_lead_time() {
        let d = date(2024, 5, 2);
        let mut rs = ResourceState::new(Ulid::new(), classroom_kind(60));
        let id = approved(&mut rs, d, 9, 10);
        let booking = rs.booking(d, id).unwrap().clone();
        let owner = booking.owner;

        // the day before at 08:00 — well over 2h lead
        let early = date(2024, 5, 1).and_hms_opt(8, 0, 0).unwrap();
        assert!(check_cancellable(&booking, owner, early).is_ok());

        // 1 hour before start — too late
        let late = d.and_hms_opt(8, 0, 0).unwrap();
        assert!(matches!(
            check_cancellable(&booking, owner, late),
            Err(BookingError::TooLate)
        ));

        // exactly 2 hours before start — not *strictly* more, too late
        let at_cutoff = d.and_hms_opt(7, 0, 0).unwrap();
        assert!(matches!(
            check_cancellable(&booking, owner, at_cutoff),
            Err(BookingError::TooLate)
        ));

        // one second earlier is allowed
        let just_before = d.and_hms_opt(6, 59, 59).unwrap();
        assert!(check_cancellable(&booking, owner, just_before).is_ok());
    }

    #[test]
    fn cancellation_ownership_and_lifecycle() {
        let d = date(2024, 6, 1);
        let mut rs = ResourceState::new(Ulid::new(), classroom_kind(60));
        let id = approved(&mut rs, d, 9, 10);
        let early = date(2024, 5, 1).and_hms_opt(8, 0, 0).unwrap();

        let booking = rs.booking(d, id).unwrap().clone();
        assert!(matches!(
            check_cancellable(&booking, Ulid::new(), early),
            Err(BookingError::NotOwner(_))
        ));

        rs.booking_mut(d, id).unwrap().status = BookingStatus::Cancelled;
        let cancelled = rs.booking(d, id).unwrap().clone();
        assert!(matches!(
            check_cancellable(&cancelled, cancelled.owner, early),
            Err(BookingError::AlreadyClosed(_))
        ));
    }
}
