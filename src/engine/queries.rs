use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::{CLOSING_HOUR, MAX_BOOKING_HOURS, MIN_BOOKING_HOURS, OPENING_HOUR};
use crate::model::*;

use super::{BookingError, Engine};

impl Engine {
    /// The day schedule for one resource: bookings that hold their slot,
    /// ascending by start hour. Works for deactivated resources too —
    /// history stays readable.
    pub async fn bookings_for_resource_on_date(
        &self,
        resource_id: &Ulid,
        date: NaiveDate,
    ) -> Result<Vec<Booking>, BookingError> {
        let rs = self
            .get_resource(resource_id)
            .ok_or(BookingError::ResourceNotFound(*resource_id))?;
        let guard = rs.read().await;
        Ok(guard
            .on_date(date)
            .iter()
            .filter(|b| b.status.blocks_slot())
            .cloned()
            .collect())
    }

    /// Every booking the user ever made, any status, newest day first.
    pub async fn bookings_for_user(&self, owner: &Ulid) -> Vec<Booking> {
        let ids: Vec<Ulid> = self
            .owner_index
            .get(owner)
            .map(|e| e.value().clone())
            .unwrap_or_default();

        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some((resource_id, date)) = self.booking_index.get(&id).map(|e| *e.value()) else {
                continue;
            };
            let Some(rs) = self.get_resource(&resource_id) else {
                continue;
            };
            let guard = rs.read().await;
            if let Some(booking) = guard.booking(date, id) {
                out.push(booking.clone());
            }
        }
        out.sort_by(|a, b| (b.date, b.slot.start).cmp(&(a.date, a.slot.start)));
        out
    }

    /// Start hours still open for a booking of `duration` hours on the day.
    pub async fn free_slots(
        &self,
        resource_id: &Ulid,
        date: NaiveDate,
        duration: u8,
    ) -> Result<Vec<Hour>, BookingError> {
        if !(MIN_BOOKING_HOURS..=MAX_BOOKING_HOURS).contains(&duration) {
            return Err(BookingError::OutOfWindow("duration must be 1 or 2 hours"));
        }
        let rs = self
            .get_resource(resource_id)
            .ok_or(BookingError::ResourceNotFound(*resource_id))?;
        let guard = rs.read().await;
        if !guard.is_active {
            return Err(BookingError::ResourceNotFound(*resource_id));
        }

        let taken = guard.on_date(date);
        let mut free = Vec::new();
        for start in OPENING_HOUR..=(CLOSING_HOUR - duration) {
            let slot = Slot::new(start, start + duration);
            let clash = taken
                .iter()
                .any(|b| b.status.blocks_slot() && b.slot.overlaps(&slot));
            if !clash {
                free.push(start);
            }
        }
        Ok(free)
    }

    /// Catalog listing, classrooms ordered by (building, room number) and
    /// playgrounds by name.
    pub async fn list_resources(
        &self,
        filter: Option<ResourceFilter>,
        active_only: bool,
    ) -> Vec<ResourceInfo> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(resources.len());
        for rs_arc in resources {
            let rs = rs_arc.read().await;
            if active_only && !rs.is_active {
                continue;
            }
            let keep = match filter {
                Some(ResourceFilter::Classrooms) => rs.kind.is_classroom(),
                Some(ResourceFilter::Playgrounds) => !rs.kind.is_classroom(),
                None => true,
            };
            if keep {
                out.push(ResourceInfo {
                    id: rs.id,
                    kind: rs.kind.clone(),
                    is_active: rs.is_active,
                });
            }
        }
        out.sort_by(|a, b| match (&a.kind, &b.kind) {
            (
                ResourceKind::Classroom {
                    building: ba,
                    room_number: ra,
                    ..
                },
                ResourceKind::Classroom {
                    building: bb,
                    room_number: rb,
                    ..
                },
            ) => (ba, ra).cmp(&(bb, rb)),
            (ResourceKind::Playground { name: na, .. }, ResourceKind::Playground { name: nb, .. }) => {
                na.cmp(nb)
            }
            // classrooms sort before playgrounds
            (ResourceKind::Classroom { .. }, ResourceKind::Playground { .. }) => {
                std::cmp::Ordering::Less
            }
            (ResourceKind::Playground { .. }, ResourceKind::Classroom { .. }) => {
                std::cmp::Ordering::Greater
            }
        });
        out
    }
}
