use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tokio::sync::{RwLock, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_cancellable, check_no_conflict, validate_details, validate_slot};
use super::{BookingError, Engine, WalCommand};

impl Engine {
    /// Add a resource to the catalog. Display names are unique — a second
    /// "CC1-001" is refused, not silently duplicated.
    pub async fn add_resource(&self, kind: ResourceKind) -> Result<Ulid, BookingError> {
        let name = kind.display_name();
        if name.is_empty() {
            return Err(BookingError::MissingField("name"));
        }
        if name.len() > MAX_TEXT_LEN {
            return Err(BookingError::LimitExceeded("resource name too long"));
        }
        if self.state.len() >= MAX_RESOURCES {
            return Err(BookingError::LimitExceeded("resource catalog full"));
        }

        let id = Ulid::new();
        // Reserve the name before the WAL round-trip so a concurrent add
        // of the same name loses immediately.
        if let Some(existing) = self.name_index.insert(name.to_owned(), id)
            && existing != id
        {
            self.name_index.insert(name.to_owned(), existing);
            return Err(BookingError::AlreadyExists(existing));
        }

        let event = Event::ResourceAdded {
            id,
            kind: kind.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.name_index.remove(name);
            return Err(e);
        }
        self.state
            .insert(id, Arc::new(RwLock::new(ResourceState::new(id, kind))));
        Ok(id)
    }

    /// Retire a resource: it stops accepting bookings but its history
    /// stays queryable.
    pub async fn deactivate_resource(&self, id: &Ulid) -> Result<(), BookingError> {
        let rs = self
            .get_resource(id)
            .ok_or(BookingError::ResourceNotFound(*id))?;
        let mut guard = rs.write().await;
        if !guard.is_active {
            return Ok(()); // idempotent
        }
        let event = Event::ResourceDeactivated { id: *id };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Populate the standard campus catalog: 20 rooms in each of CC1–CC3,
    /// plus the five playgrounds. No-op when the catalog is non-empty.
    pub async fn seed_catalog(&self) -> Result<usize, BookingError> {
        if !self.state.is_empty() {
            return Ok(0);
        }
        let mut added = 0;
        for building in Building::ALL {
            for room in 1..=20u32 {
                self.add_resource(ResourceKind::Classroom {
                    room_number: format!("{}-{:03}", building.as_str(), room),
                    building,
                    capacity: 60,
                    facilities: vec![Facility::Projector, Facility::Whiteboard, Facility::Ac],
                })
                .await?;
                added += 1;
            }
        }
        let playgrounds: [(&str, GroundType, u32, &[&str]); 5] = [
            (
                "Cricket Ground",
                GroundType::Outdoor,
                22,
                &["Stumps", "Nets"],
            ),
            (
                "Football Ground",
                GroundType::Outdoor,
                22,
                &["Goal Posts", "Corner Flags"],
            ),
            (
                "Basketball Court",
                GroundType::Outdoor,
                10,
                &["Hoops", "Scoreboard"],
            ),
            ("Volleyball Court", GroundType::Outdoor, 12, &["Net"]),
            ("Swimming Pool", GroundType::Aquatic, 20, &["Lane Ropes"]),
        ];
        for (name, ground, max_players, equipment) in playgrounds {
            self.add_resource(ResourceKind::Playground {
                name: name.to_owned(),
                ground,
                max_players,
                equipment: equipment.iter().map(|e| (*e).to_owned()).collect(),
            })
            .await?;
            added += 1;
        }
        info!(resources = added, "seeded campus catalog");
        Ok(added)
    }

    /// Book a resource for a slot. The entire check-then-book sequence runs
    /// under the resource's write lock, so concurrent requests for
    /// overlapping slots cannot both succeed.
    #[allow(clippy::too_many_arguments)]
    pub async fn request_booking(
        &self,
        owner: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        start: Hour,
        duration: u8,
        details: BookingDetails,
        now: NaiveDateTime,
    ) -> Result<Booking, BookingError> {
        let slot = validate_slot(start, duration)?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(BookingError::ResourceNotFound(resource_id))?;

        let mut guard = rs.write().await;
        if !guard.is_active {
            // A retired resource is gone as far as new bookings go.
            return Err(BookingError::ResourceNotFound(resource_id));
        }
        validate_details(&details, &guard.kind)?;
        if let Err(e) = check_no_conflict(&guard, date, &slot) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(e);
        }

        let booking = Booking {
            id: Ulid::new(),
            owner,
            resource_id,
            date,
            slot,
            details,
            status: BookingStatus::Approved,
            notes: None,
            created_at: now,
            updated_at: now,
        };
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        info!(
            booking = %booking.id,
            resource = %resource_id,
            %date,
            start = slot.start,
            end = slot.end,
            "booking created"
        );
        Ok(booking)
    }

    /// Cancel a booking the user owns, provided strictly more than the
    /// lead time remains before it starts. Returns the updated booking.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        user: Ulid,
        now: NaiveDateTime,
    ) -> Result<Booking, BookingError> {
        let (resource_id, date, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let booking = guard
            .booking(date, booking_id)
            .ok_or(BookingError::BookingNotFound(booking_id))?;
        check_cancellable(booking, user, now)?;

        let event = Event::BookingCancelled {
            id: booking_id,
            resource_id,
            date,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        info!(booking = %booking_id, resource = %resource_id, "booking cancelled");
        let cancelled = guard
            .booking(date, booking_id)
            .expect("booking present after cancel")
            .clone();
        Ok(cancelled)
    }

    /// Rewrite the WAL as a snapshot of current state: one ResourceAdded
    /// per resource, a Deactivated marker where needed, and every stored
    /// booking (cancelled ones included — they are history, not garbage).
    ///
    /// All resource read locks are held from the start of the snapshot
    /// until the Compact command is in the WAL channel. Appends are
    /// enqueued under the resource write lock, so this ordering puts
    /// every acked append either in the snapshot or behind the Compact
    /// in the queue — never silently dropped by the rewrite.
    pub async fn compact_wal(&self) -> Result<(), BookingError> {
        let resources: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut guards = Vec::with_capacity(resources.len());
        for rs_arc in &resources {
            guards.push(rs_arc.clone().read_owned().await);
        }

        let mut events = Vec::new();
        for rs in &guards {
            events.push(Event::ResourceAdded {
                id: rs.id,
                kind: rs.kind.clone(),
            });
            if !rs.is_active {
                events.push(Event::ResourceDeactivated { id: rs.id });
            }
            for day in rs.days.values() {
                for booking in day {
                    events.push(Event::BookingCreated {
                        booking: booking.clone(),
                    });
                }
            }
        }

        let (tx, rx) = oneshot::channel();
        let sent = self
            .wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await;
        // Locks may only drop once the Compact is queued; the file
        // rewrite itself happens in the writer task and needs no locks.
        drop(guards);
        sent.map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> Result<u64, BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))
    }
}
