mod conflict;
mod error;
mod mutations;
mod queries;

pub use conflict::now_local;
pub use error::BookingError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

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
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
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

/// The booking scheduling core. The engine *is* the storage layer: the
/// conflict check, WAL append and in-memory apply for a booking all run
/// under that resource's write lock, so two concurrent requests for
/// overlapping slots on the same resource serialize — one books, one
/// gets `SlotTaken`.
pub struct Engine {
    pub state: DashMap<Ulid, SharedResourceState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: booking id → (resource id, date).
    pub(super) booking_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    /// Owner → booking ids, for user history queries.
    pub(super) owner_index: DashMap<Ulid, Vec<Ulid>>,
    /// Display name → resource id, to refuse duplicate catalog entries.
    pub(super) name_index: DashMap<String, Ulid>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            booking_index: DashMap::new(),
            owner_index: DashMap::new(),
            name_index: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_write
        // always succeeds instantly (no contention). Never use blocking_write
        // here because this may run inside an async context.
        for event in &events {
            match event {
                Event::ResourceAdded { id, kind } => {
                    engine.name_index.insert(kind.display_name().to_owned(), *id);
                    let rs = ResourceState::new(*id, kind.clone());
                    engine.state.insert(*id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Some(resource_id) = event_resource_id(other)
                        && let Some(entry) = engine.state.get(&resource_id)
                    {
                        let rs_arc = entry.clone();
                        let mut guard = rs_arc.try_write().expect("replay: uncontended write");
                        engine.apply_to_resource(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Apply an event directly to a ResourceState (no locking — caller
    /// holds the lock) and keep the reverse indexes in step.
    fn apply_to_resource(&self, rs: &mut ResourceState, event: &Event) {
        match event {
            Event::ResourceDeactivated { .. } => {
                rs.is_active = false;
            }
            Event::BookingCreated { booking } => {
                self.booking_index
                    .insert(booking.id, (booking.resource_id, booking.date));
                self.owner_index
                    .entry(booking.owner)
                    .or_default()
                    .push(booking.id);
                rs.insert_booking(booking.clone());
            }
            Event::BookingCancelled { id, date, at, .. } => {
                if let Some(booking) = rs.booking_mut(*date, *id) {
                    booking.status = BookingStatus::Cancelled;
                    booking.updated_at = *at;
                }
            }
            // ResourceAdded is handled at the DashMap level, not here
            Event::ResourceAdded { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), BookingError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| BookingError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| BookingError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| BookingError::WalError(e.to_string()))
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    /// WAL-append + apply in one call, under the caller's write lock.
    /// The append completing before the apply is what makes a booking
    /// durable before it is visible.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), BookingError> {
        self.wal_append(event).await?;
        self.apply_to_resource(rs, event);
        Ok(())
    }

    /// Lookup booking → resource, get resource, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, NaiveDate, tokio::sync::OwnedRwLockWriteGuard<ResourceState>), BookingError>
    {
        let (resource_id, date) = self
            .booking_index
            .get(booking_id)
            .map(|e| *e.value())
            .ok_or(BookingError::BookingNotFound(*booking_id))?;
        let rs = self
            .get_resource(&resource_id)
            .ok_or(BookingError::BookingNotFound(*booking_id))?;
        let guard = rs.write_owned().await;
        Ok((resource_id, date, guard))
    }
}

/// Extract the resource id from an event (for non-Add events).
fn event_resource_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::ResourceDeactivated { id } => Some(*id),
        Event::BookingCreated { booking } => Some(booking.resource_id),
        Event::BookingCancelled { resource_id, .. } => Some(*resource_id),
        Event::ResourceAdded { .. } => None,
    }
}
