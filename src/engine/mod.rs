mod availability;
mod error;
mod mutations;
mod pricing;
mod queries;
mod store;
mod validation;

pub use availability::{active_bookings_overlapping, find_conflict, is_available};
pub use error::EngineError;
pub use pricing::{applicable_exception, day_rate, quote, round_money};
pub use store::Catalog;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::warn;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedSpotState = Arc<RwLock<SpotState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Control(WalControl),
}

pub(super) enum WalControl {
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then pays for a single fsync for the whole batch.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::Control(control) => {
                handle_control(&mut wal, control);
                continue;
            }
        };

        let mut batch = vec![(event, response)];
        let mut deferred = None;
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                WalCommand::Control(control) => {
                    // Appends queued ahead of a control command land first.
                    deferred = Some(control);
                    break;
                }
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(control) = deferred {
            handle_control(&mut wal, control);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let append_result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes don't
    // leak into the next batch.
    let flush_result = wal.flush_sync();
    append_result.and(flush_result)
}

fn handle_control(wal: &mut Wal, control: WalControl) {
    match control {
        WalControl::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalControl::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

/// Availability-and-pricing engine for one tenant.
pub struct Engine {
    pub(super) spots: DashMap<Ulid, SharedSpotState>,
    pub(super) catalog: Catalog,
    /// Reverse lookup: booking id → spot id
    pub(super) booking_to_spot: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss a concurrent append.
    pub(super) write_gate: RwLock<()>,
}

/// Apply a booking event to its spot. Caller holds the spot lock.
/// The spot's exclusion constraint has the final say.
fn apply_to_spot(spot: &mut SpotState, event: &Event, index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated { booking, history } => {
            match spot.insert_booking(booking.clone()) {
                Ok(()) => {
                    index.insert(booking.id, spot.id);
                    for entry in history {
                        spot.record_payment_change(entry.clone());
                    }
                }
                Err(conflict) => warn!(
                    "refusing booking {} on spot {}: overlaps active booking {conflict}",
                    booking.id, spot.id
                ),
            }
        }
        Event::BookingUpdated {
            booking,
            payment_change,
        } => match spot.replace_booking(booking.clone()) {
            Ok(()) => {
                if let Some(entry) = payment_change {
                    spot.record_payment_change(entry.clone());
                }
            }
            Err(conflict) => warn!(
                "refusing update of booking {} on spot {}: overlaps active booking {conflict}",
                booking.id, spot.id
            ),
        },
        Event::BookingDeleted { id, .. } => {
            spot.remove_booking(*id);
            index.remove(id);
        }
        // Catalog events are handled by Engine::apply_catalog
        _ => {}
    }
}

/// Spot targeted by a booking event; `None` for catalog events.
fn event_spot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { booking, .. } | Event::BookingUpdated { booking, .. } => {
            Some(booking.spot_id)
        }
        Event::BookingDeleted { spot_id, .. } => Some(*spot_id),
        _ => None,
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            spots: DashMap::new(),
            catalog: Catalog::new(),
            booking_to_spot: DashMap::new(),
            wal_tx,
            write_gate: RwLock::new(()),
        };

        // We're the sole owner of these Arcs, so try_write never contends.
        // Never use blocking_write here: this may run inside an async context.
        for event in &events {
            match event_spot_id(event) {
                Some(spot_id) => {
                    let Some(spot) = engine.get_spot(&spot_id) else {
                        warn!("replay: booking event for unknown spot {spot_id}");
                        continue;
                    };
                    let Ok(mut guard) = spot.try_write() else {
                        warn!("replay: spot {spot_id} unexpectedly locked");
                        continue;
                    };
                    apply_to_spot(&mut guard, event, &engine.booking_to_spot);
                }
                None => engine.apply_catalog(event),
            }
        }

        tracing::debug!("replayed {} WAL events from {}", events.len(), wal_path.display());
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
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) async fn wal_control<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> WalControl,
    ) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Control(build(tx)))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))
    }

    /// Catalog side of an event: locations, spots, pricing exceptions.
    fn apply_catalog(&self, event: &Event) {
        match event {
            Event::SpotCreated {
                id,
                location_id,
                number,
            } => {
                let spot = SpotState::new(*id, *location_id, number.clone());
                self.spots.insert(*id, Arc::new(RwLock::new(spot)));
            }
            Event::SpotDeleted { id, .. } => {
                self.spots.remove(id);
            }
            _ => {}
        }
        self.catalog.apply_event(event);
    }

    pub fn get_spot(&self, id: &Ulid) -> Option<SharedSpotState> {
        self.spots.get(id).map(|e| e.value().clone())
    }

    pub fn get_spot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_spot.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply for a booking event on a locked spot.
    pub(super) async fn persist_and_apply(
        &self,
        spot: &mut SpotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_spot(spot, event, &self.booking_to_spot);
        Ok(())
    }

    /// WAL-append + apply for a catalog event.
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_catalog(event);
        Ok(())
    }

    /// Location owned by `caller`. Someone else's location is indistinguishable from a missing one.
    pub(super) fn owned_location(
        &self,
        caller: &UserId,
        location_id: Ulid,
    ) -> Result<Location, EngineError> {
        self.catalog
            .location(&location_id)
            .filter(|l| &l.owner == caller)
            .ok_or(EngineError::NotFound(location_id))
    }

    /// Lookup location + spot, checking the spot belongs to that location and the caller owns it.
    pub(super) fn resolve_spot(
        &self,
        caller: &UserId,
        location_id: Ulid,
        spot_id: Ulid,
    ) -> Result<(Location, SharedSpotState), EngineError> {
        let location = self.owned_location(caller, location_id)?;
        if self.catalog.spot_location(&spot_id) != Some(location_id) {
            return Err(EngineError::NotFound(spot_id));
        }
        let spot = self
            .get_spot(&spot_id)
            .ok_or(EngineError::NotFound(spot_id))?;
        Ok((location, spot))
    }

    fn booking_spot(
        &self,
        caller: &UserId,
        booking_id: Ulid,
    ) -> Result<(Location, SharedSpotState), EngineError> {
        let spot_id = self
            .get_spot_for_booking(&booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let location_id = self
            .catalog
            .spot_location(&spot_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        let location = self
            .owned_location(caller, location_id)
            .map_err(|_| EngineError::NotFound(booking_id))?;
        let spot = self
            .get_spot(&spot_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        Ok((location, spot))
    }

    /// Lookup booking → spot, check ownership, acquire the spot's write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        caller: &UserId,
        booking_id: Ulid,
    ) -> Result<(Location, OwnedRwLockWriteGuard<SpotState>), EngineError> {
        let (location, spot) = self.booking_spot(caller, booking_id)?;
        let guard = spot.write_owned().await;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok((location, guard))
    }

    pub(super) async fn resolve_booking_read(
        &self,
        caller: &UserId,
        booking_id: Ulid,
    ) -> Result<OwnedRwLockReadGuard<SpotState>, EngineError> {
        let (_, spot) = self.booking_spot(caller, booking_id)?;
        let guard = spot.read_owned().await;
        if guard.booking(booking_id).is_none() {
            return Err(EngineError::NotFound(booking_id));
        }
        Ok(guard)
    }
}
