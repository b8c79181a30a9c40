mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;
mod store;

pub use availability::{occupied_tables, remaining_tables, slot_availability};
pub use error::EngineError;
pub use store::ReservationIndex;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::dispatch::Dispatcher;
use crate::model::*;
use crate::wal::Wal;

pub type SharedRestaurantState = Arc<RwLock<RestaurantState>>;

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
/// Waits for one append, drains whatever else is already queued, then
/// fsyncs once for the whole batch before answering every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_non_append(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stale bytes never reach the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedRestaurantState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub dispatch: Arc<Dispatcher>,
    pub(super) index: ReservationIndex,
    /// Held shared by every mutation from before it takes a restaurant lock
    /// until its event is applied; compaction holds it exclusively so the
    /// snapshot matches the log.
    pub(super) commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, dispatch: Arc<Dispatcher>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            state: DashMap::new(),
            wal_tx,
            dispatch,
            index: ReservationIndex::new(),
            commit_gate: RwLock::new(()),
        };

        // Sole owner of every Arc during replay, so try_write never contends.
        // Blocking locks are off-limits: this may run inside the runtime.
        for event in &events {
            match event {
                Event::RestaurantCreated { restaurant } => {
                    let rs = RestaurantState::new(restaurant.clone());
                    engine.state.insert(restaurant.id, Arc::new(RwLock::new(rs)));
                }
                other => {
                    if let Some(entry) = engine.state.get(&other.restaurant_id()) {
                        let rs = entry.value().clone();
                        let mut guard = rs.try_write().map_err(|_| {
                            io::Error::other("replay: restaurant state unexpectedly locked")
                        })?;
                        engine.index.apply_event(&mut guard, other);
                    }
                }
            }
        }
        metrics::gauge!(crate::observability::RESTAURANTS_ACTIVE).set(engine.state.len() as f64);
        tracing::info!(
            "replayed {} events ({} restaurants) from {}",
            events.len(),
            engine.state.len(),
            wal_path.display()
        );

        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
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

    pub fn get_restaurant_state(&self, id: &Ulid) -> Option<SharedRestaurantState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn restaurant_count(&self) -> usize {
        self.state.len()
    }

    /// WAL-append then apply, under the caller's write lock.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RestaurantState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.index.apply_event(rs, event);
        Ok(())
    }

    /// Look up a reservation's restaurant and take its write lock.
    pub(super) async fn resolve_reservation_write(
        &self,
        reservation_id: &Ulid,
        not_found: &str,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RestaurantState>, EngineError> {
        let restaurant_id = self
            .index
            .restaurant_of(reservation_id)
            .ok_or_else(|| EngineError::NotFound(not_found.to_string()))?;
        let rs = self
            .get_restaurant_state(&restaurant_id)
            .ok_or_else(|| EngineError::NotFound(not_found.to_string()))?;
        Ok(rs.write_owned().await)
    }

    /// Rewrite the WAL as the minimal event set that recreates current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.commit_gate.write().await;

        let states: Vec<SharedRestaurantState> =
            self.state.iter().map(|e| e.value().clone()).collect();
        let mut events = Vec::new();
        for rs in states {
            let guard = rs.read().await;
            events.push(Event::RestaurantCreated {
                restaurant: guard.restaurant.clone(),
            });
            events.extend(guard.reservations.iter().map(|r| Event::ReservationCreated {
                reservation: r.clone(),
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
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
