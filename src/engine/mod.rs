mod availability;
mod billing;
mod conflict;
mod error;
mod housekeeping;
mod offers;
mod queries;
mod registry;
mod reservations;

pub use availability::{free_ranges, matches_search, merge_overlapping, subtract_ranges};
pub use error::{EngineError, Unavailability};

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::model::*;
use crate::money::{Bps, TaxRate};
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedUnitState = Arc<RwLock<UnitState>>;

/// Engine-wide knobs that are not part of any unit's state.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub tax_rate: TaxRate,
    /// Upper bound on waiting for a unit's write lock before reporting `Conflict`.
    pub lock_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tax_rate: Bps::from_percent(15),
            lock_timeout: Duration::from_secs(2),
        }
    }
}

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

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Drain every Append already queued behind it.
/// 3. One flush_sync for the whole batch, then answer every sender.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
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
        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so half-written bytes don't leak
    // into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
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
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            commit_batch(wal, &mut batch);
        }
    }
}

pub struct Engine {
    pub state: DashMap<Ulid, SharedUnitState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: entity (reservation/offer/task/invoice) id → unit id
    pub(super) entity_to_unit: DashMap<Ulid, Ulid>,
    pub(super) rate_modifiers: RwLock<BTreeMap<Ulid, RateModifier>>,
    /// Held while a unit is being created and while the journal is compacted.
    pub(super) registry_lock: Mutex<()>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) settings: EngineSettings,
}

/// Every child entity id of a unit, for the reverse index.
fn entity_ids(st: &UnitState) -> impl Iterator<Item = Ulid> + '_ {
    st.reservations
        .iter()
        .map(|r| r.id)
        .chain(st.offers.iter().map(|o| o.id))
        .chain(st.tasks.iter().map(|t| t.id))
        .chain(st.invoices.iter().map(|i| i.id))
}

/// Apply an event directly to a UnitState (no locking; caller holds the lock).
/// Deterministic: replay of the same records rebuilds the same state.
fn apply_to_unit(st: &mut UnitState, event: &Event, entity_map: &DashMap<Ulid, Ulid>) {
    let unit_id = st.unit.id;
    match event {
        Event::UnitPriceSet { price, .. } => st.unit.base_price = *price,
        Event::UnitLocked { .. } => st.unit.occupancy = OccupancyStatus::Locked,
        Event::UnitUnlocked { .. } => {
            st.unit.occupancy = OccupancyStatus::Available;
            st.settle_occupancy();
        }
        Event::ReservationCreated { reservation } => {
            entity_map.insert(reservation.id, unit_id);
            st.insert_reservation(reservation.clone());
            st.settle_occupancy();
        }
        Event::ReservationConfirmed { id, at, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.confirmed_at = Some(*at);
            }
            st.settle_occupancy();
        }
        Event::GuestArrived { id, at, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.status = ReservationStatus::CheckedIn;
                r.actual_check_in = Some(*at);
            }
            st.settle_occupancy();
        }
        Event::GuestDeparted { id, task_id, at, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.status = ReservationStatus::Departed;
                r.actual_check_out = Some(*at);
            }
            st.settle_occupancy();
            if st.unit.housekeeping != HousekeepingStatus::Maintenance {
                st.set_housekeeping(HousekeepingStatus::Dirty, HousekeepingCause::Checkout, None, *at);
            }
            st.tasks.push(HousekeepingTask {
                id: *task_id,
                unit_id,
                kind: TaskKind::Clean,
                status: TaskStatus::Pending,
                priority: TaskPriority::Urgent,
                created_at: *at,
                started_at: None,
                completed_at: None,
                completed_by: None,
            });
            entity_map.insert(*task_id, unit_id);
        }
        Event::ReservationCancelled { id, at, .. } => {
            if let Some(r) = st.reservation_mut(id) {
                r.status = ReservationStatus::Cancelled;
                r.cancelled_at = Some(*at);
            }
            st.settle_occupancy();
        }
        Event::HousekeepingChanged { to, cause, by, at, .. } => {
            st.set_housekeeping(*to, *cause, by.clone(), *at);
        }
        Event::TaskCreated { task, by } => {
            entity_map.insert(task.id, unit_id);
            st.tasks.push(task.clone());
            if task.kind == TaskKind::Maintenance
                && st.unit.housekeeping != HousekeepingStatus::Maintenance
            {
                st.set_housekeeping(
                    HousekeepingStatus::Maintenance,
                    HousekeepingCause::TaskCreated(task.id),
                    by.clone(),
                    task.created_at,
                );
            }
        }
        Event::TaskStarted { id, by, at, .. } => {
            let kind = st.task_mut(id).map(|task| {
                task.status = TaskStatus::InProgress;
                task.started_at = Some(*at);
                task.kind
            });
            let next = match (kind, st.unit.housekeeping) {
                (Some(TaskKind::Clean | TaskKind::DeepClean), HousekeepingStatus::Dirty) => {
                    Some(HousekeepingStatus::Cleaning)
                }
                (Some(TaskKind::Inspection), HousekeepingStatus::Cleaning) => {
                    Some(HousekeepingStatus::Inspection)
                }
                _ => None,
            };
            if let Some(to) = next {
                st.set_housekeeping(to, HousekeepingCause::TaskStarted(*id), Some(by.clone()), *at);
            }
        }
        Event::TaskCompleted { id, by, at, .. } => {
            let kind = st.task_mut(id).map(|task| {
                task.status = TaskStatus::Done;
                task.completed_at = Some(*at);
                task.completed_by = Some(by.clone());
                task.kind
            });
            let current = st.unit.housekeeping;
            let cleans = match kind {
                Some(TaskKind::Maintenance) => {
                    current == HousekeepingStatus::Maintenance
                        && !st
                            .tasks
                            .iter()
                            .any(|t| t.kind == TaskKind::Maintenance && t.status != TaskStatus::Done)
                }
                Some(_) => !matches!(current, HousekeepingStatus::Maintenance | HousekeepingStatus::Clean),
                None => false,
            };
            if cleans {
                st.set_housekeeping(
                    HousekeepingStatus::Clean,
                    HousekeepingCause::TaskCompleted(*id),
                    Some(by.clone()),
                    *at,
                );
            }
        }
        Event::OfferCreated { offer } => {
            entity_map.insert(offer.id, unit_id);
            st.offers.push(offer.clone());
        }
        Event::OfferApplied {
            id,
            recorded_original_price,
            ..
        } => {
            if let Some(o) = st.offer_mut(id)
                && o.recorded_original_price.is_none() {
                    o.recorded_original_price = Some(*recorded_original_price);
                }
        }
        Event::OfferReverted { id, .. } => {
            if let Some(o) = st.offer_mut(id) {
                o.recorded_original_price = None;
            }
        }
        Event::OfferExpired { id, .. } => {
            if let Some(o) = st.offer_mut(id) {
                o.status = OfferStatus::Expired;
                o.recorded_original_price = None;
            }
        }
        Event::InvoiceCreated { invoice } => {
            entity_map.insert(invoice.id, unit_id);
            st.invoices.push(invoice.clone());
        }
        Event::InvoiceIssued { id, .. } => {
            if let Some(inv) = st.invoice_mut(id) {
                inv.status = InvoiceStatus::Issued;
            }
        }
        Event::PaymentRecorded {
            invoice_id,
            amount,
            at,
            ..
        } => {
            if let Some(inv) = st.invoice_mut(invoice_id) {
                inv.amount_paid = inv.amount_paid.saturating_add(*amount);
                inv.payments.push(Payment {
                    amount: *amount,
                    at: *at,
                });
                inv.status = InvoiceStatus::from_amounts(inv.amount_paid, inv.total);
            }
        }
        Event::InvoiceCancelled { id, .. } => {
            if let Some(inv) = st.invoice_mut(id) {
                inv.status = InvoiceStatus::Cancelled;
            }
        }
        // Registry-level records are handled outside any single unit.
        Event::UnitCreated { .. }
        | Event::UnitSnapshot { .. }
        | Event::RateModifierAdded { .. }
        | Event::RateModifierRemoved { .. } => return,
    }
    bump(st);
}

fn bump(st: &mut UnitState) {
    st.unit.version += 1;
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Self::open(
            wal_path,
            notify,
            Arc::new(SystemClock::utc()),
            EngineSettings::default(),
        )
    }

    /// Replay the journal at `wal_path` and start the group-commit writer.
    /// Must be called from within a Tokio runtime.
    pub fn open(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;

        let entity_to_unit = DashMap::new();
        let mut units: HashMap<Ulid, UnitState> = HashMap::new();
        let mut rate_modifiers = BTreeMap::new();

        for event in &events {
            match event {
                Event::UnitCreated { unit } => {
                    units.insert(unit.id, UnitState::new(unit.clone()));
                }
                Event::UnitSnapshot { state } => {
                    for id in entity_ids(state) {
                        entity_to_unit.insert(id, state.unit.id);
                    }
                    units.insert(state.unit.id, state.clone());
                }
                Event::RateModifierAdded { modifier } => {
                    rate_modifiers.insert(modifier.id, modifier.clone());
                }
                Event::RateModifierRemoved { id } => {
                    rate_modifiers.remove(id);
                }
                other => {
                    if let Some(unit_id) = other.unit_id()
                        && let Some(st) = units.get_mut(&unit_id) {
                            apply_to_unit(st, other, &entity_to_unit);
                        }
                }
            }
        }

        let state = DashMap::new();
        for (id, st) in units {
            state.insert(id, Arc::new(RwLock::new(st)));
        }

        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            state,
            wal_tx,
            notify,
            entity_to_unit,
            rate_modifiers: RwLock::new(rate_modifiers),
            registry_lock: Mutex::new(()),
            clock,
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
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

    pub fn get_unit_state(&self, id: &Ulid) -> Option<SharedUnitState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn get_unit_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_unit.get(entity_id).map(|e| *e.value())
    }

    /// Exclusive access to one unit's entity set, bounded by `lock_timeout`.
    pub(super) async fn write_unit(
        &self,
        unit_id: Ulid,
    ) -> Result<OwnedRwLockWriteGuard<UnitState>, EngineError> {
        let st = self
            .get_unit_state(&unit_id)
            .ok_or(EngineError::NotFound(unit_id))?;
        match tokio::time::timeout(self.settings.lock_timeout, st.write_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                metrics::counter!(observability::LOCK_TIMEOUTS_TOTAL).increment(1);
                tracing::warn!("timed out waiting for unit {unit_id}");
                Err(EngineError::Conflict(unit_id))
            }
        }
    }

    /// Lookup entity → unit, then take the unit's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity_id: &Ulid,
    ) -> Result<(Ulid, OwnedRwLockWriteGuard<UnitState>), EngineError> {
        let unit_id = self
            .get_unit_for_entity(entity_id)
            .ok_or(EngineError::NotFound(*entity_id))?;
        let guard = self.write_unit(unit_id).await?;
        Ok((unit_id, guard))
    }

    /// WAL-append + apply + notify. The record is durable before any reader
    /// can observe its effect.
    pub(super) async fn persist_and_apply(
        &self,
        unit_id: Ulid,
        st: &mut UnitState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_unit(st, event, &self.entity_to_unit);
        self.notify.send(unit_id, event);
        Ok(())
    }

    /// Rate modifiers sorted by id, cloned out of the lock.
    pub async fn rate_modifier_snapshot(&self) -> Vec<RateModifier> {
        self.rate_modifiers.read().await.values().cloned().collect()
    }

    /// Rewrite the journal as one snapshot per unit plus the live rate
    /// modifiers. Every unit is read-locked until the swap completes, so no
    /// committed write can fall between snapshot and swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _registry = self.registry_lock.lock().await;
        let modifiers = self.rate_modifiers.read().await;

        let mut ids: Vec<Ulid> = self.state.iter().map(|e| *e.key()).collect();
        ids.sort();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(st) = self.get_unit_state(&id) {
                guards.push(st.read_owned().await);
            }
        }

        let mut events: Vec<Event> = guards
            .iter()
            .map(|g| Event::UnitSnapshot {
                state: (**g).clone(),
            })
            .collect();
        events.extend(modifiers.values().map(|m| Event::RateModifierAdded {
            modifier: m.clone(),
        }));

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
