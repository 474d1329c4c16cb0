mod booking;
mod capacity;
mod error;
mod intake;
mod queries;
mod resolver;
mod schedule;

pub use capacity::{count_active_bookings, has_capacity};
pub use error::EngineError;
pub use queries::BookingFilter;
pub use resolver::ResolvedAdmin;

use std::io;
use std::path::PathBuf;

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedSlotState = Arc<RwLock<SlotState>>;

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
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch.as_slice());
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &[(Event, oneshot::Sender<io::Result<()>>)],
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

/// The fulfillment scheduling core. All durable state lives in the WAL;
/// these maps are the replayed working set.
///
/// Locking discipline: each slot's record and its bookings share one
/// `RwLock`. Admission (capacity, duplicate, temporal checks) and the
/// booking write happen under that slot's write lock, which is what makes
/// the check-then-act sequence atomic per slot. The uniqueness index is a
/// separate store-level constraint claimed inside the same critical
/// section, covering duplicates across different slots.
pub struct Engine {
    slots: DashMap<Ulid, SharedSlotState>,
    deliveries: DashMap<Ulid, Arc<RwLock<DeliveryRecord>>>,
    delivery_by_product: DashMap<Ulid, Ulid>,
    assignments: DashMap<Ulid, OrderAssignment>,
    assignment_by_product: DashMap<Ulid, Ulid>,
    admins: DashMap<Ulid, AdminProfile>,
    admin_by_email: DashMap<String, Ulid>,
    /// Active-booking uniqueness index: at most one non-cancelled booking
    /// per key, claimed atomically during admission.
    booking_index: DashMap<BookingKey, Ulid>,
    booking_to_slot: DashMap<Ulid, Ulid>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            slots: DashMap::new(),
            deliveries: DashMap::new(),
            delivery_by_product: DashMap::new(),
            assignments: DashMap::new(),
            assignment_by_product: DashMap::new(),
            admins: DashMap::new(),
            admin_by_email: DashMap::new(),
            booking_index: DashMap::new(),
            booking_to_slot: DashMap::new(),
            wal_tx,
            notify,
        };

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly (no contention). Never block here: this may
        // run inside an async context.
        for event in &events {
            match event {
                Event::AdminRegistered { admin } => engine.index_admin(admin.clone()),
                Event::SlotPublished { slot } => {
                    engine
                        .slots
                        .insert(slot.id, Arc::new(RwLock::new(SlotState::new(slot.clone()))));
                }
                Event::DeliveryRecorded { delivery } => engine.index_delivery(delivery.clone()),
                Event::DeliveryStatusChanged { id, status, at } => {
                    if let Some(entry) = engine.deliveries.get(id) {
                        let rec = entry.value().clone();
                        let mut guard = rec.try_write().expect("replay: uncontended write");
                        apply_delivery_status(&mut guard, *status, *at);
                    }
                }
                Event::AssignmentRecorded { assignment } => {
                    engine.index_assignment(assignment.clone());
                }
                other => {
                    if let Some(slot_id) = event_slot_id(other)
                        && let Some(entry) = engine.slots.get(&slot_id)
                    {
                        let state = entry.value().clone();
                        let mut guard = state.try_write().expect("replay: uncontended write");
                        engine.apply_to_slot(&mut guard, other);
                    }
                }
            }
        }

        Ok(engine)
    }

    /// Write an event to the WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
    }

    pub fn get_slot(&self, id: &Ulid) -> Option<SharedSlotState> {
        self.slots.get(id).map(|e| e.value().clone())
    }

    pub fn slot_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_slot.get(booking_id).map(|e| *e.value())
    }

    pub fn get_delivery(&self, id: &Ulid) -> Option<Arc<RwLock<DeliveryRecord>>> {
        self.deliveries.get(id).map(|e| e.value().clone())
    }

    pub fn admin_profile(&self, id: &Ulid) -> Option<AdminProfile> {
        self.admins.get(id).map(|e| e.value().clone())
    }

    pub(super) fn admin_id_for_email(&self, email: &str) -> Option<Ulid> {
        self.admin_by_email.get(email).map(|e| *e.value())
    }

    pub(super) fn assignment_for_product(&self, product_id: &Ulid) -> Option<OrderAssignment> {
        let order_id = self.assignment_by_product.get(product_id)?;
        self.assignments.get(&order_id).map(|e| e.value().clone())
    }

    pub(super) fn delivery_for_product(&self, product_id: &Ulid) -> Option<Arc<RwLock<DeliveryRecord>>> {
        let delivery_id = self.delivery_by_product.get(product_id)?;
        self.deliveries.get(&delivery_id).map(|e| e.value().clone())
    }

    pub(super) fn active_booking_for(&self, key: &BookingKey) -> Option<Ulid> {
        self.booking_index.get(key).map(|e| *e.value())
    }

    /// Claim the uniqueness key for a new booking. Fails with the existing
    /// booking's id if an active booking already holds it. The dashmap
    /// entry lock makes concurrent claims race-free across slots.
    pub(super) fn claim_booking_key(&self, key: BookingKey, booking_id: Ulid) -> Result<(), EngineError> {
        use dashmap::mapref::entry::Entry;
        match self.booking_index.entry(key) {
            Entry::Occupied(e) => Err(EngineError::DuplicateBooking(*e.get())),
            Entry::Vacant(v) => {
                v.insert(booking_id);
                Ok(())
            }
        }
    }

    pub(super) fn release_booking_key(&self, key: &BookingKey) {
        self.booking_index.remove(key);
    }

    pub(super) fn index_admin(&self, admin: AdminProfile) {
        self.admin_by_email.insert(admin.email.clone(), admin.id);
        self.admins.insert(admin.id, admin);
    }

    pub(super) fn index_delivery(&self, delivery: DeliveryRecord) {
        // A cancelled leg never displaces a live one in the product index;
        // compacted logs emit delivery records in arbitrary order.
        if delivery.status == DeliveryStatus::Cancelled {
            self.delivery_by_product
                .entry(delivery.product_id)
                .or_insert(delivery.id);
        } else {
            self.delivery_by_product
                .insert(delivery.product_id, delivery.id);
        }
        let id = delivery.id;
        self.deliveries.insert(id, Arc::new(RwLock::new(delivery)));
    }

    pub(super) fn index_assignment(&self, assignment: OrderAssignment) {
        self.assignment_by_product
            .insert(assignment.product_id, assignment.order_id);
        self.assignments.insert(assignment.order_id, assignment);
    }

    pub(super) fn insert_slot(&self, slot: ScheduleSlot) {
        self.slots
            .insert(slot.id, Arc::new(RwLock::new(SlotState::new(slot))));
    }

    pub(super) fn slot_states(&self) -> Vec<SharedSlotState> {
        self.slots.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn assignment_records(&self) -> Vec<OrderAssignment> {
        self.assignments.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn delivery_records(&self) -> Vec<Arc<RwLock<DeliveryRecord>>> {
        self.deliveries.iter().map(|e| e.value().clone()).collect()
    }

    pub(super) fn admin_profiles(&self) -> Vec<AdminProfile> {
        self.admins.iter().map(|e| e.value().clone()).collect()
    }

    /// Apply a slot-scoped event to locked slot state, keeping the
    /// booking indexes in step. Caller holds the slot's write lock.
    pub(super) fn apply_to_slot(&self, state: &mut SlotState, event: &Event) {
        match event {
            Event::SlotStatusChanged { status, .. } => {
                state.slot.status = *status;
            }
            Event::BookingCreated { booking } => {
                self.booking_to_slot.insert(booking.id, booking.slot_id);
                if booking.status.counts_against_capacity() {
                    self.booking_index.insert(booking.dedup_key(), booking.id);
                }
                state.bookings.push(booking.clone());
            }
            Event::BookingStatusChanged {
                id,
                status,
                admin_notes,
                at,
                ..
            } => {
                if let Some(b) = state.find_booking_mut(*id) {
                    b.status = *status;
                    b.updated_at = *at;
                    if admin_notes.is_some() {
                        b.admin_notes = admin_notes.clone();
                    }
                    if !status.counts_against_capacity() {
                        let key = b.dedup_key();
                        self.booking_index.remove(&key);
                    }
                }
            }
            _ => {}
        }
    }

    /// WAL-append + apply + notify in one call, under the caller's slot
    /// write lock. A booking is observable only after it is durable.
    pub(super) async fn persist_and_apply(
        &self,
        state: &mut SlotState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_slot(state, event);
        for actor in event_recipients(state, event) {
            self.notify.send(actor, event);
        }
        Ok(())
    }

    /// Lookup booking → slot, get slot state, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<SlotState>), EngineError> {
        let slot_id = self
            .slot_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let state = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let guard = state.write_owned().await;
        Ok((slot_id, guard))
    }

    /// Compact the WAL down to the events that recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for admin in self.admin_profiles() {
            events.push(Event::AdminRegistered { admin });
        }
        for rec in self.delivery_records() {
            let delivery = rec.read().await.clone();
            events.push(Event::DeliveryRecorded { delivery });
        }
        for assignment in self.assignment_records() {
            events.push(Event::AssignmentRecorded { assignment });
        }
        // Slots before their bookings — replay resolves bookings by slot.
        for state in self.slot_states() {
            let guard = state.read().await;
            events.push(Event::SlotPublished {
                slot: guard.slot.clone(),
            });
            for booking in &guard.bookings {
                events.push(Event::BookingCreated {
                    booking: booking.clone(),
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Wal(e.to_string()))
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

/// Extract the slot id from a slot-scoped event.
fn event_slot_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::SlotStatusChanged { id, .. } => Some(*id),
        Event::BookingCreated { booking } => Some(booking.slot_id),
        Event::BookingStatusChanged { slot_id, .. } => Some(*slot_id),
        _ => None,
    }
}

/// Who should hear about this event: the owning admin always, plus the
/// booking's parties when one is involved.
fn event_recipients(state: &SlotState, event: &Event) -> Vec<Ulid> {
    let mut actors = vec![state.slot.owner_admin_id];
    match event {
        Event::BookingCreated { booking } => {
            actors.push(booking.buyer_id);
            actors.push(booking.seller_id);
        }
        Event::BookingStatusChanged { id, .. } => {
            if let Some(b) = state.find_booking(*id) {
                actors.push(b.buyer_id);
                actors.push(b.seller_id);
            }
        }
        _ => {}
    }
    actors.dedup();
    actors
}

/// Delivery status write shared by the live path and replay.
pub(super) fn apply_delivery_status(rec: &mut DeliveryRecord, status: DeliveryStatus, at: Ms) {
    rec.status = status;
    rec.updated_at = at;
    if status == DeliveryStatus::Completed {
        rec.completed_at = Some(at);
    }
}
