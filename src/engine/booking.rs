use chrono::NaiveTime;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::capacity::{check_capacity, check_temporal_order, now_ms};
use super::resolver::ResolvedAdmin;
use super::{Engine, EngineError};

fn validate_notes(notes: &Option<String>) -> Result<(), EngineError> {
    if let Some(n) = notes
        && n.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

impl Engine {
    /// Book a buyer into a pickup slot.
    ///
    /// Precondition chain, in order: delivery exists for this product →
    /// delivery completed → slot exists, is a pickup window, and is active
    /// → order has a resolvable admin → slot belongs to that admin →
    /// capacity free → no active duplicate for (delivery, buyer) → slot
    /// day strictly after the completion instant. Nothing is persisted
    /// unless every check passes.
    ///
    /// Capacity, duplicate, and temporal checks plus the write all run
    /// under the slot's write lock; concurrent requests for the same slot
    /// serialize and exactly one can take the last unit.
    pub async fn create_pickup_booking(
        &self,
        buyer_id: Ulid,
        product_id: Ulid,
        slot_id: Ulid,
        delivery_id: Ulid,
        preferred_time: Option<NaiveTime>,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_notes(&notes)?;

        let delivery = self
            .get_delivery(&delivery_id)
            .ok_or(EngineError::NotFound(delivery_id))?;
        let (completed_at, seller_id) = {
            let guard = delivery.read().await;
            if guard.product_id != product_id {
                return Err(EngineError::NotFound(delivery_id));
            }
            if guard.status != DeliveryStatus::Completed {
                return Err(EngineError::Precondition("delivery not completed"));
            }
            (
                guard.completed_at.unwrap_or(guard.updated_at),
                guard.seller_id,
            )
        };

        // Critical section: everything below holds the slot write lock.
        // Lock order is always slot → delivery (read); no path holds a
        // delivery lock while waiting on a slot.
        let state = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = state.write().await;
        if guard.slot.kind != SlotKind::Pickup {
            return Err(EngineError::InvalidState("slot is not a pickup window"));
        }
        if guard.slot.status != SlotStatus::Active {
            return Err(EngineError::InvalidState("slot is not active"));
        }
        let assigned_admin = match self
            .resolve_assigned_admin(product_id, Some(buyer_id))
            .await?
        {
            ResolvedAdmin::Resolved(id) => id,
            ResolvedAdmin::Unassigned => {
                return Err(EngineError::Assignment("no admin assigned"));
            }
        };
        if guard.slot.owner_admin_id != assigned_admin {
            return Err(EngineError::Authorization(
                "schedule does not belong to assigned admin",
            ));
        }
        check_capacity(&guard)?;
        let key = BookingKey::Pickup {
            delivery_id,
            buyer_id,
        };
        if let Some(existing) = self.active_booking_for(&key) {
            return Err(EngineError::DuplicateBooking(existing));
        }
        check_temporal_order(&guard.slot, completed_at)?;

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            kind: BookingKind::Pickup,
            product_id,
            buyer_id,
            seller_id,
            admin_id: assigned_admin,
            slot_id,
            delivery_id: Some(delivery_id),
            preferred_time,
            notes,
            status: BookingStatus::Pending,
            admin_notes: None,
            created_at: now,
            updated_at: now,
        };
        // The entry claim closes the cross-slot duplicate race; a WAL
        // failure releases it so nothing half-created lingers.
        self.claim_booking_key(key, booking.id)?;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.release_booking_key(&key);
            return Err(e);
        }
        Ok(booking)
    }

    /// Book a seller into a delivery slot — the handoff that precedes the
    /// delivery leg's completion. Simpler chain than pickups: no completed
    /// prior step and no temporal bound (payment verification is handled
    /// upstream), but assignment, ownership, capacity, and uniqueness are
    /// enforced identically.
    pub async fn create_delivery_booking(
        &self,
        seller_id: Ulid,
        product_id: Ulid,
        slot_id: Ulid,
        preferred_time: Option<NaiveTime>,
        notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        validate_notes(&notes)?;

        let state = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = state.write().await;
        if guard.slot.kind != SlotKind::Delivery {
            return Err(EngineError::InvalidState("slot is not a delivery window"));
        }
        if guard.slot.status != SlotStatus::Active {
            return Err(EngineError::InvalidState("slot is not active"));
        }

        // The buyer comes from the assignment record, so an unassigned
        // order cannot schedule a handoff at all.
        let assignment = self
            .assignment_for_product(&product_id)
            .ok_or(EngineError::Assignment("no admin assigned"))?;
        let assigned_admin = match self.resolve_assigned_admin(product_id, None).await? {
            ResolvedAdmin::Resolved(id) => id,
            ResolvedAdmin::Unassigned => {
                return Err(EngineError::Assignment("no admin assigned"));
            }
        };

        if let Some(rec) = self.delivery_for_product(&product_id) {
            let rec_guard = rec.read().await;
            if rec_guard.status != DeliveryStatus::Cancelled && rec_guard.seller_id != seller_id {
                return Err(EngineError::Authorization("seller does not own this delivery"));
            }
        }

        if guard.slot.owner_admin_id != assigned_admin {
            return Err(EngineError::Authorization(
                "schedule does not belong to assigned admin",
            ));
        }
        check_capacity(&guard)?;
        let key = BookingKey::Delivery {
            product_id,
            seller_id,
        };
        if let Some(existing) = self.active_booking_for(&key) {
            return Err(EngineError::DuplicateBooking(existing));
        }

        let now = now_ms();
        let booking = Booking {
            id: Ulid::new(),
            kind: BookingKind::Delivery,
            product_id,
            buyer_id: assignment.buyer_id,
            seller_id,
            admin_id: assigned_admin,
            slot_id,
            delivery_id: None,
            preferred_time,
            notes,
            status: BookingStatus::Pending,
            admin_notes: None,
            created_at: now,
            updated_at: now,
        };
        self.claim_booking_key(key, booking.id)?;
        let event = Event::BookingCreated {
            booking: booking.clone(),
        };
        if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
            self.release_booking_key(&key);
            return Err(e);
        }
        Ok(booking)
    }

    /// Advance a booking through its state machine. Staff only, and only
    /// the assigned admin; buyers and sellers never mutate a booking after
    /// creation. Cancelling releases the capacity unit and uniqueness key.
    pub async fn transition_booking_status(
        &self,
        admin_id: Ulid,
        booking_id: Ulid,
        new_status: BookingStatus,
        admin_notes: Option<String>,
    ) -> Result<Booking, EngineError> {
        if let Some(n) = &admin_notes
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("admin notes too long"));
        }

        let (slot_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let from_status = {
            let booking = guard
                .find_booking(booking_id)
                .ok_or(EngineError::NotFound(booking_id))?;
            if booking.admin_id != admin_id {
                return Err(EngineError::Authorization("not the booking's assigned admin"));
            }
            booking.status
        };
        if !from_status.can_transition_to(new_status) {
            return Err(EngineError::InvalidTransition {
                from: from_status.as_str(),
                to: new_status.as_str(),
            });
        }

        let event = Event::BookingStatusChanged {
            id: booking_id,
            slot_id,
            status: new_status,
            admin_notes,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        guard
            .find_booking(booking_id)
            .cloned()
            .ok_or(EngineError::NotFound(booking_id))
    }
}
