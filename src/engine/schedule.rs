use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

impl Engine {
    /// Publish a capacity slot. Only registered staff may publish; the new
    /// slot starts `Active`.
    pub async fn publish_slot(
        &self,
        owner_admin_id: Ulid,
        date: NaiveDate,
        start_time: NaiveTime,
        end_time: NaiveTime,
        kind: SlotKind,
        location: String,
        max_slots: u32,
    ) -> Result<ScheduleSlot, EngineError> {
        if start_time >= end_time {
            return Err(EngineError::Validation("slot window must start before it ends"));
        }
        if max_slots == 0 {
            return Err(EngineError::Validation("max_slots must be positive"));
        }
        if max_slots > MAX_SLOT_CAPACITY {
            return Err(EngineError::LimitExceeded("slot capacity too large"));
        }
        if location.trim().is_empty() {
            return Err(EngineError::Validation("location must not be empty"));
        }
        if location.len() > MAX_LOCATION_LEN {
            return Err(EngineError::LimitExceeded("location too long"));
        }
        if self.admin_profile(&owner_admin_id).is_none() {
            return Err(EngineError::NotFound(owner_admin_id));
        }

        let slot = ScheduleSlot {
            id: Ulid::new(),
            owner_admin_id,
            date,
            start_time,
            end_time,
            kind,
            location,
            max_slots,
            status: SlotStatus::Active,
        };
        let event = Event::SlotPublished { slot: slot.clone() };
        self.wal_append(&event).await?;
        self.insert_slot(slot.clone());
        self.notify.send(owner_admin_id, &event);
        Ok(slot)
    }

    /// Deactivate, reactivate, or cancel a slot. Owner-scoped: operating
    /// on another admin's slot reports NotFound so slot ids aren't probed.
    pub async fn set_slot_status(
        &self,
        admin_id: Ulid,
        slot_id: Ulid,
        status: SlotStatus,
    ) -> Result<(), EngineError> {
        let state = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let mut guard = state.write().await;
        if guard.slot.owner_admin_id != admin_id {
            return Err(EngineError::NotFound(slot_id));
        }
        if guard.slot.status == SlotStatus::Cancelled {
            return Err(EngineError::InvalidState("slot already cancelled"));
        }

        let event = Event::SlotStatusChanged { id: slot_id, status };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Slots are never physically removed — deletion is a cancel. Existing
    /// bookings keep their slot reference.
    pub async fn delete_slot(&self, admin_id: Ulid, slot_id: Ulid) -> Result<(), EngineError> {
        self.set_slot_status(admin_id, slot_id, SlotStatus::Cancelled)
            .await
    }
}
