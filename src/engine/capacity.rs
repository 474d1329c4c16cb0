use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Bookings currently holding a capacity unit on this slot.
pub fn count_active_bookings(state: &SlotState) -> u32 {
    state
        .bookings
        .iter()
        .filter(|b| b.status.counts_against_capacity())
        .count() as u32
}

pub fn has_capacity(state: &SlotState) -> bool {
    count_active_bookings(state) < state.slot.max_slots
}

/// Admission check. Only meaningful while the caller holds the slot's
/// write lock — the count is stale the moment the lock is released.
pub(crate) fn check_capacity(state: &SlotState) -> Result<(), EngineError> {
    if has_capacity(state) {
        Ok(())
    } else {
        Err(EngineError::CapacityExceeded(state.slot.max_slots))
    }
}

/// A pickup may only land on a calendar day that begins after the
/// delivery was completed.
pub(crate) fn check_temporal_order(
    slot: &ScheduleSlot,
    completed_at: Ms,
) -> Result<(), EngineError> {
    let slot_day_start = slot.day_start_ms();
    if slot_day_start > completed_at {
        Ok(())
    } else {
        Err(EngineError::TemporalOrder {
            slot_day_start,
            completed_at,
        })
    }
}
