use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError};

/// Conjunctive filter for booking listings. The boundary layer pins
/// `buyer_id` for buyer callers so they only ever see their own.
#[derive(Debug, Clone, Default)]
pub struct BookingFilter {
    pub buyer_id: Option<Ulid>,
    pub admin_id: Option<Ulid>,
    pub status: Option<BookingStatus>,
    pub slot_id: Option<Ulid>,
    pub delivery_id: Option<Ulid>,
}

impl BookingFilter {
    fn matches(&self, b: &Booking) -> bool {
        self.buyer_id.is_none_or(|v| v == b.buyer_id)
            && self.admin_id.is_none_or(|v| v == b.admin_id)
            && self.status.is_none_or(|v| v == b.status)
            && self.slot_id.is_none_or(|v| v == b.slot_id)
            && self.delivery_id.is_none_or(|v| Some(v) == b.delivery_id)
    }
}

impl Engine {
    pub async fn list_bookings(&self, filter: &BookingFilter) -> Vec<Booking> {
        let states = match filter.slot_id {
            // Narrow to one slot when the filter names it.
            Some(slot_id) => self.get_slot(&slot_id).into_iter().collect(),
            None => self.slot_states(),
        };

        let mut out = Vec::new();
        for state in states {
            let guard = state.read().await;
            out.extend(guard.bookings.iter().filter(|b| filter.matches(b)).cloned());
        }
        out.sort_by_key(|b| (b.created_at, b.id));
        out.truncate(MAX_BOOKINGS_RETURNED);
        out
    }

    pub async fn get_booking(&self, id: &Ulid) -> Option<Booking> {
        let slot_id = self.slot_for_booking(id)?;
        let state = self.get_slot(&slot_id)?;
        let guard = state.read().await;
        guard.find_booking(*id).cloned()
    }

    /// Calendar read for an admin's published slots.
    pub async fn list_slots(
        &self,
        admin_id: Ulid,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ScheduleSlot>, EngineError> {
        if to < from {
            return Err(EngineError::Validation("date range is inverted"));
        }
        if (to - from).num_days() > MAX_SLOT_RANGE_DAYS {
            return Err(EngineError::LimitExceeded("date range too wide"));
        }

        let mut out = Vec::new();
        for state in self.slot_states() {
            let guard = state.read().await;
            let slot = &guard.slot;
            if slot.owner_admin_id == admin_id && slot.date >= from && slot.date <= to {
                out.push(slot.clone());
            }
        }
        out.sort_by_key(|s| (s.date, s.start_time, s.id));
        Ok(out)
    }

    /// Denormalized display view: booking + slot window + delivery state.
    /// Read locks only; composes core records without mutating them.
    pub async fn fulfillment_view(&self, booking_id: &Ulid) -> Result<FulfillmentView, EngineError> {
        let slot_id = self
            .slot_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let state = self
            .get_slot(&slot_id)
            .ok_or(EngineError::NotFound(slot_id))?;
        let (booking, slot) = {
            let guard = state.read().await;
            let booking = guard
                .find_booking(*booking_id)
                .cloned()
                .ok_or(EngineError::NotFound(*booking_id))?;
            (booking, guard.slot.clone())
        };

        let (delivery_status, delivery_completed_at) = match booking.delivery_id {
            Some(delivery_id) => match self.get_delivery(&delivery_id) {
                Some(rec) => {
                    let guard = rec.read().await;
                    (Some(guard.status), guard.completed_at)
                }
                None => (None, None),
            },
            None => (None, None),
        };

        Ok(FulfillmentView {
            booking,
            slot_date: slot.date,
            slot_start: slot.start_time,
            slot_end: slot.end_time,
            slot_location: slot.location,
            slot_status: slot.status,
            delivery_status,
            delivery_completed_at,
        })
    }
}
