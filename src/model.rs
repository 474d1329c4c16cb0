use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only instant type.
pub type Ms = i64;

/// What a slot's time window is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Seller hands the item to the admin.
    Delivery,
    /// Buyer collects the item from the admin.
    Pickup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Active,
    Inactive,
    Cancelled,
}

impl SlotStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SlotStatus::Active => "active",
            SlotStatus::Inactive => "inactive",
            SlotStatus::Cancelled => "cancelled",
        }
    }
}

/// An admin-published, capacity-bounded time window on a calendar day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSlot {
    pub id: Ulid,
    pub owner_admin_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub kind: SlotKind,
    pub location: String,
    pub max_slots: u32,
    pub status: SlotStatus,
}

impl ScheduleSlot {
    /// Midnight at the start of the slot's calendar day, as Unix ms.
    /// Temporal-order checks compare this against completion instants.
    pub fn day_start_ms(&self) -> Ms {
        NaiveDateTime::new(self.date, NaiveTime::MIN)
            .and_utc()
            .timestamp_millis()
    }
}

/// A slot plus every booking that references it. The unit of locking:
/// admission checks and the booking write happen under this state's
/// write lock, so capacity can never be oversubscribed.
#[derive(Debug, Clone)]
pub struct SlotState {
    pub slot: ScheduleSlot,
    pub bookings: Vec<Booking>,
}

impl SlotState {
    pub fn new(slot: ScheduleSlot) -> Self {
        Self {
            slot,
            bookings: Vec::new(),
        }
    }

    pub fn find_booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn find_booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }
}

/// How the surrounding system refers to a staff member. Older records key
/// admins by email, newer ones by id; both must resolve to the same
/// principal without throwing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdminRef {
    Id(Ulid),
    Email(String),
}

/// Staff directory entry. Input from the external admin-provisioning flow;
/// used to normalize `AdminRef::Email` references.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProfile {
    pub id: Ulid,
    pub email: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Confirmed => "confirmed",
            DeliveryStatus::Completed => "completed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Pending, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
        )
    }
}

/// The seller → admin leg of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Ulid,
    pub product_id: Ulid,
    pub seller_id: Ulid,
    pub admin: AdminRef,
    pub status: DeliveryStatus,
    pub updated_at: Ms,
    /// Stamped on the transition into `Completed`.
    pub completed_at: Option<Ms>,
}

/// Write-once binding of an order to the single staff member responsible
/// for its fulfillment. Read-only input to the booking engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderAssignment {
    pub order_id: Ulid,
    pub product_id: Ulid,
    pub buyer_id: Ulid,
    pub assigned_admin: AdminRef,
    pub assigned_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingKind {
    Pickup,
    Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    /// Legal staff-initiated moves. Everything else is rejected.
    pub fn can_transition_to(self, next: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (self, next),
            (Pending, Confirmed)
                | (Confirmed, InProgress)
                | (InProgress, Completed)
                | (Pending, Cancelled)
                | (Confirmed, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Cancelled bookings release their capacity unit and uniqueness claim.
    pub fn counts_against_capacity(self) -> bool {
        self != BookingStatus::Cancelled
    }
}

/// Uniqueness key for the at-most-one-active-booking rule. Pickups are
/// unique per (delivery, buyer); delivery bookings per (product, seller).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingKey {
    Pickup { delivery_id: Ulid, buyer_id: Ulid },
    Delivery { product_id: Ulid, seller_id: Ulid },
}

/// A reservation against a slot, tied to a specific order's fulfillment.
/// Never deleted — only status-transitioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub kind: BookingKind,
    pub product_id: Ulid,
    pub buyer_id: Ulid,
    pub seller_id: Ulid,
    pub admin_id: Ulid,
    pub slot_id: Ulid,
    /// Present for pickups; the completed delivery leg being collected.
    pub delivery_id: Option<Ulid>,
    pub preferred_time: Option<NaiveTime>,
    pub notes: Option<String>,
    pub status: BookingStatus,
    /// Admin-authored only; buyers and sellers cannot write here.
    pub admin_notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Booking {
    pub fn dedup_key(&self) -> BookingKey {
        match self.kind {
            BookingKind::Pickup => BookingKey::Pickup {
                // Pickups always carry a delivery id by construction; the
                // fallback keeps the key total and unique regardless.
                delivery_id: self.delivery_id.unwrap_or(self.id),
                buyer_id: self.buyer_id,
            },
            BookingKind::Delivery => BookingKey::Delivery {
                product_id: self.product_id,
                seller_id: self.seller_id,
            },
        }
    }
}

/// The journal record format — flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    AdminRegistered {
        admin: AdminProfile,
    },
    SlotPublished {
        slot: ScheduleSlot,
    },
    SlotStatusChanged {
        id: Ulid,
        status: SlotStatus,
    },
    DeliveryRecorded {
        delivery: DeliveryRecord,
    },
    DeliveryStatusChanged {
        id: Ulid,
        status: DeliveryStatus,
        at: Ms,
    },
    AssignmentRecorded {
        assignment: OrderAssignment,
    },
    BookingCreated {
        booking: Booking,
    },
    BookingStatusChanged {
        id: Ulid,
        slot_id: Ulid,
        status: BookingStatus,
        admin_notes: Option<String>,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Denormalized read model for admin/buyer display views. Composed from
/// core records; never written back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FulfillmentView {
    pub booking: Booking,
    pub slot_date: NaiveDate,
    pub slot_start: NaiveTime,
    pub slot_end: NaiveTime,
    pub slot_location: String,
    pub slot_status: SlotStatus,
    pub delivery_status: Option<DeliveryStatus>,
    pub delivery_completed_at: Option<Ms>,
}
