//! Input bounds. Everything user-supplied is capped before it reaches the
//! journal, so no single request can bloat state or the WAL.

pub const MAX_LOCATION_LEN: usize = 200;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_EMAIL_LEN: usize = 254;

/// Hard cap on a single slot's published capacity.
pub const MAX_SLOT_CAPACITY: u32 = 500;

/// Widest calendar range a slot listing may span.
pub const MAX_SLOT_RANGE_DAYS: i64 = 92;

/// Cap on bookings returned from a filtered listing.
pub const MAX_BOOKINGS_RETURNED: usize = 1_000;
