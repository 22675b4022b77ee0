//! Hard bounds that keep a single tenant from exhausting the process.

pub const MAX_ROOMS_PER_TENANT: usize = 1_000;
pub const MAX_TEMPLATES_PER_ROOM: usize = 64;
pub const MAX_EXCEPTIONS_PER_ROOM: usize = 4_096;
pub const MAX_BOOKINGS_PER_ROOM: usize = 250_000;
pub const MAX_HOLIDAYS: usize = 4_096;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_CUSTOMER_FIELD_LEN: usize = 256;

pub const MAX_TENANTS: usize = 1_024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

/// Widest legal advance-booking horizon a room may configure, in days.
pub const MAX_ADVANCE_DAYS: u32 = 730;

/// Cap on rows returned by the recommendation query.
pub const MAX_RECOMMENDATIONS: usize = 16;
