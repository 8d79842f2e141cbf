//! Hard limits that keep a single tenant from growing without bound.

pub const MAX_TENANTS: usize = 1_000;
pub const MAX_TENANT_NAME_LEN: usize = 64;

pub const MAX_LOCATIONS_PER_TENANT: usize = 10_000;
pub const MAX_SPOTS_PER_LOCATION: usize = 10_000;
pub const MAX_BOOKINGS_PER_SPOT: usize = 100_000;
pub const MAX_EXCEPTIONS_PER_LOCATION: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 1_024;
pub const MAX_USER_ID_LEN: usize = 256;

/// Longest periodic booking, in days (~10 years).
pub const MAX_PERIODIC_DAYS: i64 = 3_660;
/// Widest calendar listing window, in days.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3_660;

pub const MIN_PERCENTAGE_CHANGE: i32 = -100;
pub const MAX_PERCENTAGE_CHANGE: i32 = 1_000;

pub const MIN_VALID_YEAR: i32 = 1970;
pub const MAX_VALID_YEAR: i32 = 9999;
