use crate::model::{HOUR_MS, Ms};

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2200-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Applied when a create request carries no explicit interval.
pub const DEFAULT_RESERVATION_MS: Ms = 2 * HOUR_MS;
pub const MAX_RESERVATION_MS: Ms = 30 * 24 * HOUR_MS;

pub const MAX_MESSAGE_LEN: usize = 2_000;
pub const MAX_PAYMENT_CENTS: i64 = 100_000_000;

pub const DEFAULT_PAGE_LIMIT: usize = 10;
pub const MAX_PAGE_LIMIT: usize = 100;

/// Caps how many pages one import run will follow.
pub const MAX_IMPORT_PAGES: usize = 1_000;
