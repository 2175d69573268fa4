use crate::model::Ms;

pub const MAX_CAR_NAME_LEN: usize = 128;
pub const MAX_BOOKER_NAME_LEN: usize = 256;
pub const MAX_EMAIL_LEN: usize = 320;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// One reservation may not span more than 90 days.
pub const MAX_SPAN_DURATION_MS: Ms = 90 * 24 * 3_600_000;

/// Odometers stop making sense past ten million km.
pub const MAX_MILEAGE: f64 = 10_000_000.0;

/// Longest accepted request line on the wire, in bytes.
pub const MAX_REQUEST_LINE: usize = 64 * 1024;
