use crate::model::Hour;

// Booking window: whole-hour grid between opening and closing.
pub const OPENING_HOUR: Hour = 9;
pub const CLOSING_HOUR: Hour = 18;

pub const MIN_BOOKING_HOURS: u8 = 1;
pub const MAX_BOOKING_HOURS: u8 = 2;

/// Cancellation must leave strictly more than this many hours before start.
pub const CANCEL_LEAD_HOURS: i64 = 2;

pub const MAX_RESOURCES: usize = 4_096;
pub const MAX_TEXT_LEN: usize = 512;
pub const MAX_TEAM_SIZE: usize = 64;
pub const MAX_WIRE_LINE_LEN: usize = 64 * 1024;
