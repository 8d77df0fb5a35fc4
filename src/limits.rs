//! Hard caps that keep a single request from exhausting memory or the journal.

use crate::money::Money;

pub const MAX_UNITS: usize = 10_000;
pub const MAX_RESERVATIONS_PER_UNIT: usize = 50_000;
pub const MAX_TASKS_PER_UNIT: usize = 50_000;
pub const MAX_OFFERS_PER_UNIT: usize = 1_000;
pub const MAX_RATE_MODIFIERS: usize = 1_000;
pub const MAX_LINE_ITEMS: usize = 200;

pub const MAX_NAME_LEN: usize = 200;
pub const MAX_CONTACT_LEN: usize = 320;
pub const MAX_DESCRIPTION_LEN: usize = 500;

/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Widest calendar window a single query may scan.
pub const MAX_QUERY_WINDOW_DAYS: i64 = 3 * 366;

/// Largest single amount accepted for a base price, fixed discount or
/// adjustment, or line item price.
pub const MAX_PRICE: Money = Money::from_major(10_000_000);
pub const MAX_LINE_QUANTITY: u32 = 10_000;
/// Largest percent adjustment magnitude, in basis points (+/-1000%).
pub const MAX_ADJUSTMENT_BPS: i32 = 100_000;
