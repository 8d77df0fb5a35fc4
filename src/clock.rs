use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, FixedOffset, NaiveDate, Offset, Utc};

use crate::model::Ms;

/// Source of "now" for actual arrival/departure stamps and "today" for the
/// offer sweep and live pricing.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Ms;

    /// The property's current calendar date.
    fn today(&self) -> NaiveDate;
}

/// Wall clock, with "today" taken at the property's UTC offset.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Ms {
        Utc::now().timestamp_millis()
    }

    fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }
}

/// Settable clock for tests, benches and replaying scenarios.
#[derive(Debug)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: Ms) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    /// Clock pinned to noon UTC on `date`.
    pub fn at_date(date: NaiveDate) -> Self {
        Self::new(noon_ms(date))
    }

    pub fn set_date(&self, date: NaiveDate) {
        self.now.store(noon_ms(date), Ordering::SeqCst);
    }

    pub fn advance_ms(&self, delta: Ms) {
        self.now.fetch_add(delta, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Ms {
        self.now.load(Ordering::SeqCst)
    }

    fn today(&self) -> NaiveDate {
        DateTime::<Utc>::from_timestamp_millis(self.now_ms())
            .map(|dt| dt.date_naive())
            .unwrap_or_default()
    }
}

fn noon_ms(date: NaiveDate) -> Ms {
    date.and_hms_opt(12, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn manual_clock_tracks_dates() {
        let clock = ManualClock::at_date(d("2025-03-01"));
        assert_eq!(clock.today(), d("2025-03-01"));
        clock.advance_ms(24 * 3_600_000);
        assert_eq!(clock.today(), d("2025-03-02"));
        clock.set_date(d("2025-12-31"));
        assert_eq!(clock.today(), d("2025-12-31"));
    }

    #[test]
    fn system_clock_is_monotonic_enough() {
        let clock = SystemClock::utc();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
    }
}
