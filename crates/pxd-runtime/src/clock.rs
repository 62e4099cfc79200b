//! Time source for the service. The ledger never reads a clock itself;
//! the service stamps every operation with `Clock::now()`.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by simulations and tests.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current: Mutex::new(start),
        }
    }

    /// Jump to `to`. Earlier times are ignored; the clock never runs backward.
    pub fn set(&self, to: DateTime<Utc>) {
        let mut cur = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if to > *cur {
            *cur = to;
        }
    }

    /// Move forward by `by`. Non-positive steps and jumps past the end of
    /// the representable range leave the clock where it is.
    pub fn advance(&self, by: Duration) {
        let _ = self.try_advance(by);
    }

    /// Like [`advance`](Self::advance), returning the new time, or `None`
    /// when the result would be out of range.
    pub fn try_advance(&self, by: Duration) -> Option<DateTime<Utc>> {
        let mut cur = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if by > Duration::zero() {
            *cur = cur.checked_add_signed(by)?;
        }
        Some(*cur)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.current.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn manual_clock_only_moves_forward() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 9, 12, 0, 0).unwrap();
        let c = ManualClock::new(t0);
        c.advance(Duration::minutes(31));
        assert_eq!(c.now(), t0 + Duration::minutes(31));
        c.set(t0);
        assert_eq!(c.now(), t0 + Duration::minutes(31));
        c.advance(Duration::minutes(-5));
        assert_eq!(c.now(), t0 + Duration::minutes(31));
    }

    #[test]
    fn out_of_range_advance_is_refused() {
        let t0 = Utc.with_ymd_and_hms(2026, 4, 9, 12, 0, 0).unwrap();
        let c = ManualClock::new(t0);
        assert_eq!(c.try_advance(Duration::MAX), None);
        assert_eq!(c.now(), t0);
        assert_eq!(c.try_advance(Duration::seconds(1)), Some(t0 + Duration::seconds(1)));
    }
}
