use chrono::{DateTime, Duration, TimeZone, Utc};

/// Source of "now" for session timestamps.
///
/// Services take a `Clock` by value so tests can pin time without touching
/// the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub enum Clock {
    #[default]
    System,
    Fixed(DateTime<Utc>),
}

impl Clock {
    #[must_use]
    pub fn system() -> Self {
        Self::System
    }

    #[must_use]
    pub fn fixed(at: DateTime<Utc>) -> Self {
        Self::Fixed(at)
    }

    /// Current time, truncated to whole milliseconds.
    ///
    /// Sessions persist timestamps as epoch milliseconds, so truncating here
    /// keeps in-memory values equal to what a store round-trip returns.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let raw = match self {
            Clock::System => Utc::now(),
            Clock::Fixed(t) => *t,
        };
        truncate_to_millis(raw)
    }

    /// Move a fixed clock forward. No effect on the system clock.
    pub fn advance(&mut self, delta: Duration) {
        if let Clock::Fixed(t) = self {
            *t += delta;
        }
    }
}

/// Drops sub-millisecond precision.
#[must_use]
pub fn truncate_to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(at.timestamp_millis())
        .single()
        .unwrap_or(at)
}

/// Deterministic timestamp for tests (2023-11-14T22:13:20Z).
pub const FIXED_TEST_TIMESTAMP: i64 = 1_700_000_000;

/// Returns a deterministic `DateTime<Utc>` for tests.
///
/// # Panics
///
/// Panics if the fixed timestamp cannot be represented.
#[must_use]
pub fn fixed_now() -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp(FIXED_TEST_TIMESTAMP, 0)
        .expect("fixed timestamp should be valid")
}

#[must_use]
pub fn fixed_clock() -> Clock {
    Clock::fixed(fixed_now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_advances() {
        let mut clock = fixed_clock();
        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), fixed_now() + Duration::seconds(5));
    }

    #[test]
    fn now_drops_sub_millisecond_precision() {
        let at = fixed_now() + Duration::nanoseconds(1_234_567);
        let clock = Clock::fixed(at);
        assert_eq!(clock.now(), fixed_now() + Duration::milliseconds(1));
    }
}
