use std::sync::Mutex;

use chrono::{DateTime, TimeDelta, Utc};

/// Wall clock used for live availability-window computation.
///
/// Injected rather than read from an ambient global so the window derivation
/// is deterministic under test. Implementations must be cheap to call; the
/// scheduler consults the clock on every refresh.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The local system clock, unadjusted.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Local clock shifted by a fixed server/client offset.
///
/// The offset usually comes from a `UTCTiming` exchange performed by the
/// external loader; only the arithmetic lives here.
#[derive(Debug)]
pub struct OffsetClock {
    /// How much time the local clock is behind the remote clock.
    offset: TimeDelta,
}

impl OffsetClock {
    pub fn new(offset: TimeDelta) -> Self {
        Self { offset }
    }

    /// Build an offset from a sampled server timestamp bracketed by the
    /// instants the request was sent and the response observed.
    ///
    /// The server timestamp was produced somewhere inside the round trip, so
    /// half the RTT is credited before comparing against the local clock.
    pub fn from_server_sample(
        remote_now: DateTime<Utc>,
        before_request: DateTime<Utc>,
        after_request: DateTime<Utc>,
    ) -> Self {
        let rtt = (after_request - before_request) / 2;
        let server_now = remote_now + rtt / 2;
        let offset = server_now - after_request;
        tracing::debug!(offset_milliseconds = offset.num_milliseconds(), "clock offset calculated");
        Self { offset }
    }

    pub fn offset(&self) -> TimeDelta {
        self.offset
    }
}

impl Clock for OffsetClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.offset
    }
}

/// Settable clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(now) }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_from_server_sample() {
        let before = Utc::now();
        let remote = before + TimeDelta::seconds(10);
        let after = before + TimeDelta::seconds(2);

        let clock = OffsetClock::from_server_sample(remote, before, after);
        // remote + rtt/2 = before + 10.5s, observed locally at before + 2s
        assert_eq!(clock.offset(), TimeDelta::milliseconds(8500));
    }

    #[test]
    fn test_fixed_clock_advance() {
        let start = DateTime::UNIX_EPOCH;
        let clock = FixedClock::new(start);
        assert_eq!(clock.now(), start);

        clock.advance(TimeDelta::seconds(5));
        assert_eq!(clock.now(), start + TimeDelta::seconds(5));
    }
}
