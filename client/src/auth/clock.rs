use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Source of the current UTC time.
///
/// Token expiry and refresh decisions all go through a `Clock` so that they
/// can be driven deterministically in tests with [`ManualClock`].
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```no_run
/// use chrono::Duration;
/// use client::auth::{Clock, ManualClock};
///
/// let clock = ManualClock::starting_now();
/// let start = clock.now();
/// clock.advance(Duration::seconds(4));
/// assert_eq!(clock.now() - start, Duration::seconds(4));
/// ```
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Starts at the current system time truncated to whole seconds, which
    /// keeps expiry arithmetic exact against second-granular tokens.
    pub fn starting_now() -> Self {
        let now = Utc::now();
        let whole_seconds = DateTime::from_timestamp(now.timestamp(), 0).unwrap_or(now);
        Self::new(whole_seconds)
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
