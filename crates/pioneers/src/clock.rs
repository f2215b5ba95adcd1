//! Monotonic time for the supervisor loop.

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of monotonic time plus the loop's only blocking call.
pub trait Clock {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

impl<C: Clock + ?Sized> Clock for Rc<C> {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall-clock backed [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Hand-driven [`Clock`] for tests and bench simulation.
///
/// Sleeping advances the clock instead of blocking. Clones share the same
/// time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }

    pub fn set(&self, to: Duration) {
        self.now.set(to);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Fires once per `period`, measured against a [`Clock`].
#[derive(Debug, Clone, Copy)]
pub struct Periodic {
    period: Duration,
    next: Option<Duration>,
}

impl Periodic {
    pub fn new(period: Duration) -> Self {
        Self { period, next: None }
    }

    /// Start counting from `now`; the first firing is one period later.
    pub fn arm(&mut self, now: Duration) {
        self.next = Some(now + self.period);
    }

    pub fn disarm(&mut self) {
        self.next = None;
    }

    pub fn is_armed(&self) -> bool {
        self.next.is_some()
    }

    /// True at most once per period while armed.
    pub fn due(&mut self, now: Duration) -> bool {
        match self.next {
            Some(_) if self.period.is_zero() => {
                self.next = Some(now);
                true
            }
            Some(next) if now >= next => {
                // Skip missed periods rather than firing in a burst.
                let mut upcoming = next + self.period;
                while upcoming <= now {
                    upcoming += self.period;
                }
                self.next = Some(upcoming);
                true
            }
            _ => false,
        }
    }
}
