use std::fmt;
use std::time::Instant;

/// Monotonic time source for advertisement bookkeeping.
///
/// Injected as a capability so tests and simulations can drive time by
/// hand. The have buffer relies on insertion-ordered timestamps staying
/// monotone, which a wall clock subject to NTP slew cannot guarantee.
pub trait Clock: fmt::Debug {
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SteadyClock;

impl Clock for SteadyClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
