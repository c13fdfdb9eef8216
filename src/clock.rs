//! # Time Source
//!
//! The scheduler never reads hardware directly. It asks a [`Clock`] for a
//! monotonic, wrapping `u32` counter. Whether one unit is a millisecond or
//! a microsecond is the integrator's choice; it just has to be the same
//! unit everywhere intervals are expressed.

use core::cell::Cell;

/// A monotonic, wrap-tolerant time counter.
///
/// Implementations only have to be non-decreasing modulo `2^32`. All
/// scheduler arithmetic uses wrapping differences, so rolling over from
/// `u32::MAX` to `0` is harmless.
pub trait Clock {
    /// Current time in the build's time unit.
    fn now(&self) -> u32;
}

impl<F> Clock for F
where
    F: Fn() -> u32,
{
    #[inline]
    fn now(&self) -> u32 {
        self()
    }
}

/// A clock that only moves when told to.
///
/// Used for host simulations and tests. Callbacks can hold a shared
/// reference and call [`advance`](ManualClock::advance) to model time spent
/// inside a callback body.
#[derive(Debug, Default)]
pub struct ManualClock {
    ticks: Cell<u32>,
}

impl ManualClock {
    pub const fn new() -> Self {
        Self { ticks: Cell::new(0) }
    }

    /// Start the clock at an arbitrary value (handy for wraparound tests).
    pub const fn starting_at(ticks: u32) -> Self {
        Self { ticks: Cell::new(ticks) }
    }

    pub fn set(&self, ticks: u32) {
        self.ticks.set(ticks);
    }

    pub fn advance(&self, by: u32) {
        self.ticks.set(self.ticks.get().wrapping_add(by));
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now(&self) -> u32 {
        self.ticks.get()
    }
}
