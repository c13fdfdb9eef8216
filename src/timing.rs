//! # Timing
//!
//! Anchor arithmetic shared by the execution pass and the task control
//! surface. Every task is due once `now - anchor >= delay`; firing moves
//! the anchor forward according to the task's [`SchedulingOption`].
//!
//! All arithmetic wraps, so a clock rolling over `u32::MAX` is harmless as
//! long as no single wait exceeds `2^31` units.

/// How a task's anchor advances each time it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SchedulingOption {
    /// Advance by exactly `delay`. A late task fires back-to-back until it
    /// has caught up, so the long-run rate equals the interval.
    #[default]
    Schedule,
    /// Like `Schedule`, but when a backlog is detected the anchor jumps to
    /// the latest interval boundary, bounding catch-up bursts.
    ScheduleNoCatchup,
    /// Re-anchor at the completion of each run, guaranteeing a full
    /// interval of idle time between callback bodies.
    Interval,
}

/// Wrapping time elapsed from `since` to `now`.
#[inline]
pub fn elapsed(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}

/// Whether a task anchored at `anchor` with the given `delay` is due.
#[inline]
pub fn is_due(now: u32, anchor: u32, delay: u32) -> bool {
    elapsed(now, anchor) >= delay
}

/// Time left until a task is due, floored at zero.
#[inline]
pub fn remaining(now: u32, anchor: u32, delay: u32) -> u32 {
    let passed = elapsed(now, anchor) as i64;
    let left = delay as i64 - passed;
    if left < 0 {
        0
    } else {
        left as u32
    }
}

/// Anchor that makes a task with `interval` due right now.
#[inline]
pub fn due_now(now: u32, interval: u32) -> u32 {
    now.wrapping_sub(interval)
}

/// Compute the anchor after a fire at time `now`.
///
/// `delay` is the wait that just elapsed, `interval` the task's period.
/// For [`SchedulingOption::Interval`] this returns `now`; the pass moves it
/// again to the callback's completion time.
pub fn advance(option: SchedulingOption, anchor: u32, delay: u32, interval: u32, now: u32) -> u32 {
    match option {
        SchedulingOption::Schedule => anchor.wrapping_add(delay),
        SchedulingOption::ScheduleNoCatchup => {
            let mut next = anchor.wrapping_add(delay);
            let lead = next.wrapping_add(interval).wrapping_sub(now) as i32;
            if lead < 0 {
                let step = interval.max(1);
                next = next.wrapping_add((elapsed(now, next) / step) * step);
            }
            next
        }
        SchedulingOption::Interval => now,
    }
}

/// Signed lead of the next due time over `now`. Negative means the task
/// is already behind for its next run.
#[inline]
pub fn overrun(anchor: u32, interval: u32, now: u32) -> i32 {
    anchor.wrapping_add(interval).wrapping_sub(now) as i32
}

/// How late a run started compared to its ideal fire time.
#[inline]
pub fn start_delay(ideal: u32, now: u32) -> i32 {
    now.wrapping_sub(ideal) as i32
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
