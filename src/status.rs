//! # Status Requests
//!
//! A [`StatusRequest`] is a countdown that tasks wait on. Whoever originates
//! an event arms it with [`set_waiting`](StatusRequest::set_waiting), the
//! producers call [`signal`](StatusRequest::signal) as their parts finish,
//! and every task waiting on it is released once the count hits zero.
//!
//! ```text
//!   set_waiting(3)      signal()     signal()     signal(7)
//!   ┌───────────┐      ┌──────┐     ┌──────┐     ┌──────────┐
//!   │ count = 3 │ ───► │  2   │ ──► │  1   │ ──► │ 0, st=7  │ ──► waiters run
//!   └───────────┘      └──────┘     └──────┘     └──────────┘
//!          │
//!          └── signal(-5) at any point ──► 0, st=-5 (error short-circuit)
//! ```
//!
//! All state sits in `Cell`s, so a request can be shared by plain `&`
//! references between any number of tasks, callbacks, and handler objects.
//! The request has no clock of its own: arming takes the current time so
//! the timeout starts there. [`Scheduler::arm`](crate::Scheduler::arm)
//! supplies it from the scheduler's clock.

use core::cell::Cell;

/// Default success status.
pub const SR_OK: i32 = 0;
/// Generic error status.
pub const SR_ERROR: i32 = -1;
/// Status of a task's internal request after `cancel()`.
pub const SR_CANCEL: i32 = -32766;
/// Status of a task's internal request after `abort()`.
pub const SR_ABORT: i32 = -32767;
/// Status written when a request's own timeout expires.
pub const SR_TIMEOUT: i32 = -32768;

/// A one-to-many completion signal with a countdown.
///
/// A freshly constructed request is already complete (`count() == 0`).
#[derive(Debug, Default)]
pub struct StatusRequest {
    count: Cell<u32>,
    status: Cell<i32>,
    timeout: Cell<u32>,
    /// When the deadline started counting.
    started: Cell<u32>,
}

impl StatusRequest {
    pub const fn new() -> Self {
        Self {
            count: Cell::new(0),
            status: Cell::new(SR_OK),
            timeout: Cell::new(0),
            started: Cell::new(0),
        }
    }

    /// Arm the request to require `count` signals and reset the status.
    /// The timeout restarts at `now`.
    pub fn set_waiting(&self, count: u32, now: u32) {
        self.count.set(count);
        self.status.set(SR_OK);
        self.started.set(now);
    }

    /// Report one finished part. A negative status completes the request
    /// immediately. Returns whether the request is now complete.
    ///
    /// Signals on a completed request are ignored.
    pub fn signal(&self, status: i32) -> bool {
        let count = self.count.get();
        if count > 0 {
            self.status.set(status);
            if status < 0 {
                self.count.set(0);
            } else {
                self.count.set(count - 1);
            }
        }
        self.count.get() == 0
    }

    /// Complete the request now, regardless of the remaining count.
    /// Has no effect on an already complete request.
    pub fn signal_complete(&self, status: i32) {
        if self.count.get() > 0 {
            self.count.set(0);
            self.status.set(status);
        }
    }

    #[inline]
    pub fn pending(&self) -> bool {
        self.count.get() != 0
    }

    #[inline]
    pub fn completed(&self) -> bool {
        self.count.get() == 0
    }

    /// Last reported status.
    #[inline]
    pub fn status(&self) -> i32 {
        self.status.get()
    }

    /// Number of signals still outstanding.
    #[inline]
    pub fn count(&self) -> u32 {
        self.count.get()
    }

    /// Bound how long waiters may block. `0` disables the timeout.
    pub fn set_timeout(&self, timeout: u32) {
        self.timeout.set(timeout);
    }

    pub fn timeout(&self) -> u32 {
        self.timeout.get()
    }

    /// Restart the deadline at `now`.
    pub fn reset_timeout(&self, now: u32) {
        self.started.set(now);
    }

    /// Time left before the request times out, `-1` when no timeout is set.
    pub fn until_timeout(&self, now: u32) -> i32 {
        let timeout = self.timeout.get();
        if timeout == 0 {
            return -1;
        }
        self.started.get().wrapping_add(timeout).wrapping_sub(now) as i32
    }

    /// Force completion once the deadline has passed. Called by the
    /// scheduler each time a waiter is visited.
    ///
    /// Returns `true` if this call timed the request out.
    pub(crate) fn poll_timeout(&self, now: u32) -> bool {
        let timeout = self.timeout.get();
        if timeout == 0 || self.completed() {
            return false;
        }
        if now.wrapping_sub(self.started.get()) > timeout {
            self.signal_complete(SR_TIMEOUT);
            return true;
        }
        false
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
