//! # Task Control Surface
//!
//! Everything an application (or a running callback) does to a task goes
//! through the owning scheduler by handle: enabling and disabling, timing
//! changes, waiting on status requests, timeouts, yielding, and rebinding.
//!
//! Operations on a stale handle are ignored and report `false`, `-1`, or
//! `None`. Hooks (`on_enable`, `on_disable`) run with the scheduler's
//! current-task marker pointing at their own task, so a hook can look itself
//! up the same way a callback does.

use crate::log::trace;
use crate::scheduler::Scheduler;
use crate::status::{SR_ABORT, SR_CANCEL, SR_OK};
use crate::task::{
    Awaited, Binding, Callback, Handler, LocalStorage, OnDisable, OnEnable, TaskHandle, WaitMode,
};
use crate::timing::{self, SchedulingOption};

impl<'a> Scheduler<'a> {
    // -----------------------------------------------------------------------
    // Enable / disable
    // -----------------------------------------------------------------------

    /// Enable a task so it runs on the next visit.
    ///
    /// The `on_enable` hook, if bound, decides whether the task actually
    /// becomes enabled. A call made from inside that hook is ignored. A task
    /// that is not linked into the chain cannot be enabled.
    ///
    /// Returns whether the task is enabled afterwards.
    pub fn enable(&mut self, handle: TaskHandle) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        if !task.link.linked {
            return false;
        }
        if task.status.in_on_enable {
            return task.status.enabled;
        }

        let binding = task.binding;
        let was_enabled = task.status.enabled;
        let allowed = if binding.has_on_enable() {
            task.status.in_on_enable = true;
            let verdict = self.with_current(handle, |s| binding.enable(s)).unwrap_or(true);
            let Some(task) = self.task_mut(handle) else {
                return false;
            };
            task.status.in_on_enable = false;
            verdict
        } else {
            true
        };

        let now = self.clock.now();
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.status.enabled = allowed;
        if allowed {
            task.run_counter = 0;
            task.status.canceled = false;
            task.delay = task.interval;
            task.anchor = timing::due_now(now, task.interval);
            task.timeout_anchor = now;
            task.status.timed_out = false;
            task.own_request.set_waiting(1, now);
        } else if was_enabled {
            task.status.waiting = None;
            task.own_request.signal_complete(SR_OK);
        }
        allowed
    }

    /// Enable the task only if it is disabled. Returns the previous state.
    pub fn enable_if_not(&mut self, handle: TaskHandle) -> bool {
        let was_enabled = self.task(handle).is_some_and(|t| t.status.enabled);
        if !was_enabled {
            self.enable(handle);
        }
        was_enabled
    }

    /// Enable the task with its first run `delay` from now (a full interval
    /// if `delay` is zero).
    pub fn enable_delayed(&mut self, handle: TaskHandle, delay: u32) -> bool {
        let enabled = self.enable(handle);
        if enabled {
            self.delay(handle, delay);
        }
        enabled
    }

    /// Disable a task, running `on_disable` if it was enabled, and complete
    /// its internal status request. Returns the previous enabled state.
    pub fn disable(&mut self, handle: TaskHandle) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        let was_enabled = task.status.enabled;
        task.status.enabled = false;
        task.status.in_on_enable = false;
        task.status.waiting = None;
        let binding = task.binding;

        if was_enabled {
            self.with_current(handle, |s| binding.disable(s));
        }
        if let Some(task) = self.task(handle) {
            task.own_request.signal_complete(SR_OK);
        }
        was_enabled
    }

    /// Complete the internal request with `code`, then disable.
    pub(crate) fn shut_down(&mut self, handle: TaskHandle, code: i32) -> bool {
        if let Some(task) = self.task(handle) {
            task.own_request.signal_complete(code);
        }
        self.disable(handle)
    }

    /// Disable with the canceled flag set, so `on_disable` can tell this
    /// apart from normal completion.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.status.canceled = true;
        self.shut_down(handle, SR_CANCEL)
    }

    /// Stop a task immediately without running `on_disable`.
    pub fn abort(&mut self, handle: TaskHandle) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        let was_enabled = task.status.enabled;
        task.status.enabled = false;
        task.status.in_on_enable = false;
        task.status.waiting = None;
        task.status.canceled = true;
        task.own_request.signal_complete(SR_ABORT);
        trace!("task {} aborted", task.id);
        was_enabled
    }

    /// Reload the original iteration budget and enable.
    pub fn restart(&mut self, handle: TaskHandle) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.iterations = task.set_iterations;
        self.enable(handle)
    }

    /// Reload the original iteration budget and enable after `delay`.
    pub fn restart_delayed(&mut self, handle: TaskHandle, delay: u32) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.iterations = task.set_iterations;
        self.enable_delayed(handle, delay)
    }

    // -----------------------------------------------------------------------
    // Timing
    // -----------------------------------------------------------------------

    /// Change the period. The next run is a full new interval from now.
    pub fn set_interval(&mut self, handle: TaskHandle, interval: u32) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.interval = interval;
        self.delay(handle, 0)
    }

    /// Set both the remaining and the original iteration budget.
    pub fn set_iterations(&mut self, handle: TaskHandle, iterations: i32) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.iterations = iterations;
        task.set_iterations = iterations;
        true
    }

    /// Schedule the next run `delay` from now. Zero means one full interval.
    pub fn delay(&mut self, handle: TaskHandle, delay: u32) -> bool {
        let now = self.clock.now();
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.delay = if delay == 0 { task.interval } else { delay };
        task.anchor = now;
        true
    }

    /// Shift the next run by `by`: later for positive values, earlier for
    /// negative ones. Elapsed time already counted is kept.
    pub fn adjust(&mut self, handle: TaskHandle, by: i32) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        if by < 0 {
            task.anchor = task.anchor.wrapping_add_signed(by);
        } else {
            task.delay = task.delay.wrapping_add(by as u32);
        }
        true
    }

    /// Make the task due on its next visit.
    pub fn force_next_iteration(&mut self, handle: TaskHandle) -> bool {
        let now = self.clock.now();
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.delay = task.interval;
        task.anchor = timing::due_now(now, task.interval);
        true
    }

    // -----------------------------------------------------------------------
    // Waiting on status requests
    // -----------------------------------------------------------------------

    /// Block the task on `awaited`, then enable it. Once the request
    /// completes the task runs `iterations` times every `interval`, the
    /// first run on the same pass that observes completion.
    ///
    /// Rejected (task left as is) if the task is detached, or if `awaited`
    /// names the task itself or a task that neither this scheduler nor a
    /// higher-priority layer knows.
    pub fn wait_for(
        &mut self,
        handle: TaskHandle,
        awaited: Awaited<'a>,
        interval: u32,
        iterations: i32,
    ) -> bool {
        self.begin_wait(handle, awaited, WaitMode::NoDelay, interval, iterations)
    }

    /// Like [`wait_for`](Self::wait_for), but the first run comes a full
    /// `interval` after completion is observed.
    pub fn wait_for_delayed(
        &mut self,
        handle: TaskHandle,
        awaited: Awaited<'a>,
        interval: u32,
        iterations: i32,
    ) -> bool {
        self.begin_wait(handle, awaited, WaitMode::Delayed, interval, iterations)
    }

    fn begin_wait(
        &mut self,
        handle: TaskHandle,
        awaited: Awaited<'a>,
        mode: WaitMode,
        interval: u32,
        iterations: i32,
    ) -> bool {
        if let Awaited::Task(other) = awaited {
            if other == handle || self.find_task(other).is_none() {
                return false;
            }
        }
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        if !task.link.linked {
            return false;
        }
        task.awaited = Some(awaited);
        self.set_iterations(handle, iterations);
        self.set_interval(handle, interval);
        if let Some(task) = self.task_mut(handle) {
            task.status.waiting = Some(mode);
        }
        self.enable(handle)
    }

    // -----------------------------------------------------------------------
    // Overall timeout
    // -----------------------------------------------------------------------

    /// Bound the task's total enabled time. Zero disables the timeout.
    pub fn set_timeout(&mut self, handle: TaskHandle, timeout: u32, reset: bool) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.timeout = timeout;
        if reset {
            self.reset_timeout(handle);
        }
        true
    }

    /// Restart the timeout window from now and clear the timed-out flag.
    pub fn reset_timeout(&mut self, handle: TaskHandle) -> bool {
        let now = self.clock.now();
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.timeout_anchor = now;
        task.status.timed_out = false;
        true
    }

    /// Time left before the task times out, `-1` without a timeout.
    pub fn until_timeout(&self, handle: TaskHandle) -> i32 {
        match self.task(handle) {
            Some(task) if task.timeout != 0 => task
                .timeout_anchor
                .wrapping_add(task.timeout)
                .wrapping_sub(self.clock.now()) as i32,
            _ => -1,
        }
    }

    // -----------------------------------------------------------------------
    // Yield
    // -----------------------------------------------------------------------

    /// Continue the current logical run in `next` on the following visit.
    ///
    /// The run counter and iteration budget are rolled back so the split
    /// callbacks count as one run. Only closure bindings can yield.
    pub fn yield_to(&mut self, handle: TaskHandle, next: Callback<'a>) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        if matches!(task.binding, Binding::Handler(_)) {
            return false;
        }
        task.binding = task.binding.with_on_fire(Some(next));
        self.force_next_iteration(handle);

        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.run_counter = task.run_counter.wrapping_sub(1);
        if task.iterations >= 0 {
            task.iterations = task.iterations.saturating_add(1);
        }
        true
    }

    /// Run `next` exactly once more, then let the task disable.
    pub fn yield_once(&mut self, handle: TaskHandle, next: Callback<'a>) -> bool {
        if !self.yield_to(handle, next) {
            return false;
        }
        if let Some(task) = self.task_mut(handle) {
            task.iterations = 1;
        }
        true
    }

    // -----------------------------------------------------------------------
    // Rebinding and bookkeeping
    // -----------------------------------------------------------------------

    /// Reconfigure period, budget, and behavior in one go.
    pub fn set(
        &mut self,
        handle: TaskHandle,
        interval: u32,
        iterations: i32,
        binding: Binding<'a>,
    ) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.binding = binding;
        self.set_iterations(handle, iterations);
        self.set_interval(handle, interval)
    }

    pub fn set_callback(&mut self, handle: TaskHandle, f: Option<Callback<'a>>) -> bool {
        self.rebind(handle, |b| b.with_on_fire(f))
    }

    pub fn set_on_enable(&mut self, handle: TaskHandle, f: Option<OnEnable<'a>>) -> bool {
        self.rebind(handle, |b| b.with_on_enable(f))
    }

    pub fn set_on_disable(&mut self, handle: TaskHandle, f: Option<OnDisable<'a>>) -> bool {
        self.rebind(handle, |b| b.with_on_disable(f))
    }

    /// Bind a handler object, replacing any closures.
    pub fn set_handler(&mut self, handle: TaskHandle, h: &'a dyn Handler<'a>) -> bool {
        self.rebind(handle, |_| Binding::Handler(h))
    }

    fn rebind(&mut self, handle: TaskHandle, f: impl FnOnce(Binding<'a>) -> Binding<'a>) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.binding = f(task.binding);
        true
    }

    pub fn set_scheduling_option(&mut self, handle: TaskHandle, option: SchedulingOption) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.option = option;
        true
    }

    pub fn set_local_storage(&mut self, handle: TaskHandle, data: Option<LocalStorage<'a>>) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.local = data;
        true
    }

    /// Override the diagnostic id.
    pub fn set_id(&mut self, handle: TaskHandle, id: u32) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.id = id;
        true
    }

    /// Record where the task currently is. Reset to 0 on every visit.
    pub fn set_control_point(&mut self, handle: TaskHandle, point: u32) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        task.control_point = point;
        true
    }

    /// Run `f` with the current-task marker pointing at `handle`.
    fn with_current<R>(&mut self, handle: TaskHandle, f: impl FnOnce(&mut Self) -> R) -> R {
        let saved = self.current.replace(handle.index);
        let out = f(self);
        self.current = saved;
        out
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
