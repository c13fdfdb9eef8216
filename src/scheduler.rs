//! # Scheduler
//!
//! Owns a fixed table of task slots, threads the live ones into an ordered
//! chain, and walks that chain once per [`execute`](Scheduler::execute)
//! call.
//!
//! ## Execution Pass
//!
//! For each task in chain order:
//! 1. **Priority layer**: run one full pass of the higher-priority
//!    scheduler, if one is attached. Higher layers are therefore revisited
//!    before every base step, not once per base pass.
//! 2. **Filter**: skip disabled and busy tasks. Lazily disable tasks whose
//!    iteration budget is exhausted or whose overall timeout has expired.
//! 3. **Wait**: a task blocked on a pending status request is skipped. Once
//!    the request completes the task resumes, immediately or after a full
//!    delay depending on how it started waiting.
//! 4. **Due check**: skip tasks whose delay has not elapsed since the anchor.
//! 5. **Fire**: consume one iteration, advance the anchor according to the
//!    task's [`SchedulingOption`], record overrun diagnostics, invoke the
//!    callback.
//!
//! The successor is captured before a task fires, so a callback may unlink
//! or destroy its own task without derailing the walk.
//!
//! ## Idle Passes
//!
//! A pass in which no callback ran, in this layer or any higher one, is
//! idle. The sleep-owning scheduler (by default every scheduler that is not
//! attached as someone's higher-priority layer) then calls its suspend hook
//! with the pass duration.
//!
//! ```text
//!   base chain:   B1 ─────── B2 ─────── B3
//!                 ▲          ▲          ▲
//!   high pass:    H1 H2      H1 H2      H1 H2      (before every base step)
//! ```

use core::sync::atomic::{AtomicU16, Ordering};

use crate::clock::Clock;
use crate::config::MAX_TASKS;
use crate::error::{Error, Result};
use crate::log::{debug, trace};
use crate::status::{StatusRequest, SR_TIMEOUT};
use crate::task::{Awaited, LocalStorage, Task, TaskConfig, TaskHandle, WaitMode};
use crate::timing::{self, SchedulingOption};

/// Suspend hook, called with the duration of the idle pass.
pub type SleepMethod<'a> = &'a dyn Fn(u32);

/// Source of scheduler tags. Every handle carries the tag of the scheduler
/// that issued it.
static NEXT_TAG: AtomicU16 = AtomicU16::new(1);

// ---------------------------------------------------------------------------
// Slots and accounting
// ---------------------------------------------------------------------------

/// One entry of the task table. The generation outlives the task so that
/// handles to a destroyed task never match a later occupant.
pub(crate) struct Slot<'a> {
    pub(crate) generation: u16,
    pub(crate) task: Option<Task<'a>>,
}

impl<'a> Slot<'a> {
    const EMPTY: Self = Self {
        generation: 0,
        task: None,
    };
}

/// Cumulative time accounting, in clock units.
#[derive(Debug, Clone, Copy, Default)]
struct CpuLoad {
    /// Start of the accounting window.
    start: u32,
    /// Time spent in scheduling overhead (pass time not spent in callbacks).
    cycle: u32,
    /// Time spent inside the suspend hook.
    idle: u32,
}

/// Chain walker returned by [`Scheduler::iter`].
pub struct Handles<'s, 'a> {
    sched: &'s Scheduler<'a>,
    cursor: Option<u16>,
}

impl Iterator for Handles<'_, '_> {
    type Item = TaskHandle;

    fn next(&mut self) -> Option<TaskHandle> {
        let index = self.cursor?;
        self.cursor = self.sched.task_at(index).and_then(|t| t.link.next);
        Some(self.sched.handle_at(index))
    }
}

/// Outcome of visiting one task.
enum Visit {
    Skipped,
    Ran { invoked: bool, spent: u32 },
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// A cooperative scheduler: one chain of tasks, one pass per `execute()`.
///
/// ## Design Notes
///
/// - Tasks live inline in a fixed-size slot table (no heap)
/// - The chain is doubly linked through slot indices
/// - `current` names the task whose callback or hook is running, so a
///   callback can find itself
/// - A higher-priority scheduler is held as an exclusive borrow, which also
///   rules out attaching a scheduler to itself or building a cycle
pub struct Scheduler<'a> {
    tag: u16,
    slots: [Slot<'a>; MAX_TASKS],
    head: Option<u16>,
    tail: Option<u16>,
    len: usize,
    pub(crate) current: Option<u16>,
    next_id: u32,
    enabled: bool,
    paused: bool,
    executing: bool,
    pub(crate) clock: &'a dyn Clock,
    high: Option<&'a mut Scheduler<'a>>,
    allow_sleep: bool,
    sleep: Option<SleepMethod<'a>>,
    load: CpuLoad,
}

impl<'a> Scheduler<'a> {
    /// Create an empty, enabled scheduler driven by `clock`.
    pub fn new(clock: &'a dyn Clock) -> Self {
        let start = clock.now();
        Self {
            tag: NEXT_TAG.fetch_add(1, Ordering::Relaxed),
            slots: [Slot::EMPTY; MAX_TASKS],
            head: None,
            tail: None,
            len: 0,
            current: None,
            next_id: 1,
            enabled: true,
            paused: false,
            executing: false,
            clock,
            high: None,
            allow_sleep: true,
            sleep: None,
            load: CpuLoad {
                start,
                ..CpuLoad::default()
            },
        }
    }

    /// Current time of the scheduler's clock.
    #[inline]
    pub fn now(&self) -> u32 {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Slot access
    // -----------------------------------------------------------------------

    /// Look up a task by handle. `None` for stale handles and for handles
    /// issued by another scheduler.
    pub fn task(&self, handle: TaskHandle) -> Option<&Task<'a>> {
        if handle.scheduler != self.tag {
            return None;
        }
        let slot = self.slots.get(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.task.as_ref()
    }

    pub(crate) fn task_mut(&mut self, handle: TaskHandle) -> Option<&mut Task<'a>> {
        if handle.scheduler != self.tag {
            return None;
        }
        let slot = self.slots.get_mut(handle.index())?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.task.as_mut()
    }

    /// Look up a task here or in any higher-priority layer.
    pub(crate) fn find_task(&self, handle: TaskHandle) -> Option<&Task<'a>> {
        match self.task(handle) {
            Some(task) => Some(task),
            None => self.high.as_deref().and_then(|high| high.find_task(handle)),
        }
    }

    fn task_at(&self, index: u16) -> Option<&Task<'a>> {
        self.slots.get(index as usize)?.task.as_ref()
    }

    fn task_at_mut(&mut self, index: u16) -> Option<&mut Task<'a>> {
        self.slots.get_mut(index as usize)?.task.as_mut()
    }

    fn handle_at(&self, index: u16) -> TaskHandle {
        TaskHandle {
            scheduler: self.tag,
            index,
            generation: self.slots[index as usize].generation,
        }
    }

    /// Number of tasks linked into the chain.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Handles of the linked tasks, in chain order.
    pub fn iter(&self) -> Handles<'_, 'a> {
        Handles {
            sched: self,
            cursor: self.head,
        }
    }

    fn snapshot(&self) -> [Option<TaskHandle>; MAX_TASKS] {
        let mut handles = [None; MAX_TASKS];
        for (dst, handle) in handles.iter_mut().zip(self.iter()) {
            *dst = Some(handle);
        }
        handles
    }

    // -----------------------------------------------------------------------
    // Task creation and chain maintenance
    // -----------------------------------------------------------------------

    /// Create a task, link it at the end of the chain, and enable it if the
    /// configuration asks for that.
    pub fn create(&mut self, config: TaskConfig<'a>) -> Result<TaskHandle> {
        let handle = self.create_detached(config)?;
        self.add_task(handle);
        if config.enable {
            self.enable(handle);
        }
        Ok(handle)
    }

    /// Create a task without linking it. It cannot be enabled until it is
    /// added with [`add_task`](Self::add_task).
    pub fn create_detached(&mut self, config: TaskConfig<'a>) -> Result<TaskHandle> {
        let index = self
            .slots
            .iter()
            .position(|slot| slot.task.is_none())
            .ok_or(Error::TaskTableFull(MAX_TASKS))?;

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        let slot = &mut self.slots[index];
        slot.task = Some(Task::new(id, &config));
        trace!("task {} created in slot {}", id, index);

        Ok(TaskHandle {
            scheduler: self.tag,
            index: index as u16,
            generation: slot.generation,
        })
    }

    /// Disable (running `on_disable`), unlink, and free a task.
    ///
    /// Safe to call from the task's own callback. Returns `false` for a
    /// stale handle.
    pub fn destroy(&mut self, handle: TaskHandle) -> bool {
        if self.task(handle).is_none() {
            return false;
        }
        self.disable(handle);
        self.delete_task(handle);

        // The disable hook may already have destroyed the task.
        let Some(slot) = self.slots.get_mut(handle.index()) else {
            return false;
        };
        if slot.generation != handle.generation || slot.task.is_none() {
            return true;
        }
        slot.task = None;
        slot.generation = slot.generation.wrapping_add(1);
        trace!("slot {} freed", handle.index());
        true
    }

    /// Link a detached task at the end of the chain.
    ///
    /// No-op (returning `false`) if the task is already linked.
    pub fn add_task(&mut self, handle: TaskHandle) -> bool {
        let tail = self.tail;
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        if task.link.linked {
            return false;
        }
        task.link.linked = true;
        task.link.prev = tail;
        task.link.next = None;

        match tail.and_then(|t| self.task_at_mut(t)) {
            Some(last) => last.link.next = Some(handle.index),
            None => self.head = Some(handle.index),
        }
        self.tail = Some(handle.index);
        self.len += 1;
        true
    }

    /// Unlink a task from the chain. The task keeps its slot and state but
    /// will not be visited until added again.
    ///
    /// No-op (returning `false`) if the task is not linked.
    pub fn delete_task(&mut self, handle: TaskHandle) -> bool {
        let Some(task) = self.task_mut(handle) else {
            return false;
        };
        if !task.link.linked {
            return false;
        }
        let link = task.link;
        task.link = Default::default();

        match link.prev.and_then(|p| self.task_at_mut(p)) {
            Some(prev) => prev.link.next = link.next,
            None => self.head = link.next,
        }
        match link.next.and_then(|n| self.task_at_mut(n)) {
            Some(next) => next.link.prev = link.prev,
            None => self.tail = link.prev,
        }
        self.len -= 1;
        true
    }

    // -----------------------------------------------------------------------
    // Global gates
    // -----------------------------------------------------------------------

    /// Re-enable passes after [`disable`](Self::disable_scheduler).
    pub fn enable_scheduler(&mut self) {
        self.enabled = true;
    }

    /// Turn every pass into an idle no-op. Task states are untouched.
    pub fn disable_scheduler(&mut self) {
        self.enabled = false;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Stop chain traversal, starting with the next step of a running pass.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Enable every linked task, and the higher-priority layer's tasks if
    /// `recursive`.
    pub fn enable_all(&mut self, recursive: bool) {
        for handle in self.snapshot().into_iter().flatten() {
            self.enable(handle);
        }
        if recursive {
            if let Some(high) = self.high.as_deref_mut() {
                high.enable_all(true);
            }
        }
    }

    /// Disable every linked task, and the higher-priority layer's tasks if
    /// `recursive`.
    pub fn disable_all(&mut self, recursive: bool) {
        for handle in self.snapshot().into_iter().flatten() {
            self.disable(handle);
        }
        if recursive {
            if let Some(high) = self.high.as_deref_mut() {
                high.disable_all(true);
            }
        }
    }

    /// Make every enabled task due on its next visit.
    pub fn start_now(&mut self, recursive: bool) {
        let now = self.clock.now();
        for handle in self.snapshot().into_iter().flatten() {
            if let Some(task) = self.task_mut(handle) {
                if task.status.enabled {
                    task.anchor = now.wrapping_sub(task.delay);
                }
            }
        }
        if recursive {
            if let Some(high) = self.high.as_deref_mut() {
                high.start_now(true);
            }
        }
    }

    // -----------------------------------------------------------------------
    // Priority layering and sleep
    // -----------------------------------------------------------------------

    /// Attach `high` as this scheduler's higher-priority layer.
    ///
    /// The attached scheduler stops owning sleep: only the lowest layer
    /// should put the host to sleep.
    pub fn set_high_priority_scheduler(&mut self, high: &'a mut Scheduler<'a>) {
        high.allow_sleep(false);
        self.high = Some(high);
        debug!("higher-priority scheduler attached");
    }

    /// Detach and return the higher-priority layer.
    pub fn take_high_priority_scheduler(&mut self) -> Option<&'a mut Scheduler<'a>> {
        self.high.take()
    }

    pub fn high_priority(&self) -> Option<&Scheduler<'a>> {
        self.high.as_deref()
    }

    pub fn high_priority_mut(&mut self) -> Option<&mut Scheduler<'a>> {
        self.high.as_deref_mut()
    }

    /// Whether this scheduler may call its suspend hook on idle passes.
    pub fn allow_sleep(&mut self, allow: bool) {
        self.allow_sleep = allow;
    }

    pub fn set_sleep_method(&mut self, method: SleepMethod<'a>) {
        self.sleep = Some(method);
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Handle of the task whose callback or hook is running right now.
    pub fn current_handle(&self) -> Option<TaskHandle> {
        self.current.map(|index| self.handle_at(index))
    }

    pub fn current_task(&self) -> Option<&Task<'a>> {
        self.current.and_then(|index| self.task_at(index))
    }

    /// Local storage of the running task.
    pub fn current_local_storage(&self) -> Option<LocalStorage<'a>> {
        self.current_task().and_then(|t| t.local)
    }

    /// The running task started so late that its next run is already due.
    pub fn is_overrun(&self) -> bool {
        self.current_task().is_some_and(|t| t.overrun < 0)
    }

    /// Time until a task is next due, floored at zero. `-1` if the task is
    /// disabled, unknown, or blocked on a pending request.
    pub fn time_until_next_iteration(&self, handle: TaskHandle) -> i32 {
        let Some(task) = self.task(handle) else {
            return -1;
        };
        if !task.status.enabled {
            return -1;
        }
        if task.status.waiting.is_some() {
            if let Some(awaited) = task.awaited {
                if self.awaited_pending(awaited) {
                    return -1;
                }
            }
        }
        let left = timing::remaining(self.clock.now(), task.anchor, task.delay);
        i32::try_from(left).unwrap_or(i32::MAX)
    }

    /// Arm `request` for `count` signals, starting its timeout now.
    pub fn arm(&self, request: &StatusRequest, count: u32) {
        request.set_waiting(count, self.clock.now());
    }

    // -----------------------------------------------------------------------
    // Advisory busy flag
    // -----------------------------------------------------------------------

    /// Flag a task as being reconfigured from another context. Passes skip
    /// it until [`clear_busy`](Self::clear_busy).
    pub fn mark_busy(&self, handle: TaskHandle) -> bool {
        self.task(handle).map(|t| t.busy.set()).is_some()
    }

    pub fn clear_busy(&self, handle: TaskHandle) -> bool {
        self.task(handle).map(|t| t.busy.clear()).is_some()
    }

    // -----------------------------------------------------------------------
    // CPU accounting
    // -----------------------------------------------------------------------

    /// Restart the accounting window.
    pub fn cpu_load_reset(&mut self) {
        self.load = CpuLoad {
            start: self.clock.now(),
            ..CpuLoad::default()
        };
    }

    /// Time since the accounting window started.
    pub fn cpu_load_total(&self) -> u32 {
        timing::elapsed(self.clock.now(), self.load.start)
    }

    /// Time spent on scheduling overhead.
    pub fn cpu_load_cycle(&self) -> u32 {
        self.load.cycle
    }

    /// Time spent inside the suspend hook.
    pub fn cpu_load_idle(&self) -> u32 {
        self.load.idle
    }

    // -----------------------------------------------------------------------
    // Execution pass
    // -----------------------------------------------------------------------

    /// Run one scheduling pass. Returns `true` if the pass was idle (no
    /// callback ran here or in any higher-priority layer).
    ///
    /// A call from inside one of this scheduler's own callbacks is ignored
    /// and reported idle.
    pub fn execute(&mut self) -> bool {
        if self.executing {
            return true;
        }
        let pass_start = self.clock.now();
        let mut idle = true;
        let mut spent: u32 = 0;

        // Priority work must not starve just because this chain is empty.
        if self.head.is_none() {
            if let Some(high) = self.high.as_deref_mut() {
                let t0 = high.now();
                idle &= high.execute();
                spent = spent.wrapping_add(timing::elapsed(high.now(), t0));
            }
        }
        if !self.enabled {
            return true;
        }

        self.executing = true;
        let mut cursor = self.head;
        while !self.paused {
            let Some(index) = cursor else {
                break;
            };

            if let Some(high) = self.high.as_deref_mut() {
                let t0 = high.now();
                idle &= high.execute();
                spent = spent.wrapping_add(timing::elapsed(high.now(), t0));
            }

            let handle = self.handle_at(index);
            let next = self
                .task_at(index)
                .and_then(|t| t.link.next)
                .map(|n| self.handle_at(n));

            self.current = Some(index);
            if let Visit::Ran { invoked, spent: used } = self.visit(handle) {
                idle &= !invoked;
                spent = spent.wrapping_add(used);
            }
            cursor = self.successor(handle, next);
        }
        self.current = None;
        self.executing = false;

        let pass_end = self.clock.now();
        let pass_time = timing::elapsed(pass_end, pass_start);
        self.load.cycle = self
            .load
            .cycle
            .wrapping_add(pass_time.saturating_sub(spent));

        if idle && self.allow_sleep {
            if let Some(sleep) = self.sleep {
                sleep(pass_time);
                self.load.idle = self
                    .load
                    .idle
                    .wrapping_add(timing::elapsed(self.clock.now(), pass_end));
            }
        }
        idle
    }

    /// Where the walk continues after visiting `current`.
    ///
    /// Normally the successor captured before the visit. If the callback
    /// removed that task, fall back to the current task's fresh successor;
    /// if the current task is gone as well, the pass ends.
    fn successor(&self, current: TaskHandle, next: Option<TaskHandle>) -> Option<u16> {
        let next = next?;
        if self.task(next).is_some_and(|t| t.link.linked) {
            return Some(next.index);
        }
        self.task(current)
            .filter(|t| t.link.linked)
            .and_then(|t| t.link.next)
    }

    /// Apply the scheduling algorithm to one task.
    fn visit(&mut self, handle: TaskHandle) -> Visit {
        let now = self.clock.now();
        let Some(task) = self.task_mut(handle) else {
            return Visit::Skipped;
        };
        if !task.status.enabled || task.busy.is_set() {
            return Visit::Skipped;
        }
        task.control_point = 0;

        // Exhausted budget: lazy cleanup of finished tasks.
        if task.iterations == 0 {
            self.disable(handle);
            return Visit::Skipped;
        }

        if task.timeout != 0 && timing::elapsed(now, task.timeout_anchor) > task.timeout {
            task.status.timed_out = true;
            trace!("task {} timed out", task.id);
            self.shut_down(handle, SR_TIMEOUT);
            return Visit::Skipped;
        }

        let waiting = task.status.waiting;
        let awaited = task.awaited;
        if waiting.is_some() {
            if let Some(awaited) = awaited {
                self.poll_awaited_timeout(awaited, now);
                if self.awaited_pending(awaited) {
                    return Visit::Skipped;
                }
            }
        }

        let Some(task) = self.task_mut(handle) else {
            return Visit::Skipped;
        };
        if let Some(mode) = waiting {
            match mode {
                WaitMode::NoDelay => {
                    task.delay = task.interval;
                    task.anchor = timing::due_now(now, task.interval);
                }
                WaitMode::Delayed => task.anchor = now,
            }
            task.status.waiting = None;
        }

        if !timing::is_due(now, task.anchor, task.delay) {
            return Visit::Skipped;
        }

        if task.iterations > 0 {
            task.iterations -= 1;
        }
        task.run_counter = task.run_counter.wrapping_add(1);

        let ideal = task.anchor.wrapping_add(task.delay);
        task.anchor = timing::advance(task.option, task.anchor, task.delay, task.interval, now);
        task.overrun = timing::overrun(task.anchor, task.interval, now);
        task.start_delay = timing::start_delay(ideal, now);
        task.delay = task.interval;

        let binding = task.binding;
        let option = task.option;
        let anchor = task.anchor;

        let started = self.clock.now();
        let invoked = binding.fire(self);
        let finished = self.clock.now();

        if option == SchedulingOption::Interval {
            // Measure the next wait from completion, unless the callback
            // re-timed its own task.
            if let Some(task) = self.task_mut(handle) {
                if task.anchor == anchor {
                    task.anchor = finished;
                }
            }
        }

        Visit::Ran {
            invoked,
            spent: timing::elapsed(finished, started),
        }
    }

    fn poll_awaited_timeout(&self, awaited: Awaited<'a>, now: u32) {
        let request = match awaited {
            Awaited::Request(sr) => Some(sr),
            Awaited::Task(other) => self.find_task(other).map(|t| &t.own_request),
        };
        if let Some(sr) = request {
            if sr.poll_timeout(now) {
                debug!("status request timed out");
            }
        }
    }

    /// Whether a wait source is still pending. A vanished task counts as
    /// complete: destroying it disabled it first.
    pub(crate) fn awaited_pending(&self, awaited: Awaited<'a>) -> bool {
        match awaited {
            Awaited::Request(sr) => sr.pending(),
            Awaited::Task(other) => self
                .find_task(other)
                .is_some_and(|t| t.own_request.pending()),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FOREVER;
    use core::cell::{Cell, RefCell};
    use std::vec::Vec;

    /// Walk the chain both ways and check every link.
    fn assert_chain_consistent(sched: &Scheduler<'_>) {
        let mut count = 0;
        let mut prev: Option<u16> = None;
        let mut cursor = sched.head;
        while let Some(index) = cursor {
            let task = sched.task_at(index).expect("linked slot must hold a task");
            assert!(task.link.linked);
            assert_eq!(task.link.prev, prev);
            count += 1;
            assert!(count <= MAX_TASKS, "cycle in chain");
            prev = Some(index);
            cursor = task.link.next;
        }
        assert_eq!(sched.tail, prev);
        assert_eq!(sched.len(), count);
        if let Some(head) = sched.head {
            assert_eq!(sched.task_at(head).and_then(|t| t.link.prev), None);
        }
    }

    fn run(sched: &mut Scheduler<'_>, clock: &ManualClock, from: u32, to: u32) {
        for t in from..to {
            clock.set(t);
            sched.execute();
        }
    }

    #[test]
    fn test_three_iterations_then_disabled() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        let t = sched
            .create(TaskConfig::new(100, 3).on_fire(&body).enabled())
            .unwrap();

        run(&mut sched, &clock, 0, 1_000);

        assert_eq!(runs.get(), 3);
        let task = sched.task(t).unwrap();
        assert!(!task.is_enabled());
        assert_eq!(task.run_counter(), 3);
    }

    #[test]
    fn test_forever_task_stays_enabled() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        let t = sched
            .create(TaskConfig::new(10, FOREVER).on_fire(&body).enabled())
            .unwrap();

        run(&mut sched, &clock, 0, 10_000);

        assert_eq!(runs.get(), 1_000);
        let task = sched.task(t).unwrap();
        assert!(task.is_enabled());
        assert_eq!(task.iterations(), FOREVER);
    }

    #[test]
    fn test_first_and_last_iteration_flags() {
        let clock = ManualClock::new();
        let seen = RefCell::new(Vec::new());
        let body = |s: &mut Scheduler<'_>| {
            let task = s.current_task().unwrap();
            seen.borrow_mut()
                .push((task.is_first_iteration(), task.is_last_iteration()));
        };

        let mut sched = Scheduler::new(&clock);
        sched
            .create(TaskConfig::new(5, 4).on_fire(&body).enabled())
            .unwrap();
        run(&mut sched, &clock, 0, 100);

        assert_eq!(
            *seen.borrow(),
            [(true, false), (false, false), (false, false), (false, true)]
        );
    }

    #[test]
    fn test_tasks_fire_in_chain_order() {
        let clock = ManualClock::new();
        let log = RefCell::new(Vec::new());
        let a = |_: &mut Scheduler<'_>| log.borrow_mut().push('a');
        let b = |_: &mut Scheduler<'_>| log.borrow_mut().push('b');
        let c = |_: &mut Scheduler<'_>| log.borrow_mut().push('c');

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(10, 1).on_fire(&c).enabled()).unwrap();
        sched.create(TaskConfig::new(10, 1).on_fire(&a).enabled()).unwrap();
        sched.create(TaskConfig::new(10, 1).on_fire(&b).enabled()).unwrap();
        sched.execute();

        assert_eq!(*log.borrow(), ['c', 'a', 'b']);
    }

    #[test]
    fn test_add_and_delete_are_idempotent() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        let a = sched.create(TaskConfig::new(10, 1)).unwrap();
        let b = sched.create(TaskConfig::new(10, 1)).unwrap();
        let c = sched.create_detached(TaskConfig::new(10, 1)).unwrap();

        assert!(!sched.add_task(a));
        assert_eq!(sched.len(), 2);
        assert!(!sched.delete_task(c));

        assert!(sched.delete_task(a));
        assert!(!sched.delete_task(a));
        assert_chain_consistent(&sched);

        assert!(sched.add_task(c));
        assert!(sched.add_task(a));
        assert_chain_consistent(&sched);
        assert_eq!(sched.iter().collect::<Vec<_>>(), [b, c, a]);
    }

    #[test]
    fn test_chain_survives_arbitrary_removals() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        let handles: Vec<_> = (0..8)
            .map(|_| sched.create(TaskConfig::new(1, FOREVER)).unwrap())
            .collect();

        for &h in [handles[0], handles[7], handles[3], handles[4]].iter() {
            assert!(sched.delete_task(h));
            assert_chain_consistent(&sched);
        }
        assert!(sched.destroy(handles[5]));
        assert_chain_consistent(&sched);
        assert!(sched.add_task(handles[0]));
        assert_chain_consistent(&sched);

        assert_eq!(
            sched.iter().collect::<Vec<_>>(),
            [handles[1], handles[2], handles[6], handles[0]]
        );
    }

    #[test]
    fn test_detached_task_cannot_enable() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        let t = sched.create_detached(TaskConfig::new(10, 1)).unwrap();

        assert!(!sched.enable(t));
        assert!(!sched.task(t).unwrap().is_enabled());

        sched.add_task(t);
        assert!(sched.enable(t));
    }

    #[test]
    fn test_stale_handle_is_ignored() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        let old = sched.create(TaskConfig::new(10, 1)).unwrap();
        assert!(sched.destroy(old));

        let new = sched.create(TaskConfig::new(10, 1)).unwrap();
        assert_eq!(old.index(), new.index());
        assert!(sched.task(old).is_none());
        assert!(!sched.enable(old));
        assert!(!sched.destroy(old));
        assert!(sched.task(new).is_some());
    }

    #[test]
    fn test_handle_from_another_scheduler_is_ignored() {
        let clock = ManualClock::new();
        let mut high = Scheduler::new(&clock);
        let mut base = Scheduler::new(&clock);
        let h = high.create(TaskConfig::new(10, FOREVER).enabled()).unwrap();
        let b = base.create(TaskConfig::new(10, FOREVER).enabled()).unwrap();
        assert_eq!(h.index(), b.index());

        assert!(base.task(h).is_none());
        assert!(!base.disable(h));
        assert!(!base.destroy(h));
        assert!(base.task(b).unwrap().is_enabled());
        assert!(high.task(h).unwrap().is_enabled());
    }

    #[test]
    fn test_wait_on_task_in_higher_layer() {
        let clock = ManualClock::new();
        let fired_at = Cell::new(None);
        let body = |_: &mut Scheduler<'_>| fired_at.set(Some(clock.now()));

        let mut high = Scheduler::new(&clock);
        let h = high.create(TaskConfig::new(50, 2).enabled()).unwrap();
        let mut base = Scheduler::new(&clock);
        let b = base.create(TaskConfig::new(0, 1).on_fire(&body)).unwrap();

        // Unknown until the layer is attached.
        assert!(!base.wait_for(b, Awaited::Task(h), 0, 1));
        base.set_high_priority_scheduler(&mut high);
        assert!(!base.disable(h));
        assert!(base.wait_for(b, Awaited::Task(h), 0, 1));
        assert_eq!(base.time_until_next_iteration(b), -1);

        run(&mut base, &clock, 0, 200);

        let high = base.high_priority().unwrap();
        assert!(!high.task(h).unwrap().is_enabled());
        assert!(fired_at.get().is_some_and(|t| t >= 50));
        assert!(!base.task(b).unwrap().is_enabled());
    }

    #[test]
    fn test_table_full() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        for _ in 0..MAX_TASKS {
            sched.create(TaskConfig::new(1, 1)).unwrap();
        }
        assert_eq!(
            sched.create(TaskConfig::new(1, 1)),
            Err(Error::TaskTableFull(MAX_TASKS))
        );
    }

    #[test]
    fn test_ids_come_from_scheduler_counter() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        let a = sched.create(TaskConfig::new(1, 1)).unwrap();
        let b = sched.create(TaskConfig::new(1, 1)).unwrap();
        assert_eq!(sched.task(a).unwrap().id(), 1);
        assert_eq!(sched.task(b).unwrap().id(), 2);
    }

    #[test]
    fn test_self_destruct_during_pass() {
        let clock = ManualClock::new();
        let log = RefCell::new(Vec::new());
        let first = |_: &mut Scheduler<'_>| log.borrow_mut().push(1);
        let doomed = |s: &mut Scheduler<'_>| {
            log.borrow_mut().push(2);
            let me = s.current_handle().unwrap();
            assert!(s.destroy(me));
        };
        let last = |_: &mut Scheduler<'_>| log.borrow_mut().push(3);

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(10, FOREVER).on_fire(&first).enabled()).unwrap();
        let d = sched.create(TaskConfig::new(10, FOREVER).on_fire(&doomed).enabled()).unwrap();
        sched.create(TaskConfig::new(10, FOREVER).on_fire(&last).enabled()).unwrap();

        sched.execute();
        assert_eq!(*log.borrow(), [1, 2, 3]);
        assert!(sched.task(d).is_none());
        assert_eq!(sched.len(), 2);
        assert_chain_consistent(&sched);

        clock.set(10);
        sched.execute();
        assert_eq!(*log.borrow(), [1, 2, 3, 1, 3]);
    }

    #[test]
    fn test_callback_removing_next_task() {
        let clock = ManualClock::new();
        let log = RefCell::new(Vec::new());
        let victim = Cell::new(None);
        let killer = |s: &mut Scheduler<'_>| {
            log.borrow_mut().push('k');
            if let Some(v) = victim.get() {
                s.delete_task(v);
            }
        };
        let other = |_: &mut Scheduler<'_>| log.borrow_mut().push('v');
        let tail = |_: &mut Scheduler<'_>| log.borrow_mut().push('t');

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(10, 1).on_fire(&killer).enabled()).unwrap();
        victim.set(Some(
            sched.create(TaskConfig::new(10, 1).on_fire(&other).enabled()).unwrap(),
        ));
        sched.create(TaskConfig::new(10, 1).on_fire(&tail).enabled()).unwrap();

        sched.execute();
        assert_eq!(*log.borrow(), ['k', 't']);
        assert_chain_consistent(&sched);
    }

    #[test]
    fn test_tasks_added_at_tail_wait_for_next_pass() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let spare = Cell::new(None);
        let spawned = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);
        let spawner = |s: &mut Scheduler<'_>| {
            if let Some(h) = spare.take() {
                s.add_task(h);
                s.enable(h);
            }
        };

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(0, 1).on_fire(&spawner).enabled()).unwrap();
        spare.set(Some(
            sched
                .create_detached(TaskConfig::new(0, 1).on_fire(&spawned))
                .unwrap(),
        ));

        sched.execute();
        assert_eq!(runs.get(), 0);
        sched.execute();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_schedule_catches_up() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(100, FOREVER).on_fire(&body).enabled()).unwrap();
        sched.execute();

        // Stall for 5 intervals, then pass repeatedly at the same instant.
        clock.set(550);
        for _ in 0..10 {
            sched.execute();
        }
        assert_eq!(runs.get(), 6);
    }

    #[test]
    fn test_no_catchup_bounds_backlog() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        let t = sched
            .create(
                TaskConfig::new(100, FOREVER)
                    .on_fire(&body)
                    .scheduling(SchedulingOption::ScheduleNoCatchup)
                    .enabled(),
            )
            .unwrap();
        sched.execute();

        clock.set(550);
        for _ in 0..10 {
            sched.execute();
        }
        assert_eq!(runs.get(), 2);
        assert_eq!(sched.time_until_next_iteration(t), 50);
    }

    #[test]
    fn test_interval_anchors_on_completion() {
        let clock = ManualClock::new();
        let starts = RefCell::new(Vec::new());
        let body = |_: &mut Scheduler<'_>| {
            starts.borrow_mut().push(clock.now());
            clock.advance(30);
        };

        let mut sched = Scheduler::new(&clock);
        sched
            .create(
                TaskConfig::new(100, 3)
                    .on_fire(&body)
                    .scheduling(SchedulingOption::Interval)
                    .enabled(),
            )
            .unwrap();

        for _ in 0..1_000 {
            sched.execute();
            clock.advance(1);
        }
        // Each run lasts 30 and is followed by a full 100 of idle time.
        assert_eq!(*starts.borrow(), [0, 130, 260]);
    }

    #[test]
    fn test_overrun_diagnostics() {
        let clock = ManualClock::new();
        let overrun = Cell::new(false);
        let body = |s: &mut Scheduler<'_>| overrun.set(s.is_overrun());

        let mut sched = Scheduler::new(&clock);
        let t = sched
            .create(TaskConfig::new(100, FOREVER).on_fire(&body).enabled())
            .unwrap();
        sched.execute();
        assert_eq!(sched.task(t).unwrap().start_delay(), 0);
        assert!(!overrun.get());

        clock.set(330);
        sched.execute();
        let task = sched.task(t).unwrap();
        assert_eq!(task.start_delay(), 230);
        assert_eq!(task.overrun(), -130);
        assert!(overrun.get());
    }

    #[test]
    fn test_priority_layer_interleaving() {
        let clock = ManualClock::new();
        let log = RefCell::new(Vec::new());
        let high_body = |_: &mut Scheduler<'_>| log.borrow_mut().push('H');
        let base_body = |_: &mut Scheduler<'_>| log.borrow_mut().push('B');

        let mut high = Scheduler::new(&clock);
        high.create(TaskConfig::new(50, FOREVER).on_fire(&high_body).enabled())
            .unwrap();
        let mut base = Scheduler::new(&clock);
        base.create(TaskConfig::new(200, FOREVER).on_fire(&base_body).enabled())
            .unwrap();
        base.set_high_priority_scheduler(&mut high);

        run(&mut base, &clock, 0, 200);

        let log = log.borrow();
        assert_eq!(log.iter().filter(|&&c| c == 'H').count(), 4);
        assert_eq!(log.iter().filter(|&&c| c == 'B').count(), 1);
        assert_eq!(log[0], 'H');
        assert_eq!(log[1], 'B');
    }

    #[test]
    fn test_high_layer_visited_before_every_base_step() {
        let clock = ManualClock::new();
        let log = RefCell::new(Vec::new());
        let h = |_: &mut Scheduler<'_>| log.borrow_mut().push("H");
        let b1 = |_: &mut Scheduler<'_>| log.borrow_mut().push("B1");
        let b2 = |_: &mut Scheduler<'_>| log.borrow_mut().push("B2");

        let mut high = Scheduler::new(&clock);
        high.create(TaskConfig::new(0, FOREVER).on_fire(&h).enabled()).unwrap();
        let mut base = Scheduler::new(&clock);
        base.create(TaskConfig::new(0, FOREVER).on_fire(&b1).enabled()).unwrap();
        base.create(TaskConfig::new(0, FOREVER).on_fire(&b2).enabled()).unwrap();
        base.set_high_priority_scheduler(&mut high);

        base.execute();
        assert_eq!(*log.borrow(), ["H", "B1", "H", "B2"]);
    }

    #[test]
    fn test_empty_base_still_runs_high_layer() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let h = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut high = Scheduler::new(&clock);
        high.create(TaskConfig::new(0, FOREVER).on_fire(&h).enabled()).unwrap();
        let mut base = Scheduler::new(&clock);
        base.set_high_priority_scheduler(&mut high);

        base.execute();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_recursive_enable_and_disable_all() {
        let clock = ManualClock::new();
        let mut high = Scheduler::new(&clock);
        let h = high.create(TaskConfig::new(10, FOREVER)).unwrap();
        let mut base = Scheduler::new(&clock);
        let b = base.create(TaskConfig::new(10, FOREVER)).unwrap();
        base.set_high_priority_scheduler(&mut high);

        base.enable_all(false);
        assert!(base.task(b).unwrap().is_enabled());
        assert!(!base.high_priority().unwrap().task(h).unwrap().is_enabled());

        base.enable_all(true);
        assert!(base.high_priority().unwrap().task(h).unwrap().is_enabled());

        base.disable_all(true);
        assert!(!base.task(b).unwrap().is_enabled());
        assert!(!base.high_priority().unwrap().task(h).unwrap().is_enabled());
    }

    #[test]
    fn test_sleep_only_on_idle_lowest_layer() {
        let clock = ManualClock::new();
        let base_sleeps = Cell::new(0u32);
        let high_sleeps = Cell::new(0u32);
        let base_sleep = |_: u32| base_sleeps.set(base_sleeps.get() + 1);
        let high_sleep = |_: u32| high_sleeps.set(high_sleeps.get() + 1);
        let noop = |_: &mut Scheduler<'_>| {};

        let mut high = Scheduler::new(&clock);
        high.set_sleep_method(&high_sleep);
        high.create(TaskConfig::new(100, FOREVER).on_fire(&noop).enabled())
            .unwrap();
        let mut base = Scheduler::new(&clock);
        base.set_sleep_method(&base_sleep);
        base.create(TaskConfig::new(1_000, FOREVER)).unwrap();
        base.set_high_priority_scheduler(&mut high);

        // t=0: the high task fires, so the pass is busy.
        base.execute();
        assert_eq!(base_sleeps.get(), 0);

        clock.set(10);
        base.execute();
        assert_eq!(base_sleeps.get(), 1);
        assert_eq!(high_sleeps.get(), 0);
    }

    #[test]
    fn test_disabled_scheduler_is_idle_noop() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        let t = sched
            .create(TaskConfig::new(0, FOREVER).on_fire(&body).enabled())
            .unwrap();
        sched.disable_scheduler();
        assert!(sched.execute());
        assert_eq!(runs.get(), 0);
        assert!(sched.task(t).unwrap().is_enabled());

        sched.enable_scheduler();
        assert!(!sched.execute());
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_pause_from_callback_stops_walk() {
        let clock = ManualClock::new();
        let log = RefCell::new(Vec::new());
        let pauser = |s: &mut Scheduler<'_>| {
            log.borrow_mut().push(1);
            s.pause();
        };
        let other = |_: &mut Scheduler<'_>| log.borrow_mut().push(2);

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(0, 1).on_fire(&pauser).enabled()).unwrap();
        let o = sched.create(TaskConfig::new(0, 1).on_fire(&other).enabled()).unwrap();

        sched.execute();
        sched.execute();
        assert_eq!(*log.borrow(), [1]);
        assert!(sched.is_paused());
        assert!(sched.task(o).unwrap().is_enabled());

        sched.resume();
        sched.execute();
        assert_eq!(*log.borrow(), [1, 2]);
    }

    #[test]
    fn test_nested_execute_is_ignored() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |s: &mut Scheduler<'_>| {
            runs.set(runs.get() + 1);
            assert!(s.execute());
        };

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(0, FOREVER).on_fire(&body).enabled()).unwrap();
        sched.execute();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_busy_task_is_skipped() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        let t = sched
            .create(TaskConfig::new(0, FOREVER).on_fire(&body).enabled())
            .unwrap();

        assert!(sched.mark_busy(t));
        assert!(sched.task(t).unwrap().is_busy());
        sched.execute();
        assert_eq!(runs.get(), 0);

        assert!(sched.clear_busy(t));
        sched.execute();
        assert_eq!(runs.get(), 1);
    }

    #[test]
    fn test_time_until_next_iteration() {
        let clock = ManualClock::new();
        let mut sched = Scheduler::new(&clock);
        let t = sched.create(TaskConfig::new(100, FOREVER).enabled()).unwrap();
        assert_eq!(sched.time_until_next_iteration(t), 0);

        sched.execute();
        clock.set(30);
        assert_eq!(sched.time_until_next_iteration(t), 70);

        clock.set(500);
        assert_eq!(sched.time_until_next_iteration(t), 0);

        sched.disable(t);
        assert_eq!(sched.time_until_next_iteration(t), -1);
    }

    #[test]
    fn test_start_now() {
        let clock = ManualClock::new();
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(100, FOREVER).on_fire(&body).enabled()).unwrap();
        sched.execute();
        clock.set(20);
        sched.execute();
        assert_eq!(runs.get(), 1);

        sched.start_now(false);
        sched.execute();
        assert_eq!(runs.get(), 2);
    }

    #[test]
    fn test_cpu_accounting() {
        let clock = ManualClock::new();
        let slept = Cell::new(0u32);
        let sleep = |_: u32| {
            clock.advance(7);
            slept.set(slept.get() + 1);
        };
        let body = |_: &mut Scheduler<'_>| clock.advance(5);

        let mut sched = Scheduler::new(&clock);
        sched.set_sleep_method(&sleep);
        sched.create(TaskConfig::new(100, 1).on_fire(&body).enabled()).unwrap();

        // Busy pass: the callback's 5 units are not overhead.
        sched.execute();
        assert_eq!(sched.cpu_load_cycle(), 0);
        assert_eq!(sched.cpu_load_idle(), 0);

        // Idle pass: 7 units asleep.
        sched.execute();
        assert_eq!(slept.get(), 1);
        assert_eq!(sched.cpu_load_idle(), 7);
        assert_eq!(sched.cpu_load_total(), 12);

        sched.cpu_load_reset();
        assert_eq!(sched.cpu_load_total(), 0);
        assert_eq!(sched.cpu_load_idle(), 0);
    }

    #[test]
    fn test_local_storage_serves_many_tasks() {
        let clock = ManualClock::new();
        let left = Cell::new(0u32);
        let right = Cell::new(0u32);
        let bump = |s: &mut Scheduler<'_>| {
            if let Some(counter) = s
                .current_local_storage()
                .and_then(|d| d.downcast_ref::<Cell<u32>>())
            {
                counter.set(counter.get() + 1);
            }
        };

        let mut sched = Scheduler::new(&clock);
        sched
            .create(TaskConfig::new(10, 2).on_fire(&bump).local(&left).enabled())
            .unwrap();
        sched
            .create(TaskConfig::new(10, 5).on_fire(&bump).local(&right).enabled())
            .unwrap();
        run(&mut sched, &clock, 0, 200);

        assert_eq!(left.get(), 2);
        assert_eq!(right.get(), 5);
    }

    #[test]
    fn test_wraparound_clock() {
        let clock = ManualClock::starting_at(u32::MAX - 25);
        let runs = Cell::new(0u32);
        let body = |_: &mut Scheduler<'_>| runs.set(runs.get() + 1);

        let mut sched = Scheduler::new(&clock);
        sched.create(TaskConfig::new(10, FOREVER).on_fire(&body).enabled()).unwrap();
        for _ in 0..100 {
            sched.execute();
            clock.advance(1);
        }
        assert_eq!(runs.get(), 10);
    }
}
