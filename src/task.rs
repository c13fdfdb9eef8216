//! # Task Model
//!
//! Defines the per-task record the scheduler keeps in its slot table, the
//! configuration used to create one, and the two ways of binding behavior
//! to it.
//!
//! ## Binding styles
//!
//! - **Closures**: independent `on_fire` / `on_enable` / `on_disable`
//!   references ([`Callback`], [`OnEnable`], [`OnDisable`]). This is the
//!   only style that supports [`yield_to`](crate::Scheduler::yield_to).
//! - **Handler objects**: one value implementing [`Handler`] supplies all
//!   three hooks and can carry its own state in `Cell`s.
//!
//! Every hook receives the owning scheduler mutably, so a callback may
//! reconfigure, add, disable, or destroy any task, itself included. A hook
//! finds out which task it runs for through
//! [`current_handle`](crate::Scheduler::current_handle).

use core::any::Any;

use crate::config::{DEFAULT_INTERVAL, FOREVER};
use crate::scheduler::Scheduler;
use crate::status::StatusRequest;
use crate::sync::BusyFlag;
use crate::timing::SchedulingOption;

// ---------------------------------------------------------------------------
// Callback types
// ---------------------------------------------------------------------------

/// Main task body.
pub type Callback<'a> = &'a dyn Fn(&mut Scheduler<'a>);

/// Runs before a task is enabled; returning `false` keeps it disabled.
pub type OnEnable<'a> = &'a dyn Fn(&mut Scheduler<'a>) -> bool;

/// Runs when an enabled task is disabled (not on `abort`).
pub type OnDisable<'a> = &'a dyn Fn(&mut Scheduler<'a>);

/// Non-owned per-task application data, typed at the use site through
/// `downcast_ref`.
pub type LocalStorage<'a> = &'a (dyn Any + 'static);

/// Object-style task behavior.
///
/// Implementors usually keep their state in `Cell`/`RefCell` fields, since
/// the scheduler holds them by shared reference.
pub trait Handler<'a> {
    /// Task body, called each time the task fires.
    fn on_fire(&self, sched: &mut Scheduler<'a>);

    /// Gate for `enable()`. Returning `false` leaves the task disabled.
    fn on_enable(&self, _sched: &mut Scheduler<'a>) -> bool {
        true
    }

    /// Cleanup when an enabled task gets disabled.
    fn on_disable(&self, _sched: &mut Scheduler<'a>) {}
}

/// Behavior bound to a task.
#[derive(Clone, Copy)]
pub enum Binding<'a> {
    Callbacks {
        on_fire: Option<Callback<'a>>,
        on_enable: Option<OnEnable<'a>>,
        on_disable: Option<OnDisable<'a>>,
    },
    Handler(&'a dyn Handler<'a>),
}

impl<'a> Binding<'a> {
    /// No behavior at all. A task bound to nothing still keeps time and
    /// counts iterations, it just never makes a pass non-idle.
    pub const NONE: Self = Binding::Callbacks {
        on_fire: None,
        on_enable: None,
        on_disable: None,
    };

    /// Closure slots of this binding. A handler binding has none.
    fn closures(self) -> (Option<Callback<'a>>, Option<OnEnable<'a>>, Option<OnDisable<'a>>) {
        match self {
            Binding::Callbacks { on_fire, on_enable, on_disable } => (on_fire, on_enable, on_disable),
            Binding::Handler(_) => (None, None, None),
        }
    }

    /// Replace the task body. Binding a closure drops a handler object.
    pub fn with_on_fire(self, f: Option<Callback<'a>>) -> Self {
        let (_, on_enable, on_disable) = self.closures();
        Binding::Callbacks { on_fire: f, on_enable, on_disable }
    }

    pub fn with_on_enable(self, f: Option<OnEnable<'a>>) -> Self {
        let (on_fire, _, on_disable) = self.closures();
        Binding::Callbacks { on_fire, on_enable: f, on_disable }
    }

    pub fn with_on_disable(self, f: Option<OnDisable<'a>>) -> Self {
        let (on_fire, on_enable, _) = self.closures();
        Binding::Callbacks { on_fire, on_enable, on_disable: f }
    }

    /// Invoke the task body. Returns whether anything was actually called.
    pub(crate) fn fire(self, sched: &mut Scheduler<'a>) -> bool {
        match self {
            Binding::Callbacks { on_fire: Some(f), .. } => {
                f(sched);
                true
            }
            Binding::Callbacks { on_fire: None, .. } => false,
            Binding::Handler(h) => {
                h.on_fire(sched);
                true
            }
        }
    }

    /// `None` when there is no enable hook to consult.
    pub(crate) fn enable(self, sched: &mut Scheduler<'a>) -> Option<bool> {
        match self {
            Binding::Callbacks { on_enable: Some(f), .. } => Some(f(sched)),
            Binding::Callbacks { on_enable: None, .. } => None,
            Binding::Handler(h) => Some(h.on_enable(sched)),
        }
    }

    pub(crate) fn has_on_enable(&self) -> bool {
        matches!(
            self,
            Binding::Callbacks { on_enable: Some(_), .. } | Binding::Handler(_)
        )
    }

    pub(crate) fn disable(self, sched: &mut Scheduler<'a>) {
        match self {
            Binding::Callbacks { on_disable: Some(f), .. } => f(sched),
            Binding::Callbacks { on_disable: None, .. } => {}
            Binding::Handler(h) => h.on_disable(sched),
        }
    }
}

// ---------------------------------------------------------------------------
// Handles and wait sources
// ---------------------------------------------------------------------------

/// Names one task in one scheduler's slot table.
///
/// Handles are cheap to copy. Once the task is destroyed the slot's
/// generation moves on and every operation on the old handle is ignored.
/// A handle is only honored by the scheduler that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskHandle {
    pub(crate) scheduler: u16,
    pub(crate) index: u16,
    pub(crate) generation: u16,
}

impl TaskHandle {
    /// Slot index inside the owning scheduler.
    pub fn index(&self) -> usize {
        self.index as usize
    }
}

/// Something a task can block on.
#[derive(Clone, Copy)]
pub enum Awaited<'a> {
    /// An externally owned request.
    Request(&'a StatusRequest),
    /// The internal request of another task, completed whenever that task
    /// is disabled. The task lives in the waiter's scheduler or in one of
    /// its higher-priority layers.
    Task(TaskHandle),
}

/// How a waiting task resumes once its request completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitMode {
    /// Fire on the same pass that observes completion.
    NoDelay,
    /// Start a full delay from the moment completion is observed.
    Delayed,
}

// ---------------------------------------------------------------------------
// Task state
// ---------------------------------------------------------------------------

/// Coarse lifecycle state, derived from the task's flags.
///
/// ```text
///              enable() ─ gated by on_enable
///   ┌──────────┐ ─────────────────────────► ┌───────────┐
///   │ Disabled │                            │ Scheduled │ ── due ──► fire
///   └──────────┘ ◄───────────────────────── └───────────┘
///        ▲        exhausted / timeout /           ▲
///        │        disable / cancel / abort        │ request completes
///        │                                  ┌───────────┐
///        └───────────────────────────────── │  Waiting  │
///                                           └───────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    Disabled,
    /// Enabled and blocked on a status request.
    Waiting,
    /// Enabled and timed by interval/delay.
    Scheduled,
}

/// Status flags of a task.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TaskStatus {
    pub enabled: bool,
    pub in_on_enable: bool,
    pub canceled: bool,
    pub timed_out: bool,
    pub waiting: Option<WaitMode>,
}

/// Position of a task in its scheduler's chain.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Link {
    pub linked: bool,
    pub prev: Option<u16>,
    pub next: Option<u16>,
}

// ---------------------------------------------------------------------------
// Task configuration
// ---------------------------------------------------------------------------

/// Construction-time configuration of a task.
///
/// ```ignore
/// let cfg = TaskConfig::new(500, FOREVER).on_fire(&blink).enabled();
/// let led = sched.create(cfg)?;
/// ```
#[derive(Clone, Copy)]
pub struct TaskConfig<'a> {
    /// Period between runs, in clock units.
    pub interval: u32,
    /// Number of runs, or [`FOREVER`].
    pub iterations: i32,
    pub binding: Binding<'a>,
    /// Enable the task as soon as it is created.
    pub enable: bool,
    pub option: SchedulingOption,
    pub local: Option<LocalStorage<'a>>,
}

impl<'a> TaskConfig<'a> {
    pub const fn new(interval: u32, iterations: i32) -> Self {
        Self {
            interval,
            iterations,
            binding: Binding::NONE,
            enable: false,
            option: SchedulingOption::Schedule,
            local: None,
        }
    }

    pub fn on_fire(mut self, f: Callback<'a>) -> Self {
        self.binding = self.binding.with_on_fire(Some(f));
        self
    }

    pub fn on_enable(mut self, f: OnEnable<'a>) -> Self {
        self.binding = self.binding.with_on_enable(Some(f));
        self
    }

    pub fn on_disable(mut self, f: OnDisable<'a>) -> Self {
        self.binding = self.binding.with_on_disable(Some(f));
        self
    }

    /// Bind a handler object, replacing any closures.
    pub fn handler(mut self, h: &'a dyn Handler<'a>) -> Self {
        self.binding = Binding::Handler(h);
        self
    }

    pub fn enabled(mut self) -> Self {
        self.enable = true;
        self
    }

    pub fn scheduling(mut self, option: SchedulingOption) -> Self {
        self.option = option;
        self
    }

    pub fn local(mut self, data: LocalStorage<'a>) -> Self {
        self.local = Some(data);
        self
    }
}

impl Default for TaskConfig<'_> {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL, FOREVER)
    }
}

// ---------------------------------------------------------------------------
// Task record
// ---------------------------------------------------------------------------

/// A schedulable unit of work as stored in the scheduler.
///
/// Application code only sees `&Task` through
/// [`Scheduler::task`](crate::Scheduler::task); every mutation goes
/// through the scheduler so hooks and chain bookkeeping stay consistent.
pub struct Task<'a> {
    pub(crate) id: u32,
    pub(crate) interval: u32,
    /// Wait applied before the next run. Usually equals `interval`.
    pub(crate) delay: u32,
    /// Time from which `delay` is measured.
    pub(crate) anchor: u32,
    pub(crate) iterations: i32,
    pub(crate) set_iterations: i32,
    pub(crate) run_counter: u32,
    pub(crate) status: TaskStatus,
    pub(crate) binding: Binding<'a>,
    pub(crate) awaited: Option<Awaited<'a>>,
    pub(crate) own_request: StatusRequest,
    pub(crate) option: SchedulingOption,
    pub(crate) timeout: u32,
    pub(crate) timeout_anchor: u32,
    pub(crate) control_point: u32,
    pub(crate) local: Option<LocalStorage<'a>>,
    pub(crate) overrun: i32,
    pub(crate) start_delay: i32,
    pub(crate) busy: BusyFlag,
    pub(crate) link: Link,
}

impl<'a> Task<'a> {
    pub(crate) fn new(id: u32, config: &TaskConfig<'a>) -> Self {
        Self {
            id,
            interval: config.interval,
            delay: config.interval,
            anchor: 0,
            iterations: config.iterations,
            set_iterations: config.iterations,
            run_counter: 0,
            status: TaskStatus::default(),
            binding: config.binding,
            awaited: None,
            own_request: StatusRequest::new(),
            option: config.option,
            timeout: 0,
            timeout_anchor: 0,
            control_point: 0,
            local: config.local,
            overrun: 0,
            start_delay: 0,
            busy: BusyFlag::new(),
            link: Link::default(),
        }
    }

    /// Diagnostic identity, unique per scheduler unless overridden.
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    /// The wait that will be applied before the next run.
    pub fn delay(&self) -> u32 {
        self.delay
    }

    /// Timestamp the current delay is measured from.
    pub fn anchor(&self) -> u32 {
        self.anchor
    }

    /// Remaining iterations; [`FOREVER`] for unlimited.
    pub fn iterations(&self) -> i32 {
        self.iterations
    }

    /// Runs since the last `enable()`.
    pub fn run_counter(&self) -> u32 {
        self.run_counter
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.status.enabled
    }

    pub fn is_first_iteration(&self) -> bool {
        self.run_counter <= 1
    }

    pub fn is_last_iteration(&self) -> bool {
        self.iterations == 0
    }

    pub fn canceled(&self) -> bool {
        self.status.canceled
    }

    pub fn timed_out(&self) -> bool {
        self.status.timed_out
    }

    pub fn waiting(&self) -> Option<WaitMode> {
        self.status.waiting
    }

    /// Linked into the scheduler's chain. A detached task cannot run.
    pub fn is_linked(&self) -> bool {
        self.link.linked
    }

    pub fn state(&self) -> TaskState {
        match (self.status.enabled, self.status.waiting) {
            (false, _) => TaskState::Disabled,
            (true, Some(_)) => TaskState::Waiting,
            (true, None) => TaskState::Scheduled,
        }
    }

    pub fn scheduling_option(&self) -> SchedulingOption {
        self.option
    }

    /// Overall timeout; `0` means none.
    pub fn timeout(&self) -> u32 {
        self.timeout
    }

    /// Lead of the next due time over the last start. Negative when the
    /// task is already behind.
    pub fn overrun(&self) -> i32 {
        self.overrun
    }

    /// How late the last run started compared to its ideal time.
    pub fn start_delay(&self) -> i32 {
        self.start_delay
    }

    pub fn control_point(&self) -> u32 {
        self.control_point
    }

    pub fn local_storage(&self) -> Option<LocalStorage<'a>> {
        self.local
    }

    /// The source this task is (or was last) waiting on.
    pub fn status_request(&self) -> Option<Awaited<'a>> {
        self.awaited
    }

    /// Completed whenever this task gets disabled.
    pub fn internal_status_request(&self) -> &StatusRequest {
        &self.own_request
    }

    /// Whether the advisory busy flag is set.
    pub fn is_busy(&self) -> bool {
        self.busy.is_set()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
