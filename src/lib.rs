//! # coopsched
//!
//! A cooperative, single-pass task scheduler for bare-metal single-core
//! microcontrollers.
//!
//! ## Overview
//!
//! The host calls [`Scheduler::execute`] in a loop. Each call walks the
//! task chain once and fires every task whose delay has elapsed. There are
//! no threads, no per-task stacks, and no preemption: a callback runs to
//! completion and the next task waits for it.
//!
//! - **Periodic and counted tasks**: interval, iteration budget, three
//!   scheduling options ([`SchedulingOption`])
//! - **Event-driven tasks**: tasks block on a [`StatusRequest`] countdown
//!   or on another task finishing
//! - **Priority layering**: a higher-priority scheduler is re-run before
//!   every step of the base chain
//! - **Dynamic reconfiguration**: callbacks may create, retime, disable, or
//!   destroy any task, themselves included
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │              Application callbacks / Handlers           │
//! ├────────────────────────────────────────────────────────┤
//! │      Task control (lifecycle.rs)                        │
//! │  enable · disable · cancel · wait_for · yield_to · ...  │
//! ├───────────────────────┬────────────────────────────────┤
//! │  Scheduler            │  Status Requests (status.rs)    │
//! │  scheduler.rs         │  ─ set_waiting · signal         │
//! │  ─ execute()          │  ─ timeout                      │
//! │  ─ priority layer     ├────────────────────────────────┤
//! │  ─ cpu accounting     │  Timing (timing.rs)             │
//! │                       │  ─ anchor advance per option    │
//! ├───────────────────────┴────────────────────────────────┤
//! │              Task Model (task.rs)                       │
//! │    Task · TaskConfig · Binding · TaskHandle             │
//! ├────────────────────────────────────────────────────────┤
//! │   Clock (clock.rs)   ·   Port (arch/cortex_m4.rs)       │
//! │   SysTick counter  ·  WFI suspend hook                  │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use core::cell::Cell;
//! use coopsched::{ManualClock, Scheduler, TaskConfig};
//!
//! let clock = ManualClock::new();
//! let blinks = Cell::new(0);
//! let blink = |_: &mut Scheduler<'_>| blinks.set(blinks.get() + 1);
//!
//! let mut sched = Scheduler::new(&clock);
//! sched.create(TaskConfig::new(100, 3).on_fire(&blink).enabled())?;
//!
//! for t in 0..1_000 {
//!     clock.set(t);
//!     sched.execute();
//! }
//! assert_eq!(blinks.get(), 3);
//! # Ok::<(), coopsched::Error>(())
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: every scheduler owns a fixed `[Slot; MAX_TASKS]` table
//! - **No `alloc`**: pure `core`
//! - **Handles, not pointers**: tasks are named by generation-checked
//!   [`TaskHandle`]s, so stale handles are harmless
//! - **Borrowed behavior**: callbacks, handlers, status requests, and local
//!   storage are borrowed for the scheduler's lifetime `'a`

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod clock;
pub mod config;
pub mod error;
mod lifecycle;
mod log;
pub mod scheduler;
pub mod status;
pub mod sync;
pub mod task;
pub mod timing;

pub use clock::{Clock, ManualClock};
pub use config::{FOREVER, MAX_TASKS, ONCE};
pub use error::{Error, Result};
pub use scheduler::{Handles, Scheduler, SleepMethod};
pub use status::{StatusRequest, SR_ABORT, SR_CANCEL, SR_ERROR, SR_OK, SR_TIMEOUT};
pub use task::{
    Awaited, Binding, Callback, Handler, LocalStorage, OnDisable, OnEnable, Task, TaskConfig,
    TaskHandle, TaskState, WaitMode,
};
pub use timing::SchedulingOption;
