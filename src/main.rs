//! # coopsched Example Firmware
//!
//! Runs two scheduler layers on a Cortex-M4 board:
//!
//! | Layer | Task | Period | Behavior |
//! |-------|------|--------|----------|
//! | high  | `sample` | 10 ms | Reads a (simulated) sensor, signals the batch request |
//! | base  | `heartbeat` | 500 ms | Toggles a status flag |
//! | base  | `Reporter` | event | Waits for a full batch, summarizes it, re-arms |
//!
//! ## Expected Behavior
//!
//! 1. The sampler runs before every base step, so it keeps its 10 ms
//!    cadence even while base tasks are busy.
//! 2. Every `BATCH` samples the batch request completes and the reporter
//!    fires on the same pass, then arms the request for the next batch and
//!    waits again.
//! 3. Between due times every pass is idle and the core sleeps in WFI until
//!    the next SysTick.

#![no_std]
#![no_main]

use core::cell::Cell;

use cortex_m_rt::{entry, exception};
use panic_halt as _;

use coopsched::arch::cortex_m4::{self, SysTickClock};
use coopsched::{Awaited, Handler, Scheduler, StatusRequest, TaskConfig, FOREVER, SR_OK};

/// Samples per report.
const BATCH: u32 = 8;

// ---------------------------------------------------------------------------
// Reporter
// ---------------------------------------------------------------------------

/// Event-driven consumer of sample batches.
struct Reporter<'r> {
    batch: &'r StatusRequest,
    total: &'r Cell<u32>,
    reports: Cell<u32>,
    last_mean: Cell<u32>,
}

impl<'a> Handler<'a> for Reporter<'a> {
    fn on_fire(&self, sched: &mut Scheduler<'a>) {
        self.last_mean.set(self.total.replace(0) / BATCH);
        self.reports.set(self.reports.get().wrapping_add(1));

        // Arm for the next batch and block on it again.
        sched.arm(self.batch, BATCH);
        if let Some(me) = sched.current_handle() {
            sched.wait_for(me, Awaited::Request(self.batch), 0, 1);
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

#[exception]
fn SysTick() {
    cortex_m4::on_systick();
}

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().expect("core peripherals already taken");
    cortex_m4::configure_systick(&mut cp.SYST);

    let clock = SysTickClock;
    let batch = StatusRequest::new();
    let total = Cell::new(0u32);
    let reading = Cell::new(0u32);
    let led = Cell::new(false);

    let sample = |_: &mut Scheduler<'_>| {
        // Stand-in for an ADC read.
        reading.set(reading.get().wrapping_mul(1_103_515_245).wrapping_add(12_345));
        total.set(total.get().wrapping_add(reading.get() >> 20));
        batch.signal(SR_OK);
    };
    let heartbeat = |_: &mut Scheduler<'_>| led.set(!led.get());
    let reporter = Reporter {
        batch: &batch,
        total: &total,
        reports: Cell::new(0),
        last_mean: Cell::new(0),
    };

    // --- High-priority layer ---
    let mut high = Scheduler::new(&clock);
    high.create(TaskConfig::new(10, FOREVER).on_fire(&sample).enabled())
        .expect("Failed to create sample task");

    // --- Base layer ---
    let mut base = Scheduler::new(&clock);
    base.create(TaskConfig::new(500, FOREVER).on_fire(&heartbeat).enabled())
        .expect("Failed to create heartbeat task");
    let report = base
        .create(TaskConfig::default().handler(&reporter))
        .expect("Failed to create reporter task");

    base.arm(&batch, BATCH);
    base.wait_for(report, Awaited::Request(&batch), 0, 1);
    base.set_sleep_method(&cortex_m4::wait_for_interrupt);
    base.set_high_priority_scheduler(&mut high);

    loop {
        base.execute();
    }
}
