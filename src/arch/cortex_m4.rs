//! # Cortex-M4 Port Layer
//!
//! Hardware collaborators for running the scheduler on an ARM Cortex-M4:
//! a SysTick-driven millisecond counter exposed as a [`Clock`], and a
//! WFI-based suspend hook for idle passes.
//!
//! ## Wiring
//!
//! ```ignore
//! #[exception]
//! fn SysTick() {
//!     cortex_m4::on_systick();
//! }
//!
//! cortex_m4::configure_systick(&mut cp.SYST);
//! let clock = SysTickClock;
//! let mut sched = Scheduler::new(&clock);
//! sched.set_sleep_method(&cortex_m4::wait_for_interrupt);
//! ```
//!
//! SysTick is set to the lowest priority so that the tick never delays
//! application interrupts; a late tick only shifts task timing by one unit.

use core::cell::Cell;

use cortex_m::interrupt::Mutex;
use cortex_m::peripheral::syst::SystClkSource;

use crate::clock::Clock;
use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::sync::critical_section;

/// Ticks since `configure_systick`, at `TICK_HZ`.
static TICKS: Mutex<Cell<u32>> = Mutex::new(Cell::new(0));

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer to fire at `TICK_HZ` from the processor
/// clock, and drop its exception priority to the lowest level.
///
/// A cooperative port has no PendSV to configure, so the SysTick priority
/// is set here as part of tick setup. Lowest priority keeps the tick from
/// preempting any device interrupt that signals a status request.
///
/// # Parameters
/// - `syst`: Mutable reference to the SysTick peripheral
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    set_systick_priority();
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set SysTick to priority 0xFF (lowest).
fn set_systick_priority() {
    // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
    // Bits [31:24] = SysTick priority
    const SHPR3: *mut u32 = 0xE000_ED20 as *mut u32;
    unsafe {
        let val = core::ptr::read_volatile(SHPR3);
        core::ptr::write_volatile(SHPR3, val | (0xFF << 24));
    }
}

// ---------------------------------------------------------------------------
// Tick counter
// ---------------------------------------------------------------------------

/// Advance the tick counter. Call this from the `SysTick` exception handler.
#[inline]
pub fn on_systick() {
    critical_section(|cs| {
        let ticks = TICKS.borrow(cs);
        ticks.set(ticks.get().wrapping_add(1));
    });
}

/// Current tick count.
#[inline]
pub fn ticks() -> u32 {
    critical_section(|cs| TICKS.borrow(cs).get())
}

/// [`Clock`] backed by the SysTick counter. One unit is `1 / TICK_HZ` s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysTickClock;

impl Clock for SysTickClock {
    #[inline]
    fn now(&self) -> u32 {
        ticks()
    }
}

// ---------------------------------------------------------------------------
// Suspend hook
// ---------------------------------------------------------------------------

/// Idle-pass suspend hook: sleep until the next interrupt.
///
/// SysTick guarantees a wakeup within one tick, so no task can oversleep
/// its due time by more than that.
#[inline]
pub fn wait_for_interrupt(_pass_duration: u32) {
    cortex_m::asm::wfi();
}
