//! # Synchronization Primitives
//!
//! The scheduler itself is single-context: only the code driving
//! `execute()` touches the chain. Two helpers exist for hosts where an
//! interrupt handler also reconfigures tasks.
//!
//! - [`BusyFlag`]: a per-task, non-blocking "being reconfigured" marker. The
//!   execution pass skips a task whose flag is set rather than read a
//!   half-written configuration. Best effort only: it debounces, it does
//!   not serialize two writers.
//! - [`critical_section`]: interrupt-free execution on Cortex-M targets,
//!   used by the port layer for the tick counter.

use core::sync::atomic::{AtomicBool, Ordering};

/// Advisory busy marker, checked without blocking.
///
/// Only `load`/`store` are used so the flag works on cores without
/// compare-and-swap (ARMv6-M).
#[derive(Debug, Default)]
pub struct BusyFlag(AtomicBool);

impl BusyFlag {
    pub const fn new() -> Self {
        Self(AtomicBool::new(false))
    }

    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and restored on exit. Keep the
/// enclosed work short: every cycle spent here is interrupt latency.
#[cfg(all(target_arch = "arm", target_os = "none"))]
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&cortex_m::interrupt::CriticalSection) -> R,
{
    cortex_m::interrupt::free(f)
}
