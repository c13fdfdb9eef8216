//! # Configuration
//!
//! Compile-time constants governing the scheduler and the Cortex-M port.
//! All limits are fixed at compile time. No dynamic allocation.

/// Maximum number of tasks a single scheduler can hold.
/// This bounds the static slot array inside every `Scheduler`. Each slot
/// costs one `Task` worth of RAM whether or not it is in use.
pub const MAX_TASKS: usize = 16;

/// Iteration count meaning "run until disabled".
pub const FOREVER: i32 = -1;

/// Iteration count for one-shot tasks.
pub const ONCE: i32 = 1;

/// Interval given to tasks that do not specify one. A zero interval
/// makes a task eligible on every pass.
pub const DEFAULT_INTERVAL: u32 = 0;

/// SysTick frequency in Hz for the Cortex-M port. At 1000 Hz the
/// `SysTickClock` counts milliseconds.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
