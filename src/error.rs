//! Error types for task construction.
//!
//! Most misuse (stale handles, double adds, waiting on a vanished task) is
//! rejected silently through `bool`/`Option` returns. Only construction can
//! fail in a way the caller has to handle.

use thiserror::Error;

/// Errors returned by task construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Every slot of the scheduler's task table is occupied.
    #[error("task table is full ({0} slots)")]
    TaskTableFull(usize),
}

/// Result type alias for scheduler operations.
pub type Result<T> = core::result::Result<T, Error>;
