//! # Logging
//!
//! Thin wrappers around `defmt`. With the `defmt` feature disabled every
//! macro expands to an empty block, so the default build never formats or
//! emits anything.

macro_rules! trace {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::trace!($($arg)*);
    }};
}

macro_rules! debug {
    ($($arg:tt)*) => {{
        #[cfg(feature = "defmt")]
        defmt::debug!($($arg)*);
    }};
}

pub(crate) use debug;
pub(crate) use trace;
