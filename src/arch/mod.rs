//! # Architecture Abstraction Layer
//!
//! Platform collaborators (time source, suspend hook) for real targets.
//! The scheduler core only sees them through [`Clock`](crate::Clock) and a
//! `Fn(u32)` sleep method, so other cores are added as sibling modules.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
