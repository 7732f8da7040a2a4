//! Core deterministic primitives.
//!
//! Given the same seed, everything in this module produces the same values
//! on every platform.

pub mod rng;

pub use rng::DeterministicRng;
