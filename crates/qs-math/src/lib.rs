//! Quiet-session math utilities.

pub mod math;

pub use math::cpu::*;
pub use math::running::*;
