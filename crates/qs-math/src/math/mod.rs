//! Core math modules.

pub mod cpu;
pub mod running;
