//! The node emulator core library.
//!
//! This crate sequences the startup lifecycle of the emulated node and governs how a serving node
//! terminates.

pub mod constants;
pub mod lifecycle;
pub mod termination;

pub use lifecycle::*;
pub use termination::*;
