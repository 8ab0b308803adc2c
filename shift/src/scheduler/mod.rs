//! Liveness-minimizing scheduler.
//!
//! A schedule is found in two phases. Kahn's algorithm produces a valid
//! initial order, which greedy rotation then improves by moving contiguous
//! windows of Ops to cheaper positions.

mod change;
mod core;
mod kahn;
mod ripple;
mod rotation;

pub use change::{ScheduleChange, ShiftAndCost};
pub use core::{RotationStats, ScheduledGraph, Termination};
