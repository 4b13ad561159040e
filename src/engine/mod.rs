//! Core engine: the fan-out tracker and the scheduler loop around it.

pub mod scheduler;
pub mod tracker;
