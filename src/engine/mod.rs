//! Core engine: weekly schedule, purchase attempts and run modes.

pub mod clock;
pub mod mode;
pub mod purchase;
pub mod scheduler;
