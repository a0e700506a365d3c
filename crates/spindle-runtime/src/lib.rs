//! Spindle Runtime
//!
//! A single-threaded reference scheduler for `spindle-core` fibers. It runs a
//! FIFO queue on the calling thread, either directly from the thread's root
//! fiber ([`LocalScheduler::run`]) or from a dedicated driver fiber entered
//! with `call`/`back` ([`LocalScheduler::run_in_fiber`]).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod local;

pub use local::{LocalScheduler, SchedulerStats};
