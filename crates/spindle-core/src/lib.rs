//! Spindle Fiber Core
//!
//! This crate provides the foundation of the Spindle runtime:
//! - Stackful fibers with private stacks and saved machine contexts
//! - Pluggable stack allocation (heap, pooled, guard-paged)
//! - The scheduler boundary fibers switch against
//! - Synchronization primitives (OS semaphore, fiber-aware semaphore)
//! - Runtime configuration

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
compile_error!("spindle-core requires glibc ucontext support (linux-gnu targets)");

#[macro_use]
mod macros;

pub mod config;
pub mod error;
pub mod fiber;
pub mod scheduler;
pub mod stack;
pub mod sync;

pub use config::Config;
pub use error::{ConfigError, FiberPanic, SemaphoreError};
pub use fiber::{Fiber, FiberId, FiberOptions, FiberState};
pub use scheduler::{Scheduler, SchedulerContext};
pub use stack::{
    GuardedStackAllocator, HeapStackAllocator, PooledStackAllocator, Stack, StackAllocator,
};
pub use sync::{FiberSemaphore, Semaphore};
