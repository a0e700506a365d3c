//! Synchronization primitives
//!
//! [`Semaphore`] blocks OS threads. [`FiberSemaphore`] blocks fibers only:
//! a waiting fiber is parked and its thread moves on to other work.

mod fiber_semaphore;
mod semaphore;

pub use fiber_semaphore::FiberSemaphore;
pub use semaphore::Semaphore;
