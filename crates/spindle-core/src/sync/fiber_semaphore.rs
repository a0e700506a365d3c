//! Fiber-aware counting semaphore
//!
//! Waiting suspends the calling fiber instead of its thread. Waiters are
//! released in FIFO order, each through the scheduler that was active when
//! it started waiting.

use crate::fiber::Fiber;
use crate::scheduler::{self, Scheduler};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};

/// A suspended fiber and the scheduler that will resume it
struct Waiter {
    scheduler: Weak<dyn Scheduler>,
    fiber: Weak<Fiber>,
}

struct State {
    permits: usize,
    waiters: VecDeque<Waiter>,
}

/// Counting semaphore whose waiters are fibers
pub struct FiberSemaphore {
    state: Mutex<State>,
}

impl FiberSemaphore {
    /// Create a semaphore holding `permits` permits
    pub fn new(permits: usize) -> Self {
        Self {
            state: Mutex::new(State {
                permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// Take a permit if one is available right now
    pub fn try_wait(&self) -> bool {
        let mut state = self.state.lock();
        if state.permits > 0 {
            state.permits -= 1;
            true
        } else {
            false
        }
    }

    /// Take a permit, suspending the current fiber until one is released.
    ///
    /// Panics when no scheduler is active on the calling thread, or when the
    /// thread's root fiber would have to wait.
    pub fn wait(&self) {
        {
            let scheduler = match scheduler::current() {
                Some(scheduler) => scheduler,
                None => panic!("FiberSemaphore::wait requires a scheduler on this thread"),
            };

            let mut state = self.state.lock();
            if state.permits > 0 {
                state.permits -= 1;
                return;
            }

            let fiber = Fiber::current();
            assert!(
                !fiber.is_root(),
                "FiberSemaphore::wait would block the root fiber {}",
                fiber.id()
            );
            state.waiters.push_back(Waiter {
                scheduler: Arc::downgrade(&scheduler),
                fiber: Arc::downgrade(&fiber),
            });
            tracing::trace!(fiber_id = %fiber.id(), waiting = state.waiters.len(), "fiber waiting on semaphore");
        }

        // The permit was handed over by whoever rescheduled us.
        Fiber::yield_to_hold();
    }

    /// Release a permit.
    ///
    /// Hands it straight to the oldest waiter that is still alive, or adds it
    /// to the pool when nobody is waiting. The waiter is scheduled before the
    /// queue lock is released, so concurrent notifies wake waiters in queue
    /// order. `Scheduler::schedule` must not touch this semaphore.
    pub fn notify(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop_front() {
            match (waiter.scheduler.upgrade(), waiter.fiber.upgrade()) {
                (Some(scheduler), Some(fiber)) => {
                    tracing::trace!(fiber_id = %fiber.id(), "semaphore waking fiber");
                    scheduler.schedule(fiber);
                    return;
                }
                _ => tracing::warn!("skipping semaphore waiter whose fiber or scheduler is gone"),
            }
        }
        state.permits += 1;
    }

    /// Permits available without waiting
    pub fn available_permits(&self) -> usize {
        self.state.lock().permits
    }

    /// Number of fibers currently suspended in `wait`
    pub fn waiter_count(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl Drop for FiberSemaphore {
    fn drop(&mut self) {
        let waiting = self.state.get_mut().waiters.len();
        if waiting > 0 && !std::thread::panicking() {
            panic!("FiberSemaphore dropped with {} waiting fibers", waiting);
        }
    }
}

impl fmt::Debug for FiberSemaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FiberSemaphore")
            .field("permits", &state.permits)
            .field("waiters", &state.waiters.len())
            .finish()
    }
}
