//! Single-thread FIFO scheduler
//!
//! Fibers are queued on a global injector and run one after another on the
//! thread that called `run`. A fiber that yields `Ready` goes to the back of
//! the queue. A fiber that yields `Hold` is dropped from the queue; whoever
//! holds it (a semaphore waiter record, for instance) schedules it again.

use crossbeam_deque::{Injector, Steal};
use spindle_core::scheduler::{Scheduler, SchedulerContext};
use spindle_core::{Fiber, FiberOptions, FiberState};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Scheduler statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Fibers created through `spawn`
    pub fibers_spawned: u64,

    /// Fibers whose callback returned
    pub fibers_completed: u64,

    /// Fibers whose callback panicked
    pub fibers_failed: u64,

    /// Switches into a fiber
    pub switches: u64,
}

/// Runs queued fibers on one thread
pub struct LocalScheduler {
    /// Name used in log records
    name: String,

    /// Fibers waiting to run
    queue: Injector<Arc<Fiber>>,

    fibers_spawned: AtomicU64,
    fibers_completed: AtomicU64,
    fibers_failed: AtomicU64,
    switches: AtomicU64,
}

impl LocalScheduler {
    /// Create a new, empty scheduler
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            queue: Injector::new(),
            fibers_spawned: AtomicU64::new(0),
            fibers_completed: AtomicU64::new(0),
            fibers_failed: AtomicU64::new(0),
            switches: AtomicU64::new(0),
        })
    }

    /// Scheduler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Create a fiber running `callback` and queue it
    pub fn spawn<F>(&self, callback: F) -> Arc<Fiber>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with(callback, FiberOptions::default())
    }

    /// Create a fiber with explicit options and queue it
    pub fn spawn_with<F>(&self, callback: F, options: FiberOptions) -> Arc<Fiber>
    where
        F: FnOnce() + Send + 'static,
    {
        let fiber = Fiber::with_options(callback, options);
        self.fibers_spawned.fetch_add(1, Ordering::Relaxed);
        self.schedule(fiber.clone());
        fiber
    }

    /// Number of fibers waiting in the queue
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            fibers_spawned: self.fibers_spawned.load(Ordering::Relaxed),
            fibers_completed: self.fibers_completed.load(Ordering::Relaxed),
            fibers_failed: self.fibers_failed.load(Ordering::Relaxed),
            switches: self.switches.load(Ordering::Relaxed),
        }
    }

    /// Run queued fibers from the calling thread's root fiber until the
    /// queue is empty.
    ///
    /// Fibers left in `Hold` when the queue runs dry stay suspended until
    /// they are scheduled again and `run` is called once more.
    pub fn run(self: &Arc<Self>) {
        assert!(
            Fiber::current().is_root(),
            "LocalScheduler::run must be called from a thread's root fiber"
        );
        let _ctx = SchedulerContext::enter(self.clone(), None);

        tracing::debug!(scheduler = %self.name, pending = self.pending(), "run started");
        self.drain();
        tracing::debug!(scheduler = %self.name, stats = ?self.stats(), "run finished");
    }

    /// Like [`run`](Self::run), but the queue is drained by a driver fiber
    /// that the root fiber enters with `call` and that returns with `back`.
    pub fn run_in_fiber(self: &Arc<Self>) {
        let this = self.clone();
        let driver = Fiber::with_options(
            move || this.drain(),
            FiberOptions {
                use_caller: true,
                ..Default::default()
            },
        );
        let _ctx = SchedulerContext::enter(self.clone(), Some(driver.clone()));

        tracing::debug!(
            scheduler = %self.name,
            driver = %driver.id(),
            pending = self.pending(),
            "run started in driver fiber"
        );
        driver.call();

        if let Some(failure) = driver.failure() {
            tracing::error!(scheduler = %self.name, "driver fiber failed: {}", failure);
        }
        tracing::debug!(scheduler = %self.name, stats = ?self.stats(), "run finished");
    }

    fn drain(&self) {
        loop {
            match self.queue.steal() {
                Steal::Success(fiber) => self.dispatch(fiber),
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
    }

    fn dispatch(&self, fiber: Arc<Fiber>) {
        if fiber.state().is_terminal() {
            tracing::trace!(scheduler = %self.name, fiber_id = %fiber.id(), "skipping finished fiber");
            return;
        }

        fiber.swap_in();
        self.switches.fetch_add(1, Ordering::Relaxed);

        match fiber.state() {
            FiberState::Ready => self.queue.push(fiber),
            FiberState::Hold => {}
            FiberState::Term => {
                self.fibers_completed.fetch_add(1, Ordering::Relaxed);
            }
            FiberState::Except => {
                self.fibers_failed.fetch_add(1, Ordering::Relaxed);
            }
            state @ (FiberState::Init | FiberState::Exec) => {
                unreachable!("fiber {} switched out in state {:?}", fiber.id(), state)
            }
        }
    }
}

impl Scheduler for LocalScheduler {
    fn schedule(&self, fiber: Arc<Fiber>) {
        tracing::trace!(scheduler = %self.name, fiber_id = %fiber.id(), "fiber scheduled");
        self.queue.push(fiber);
    }
}

impl std::fmt::Debug for LocalScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalScheduler")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_queues_fiber() {
        let scheduler = LocalScheduler::new("test");
        let fiber = scheduler.spawn(|| {});

        assert_eq!(scheduler.pending(), 1);
        assert_eq!(scheduler.stats().fibers_spawned, 1);
        assert_eq!(fiber.state(), FiberState::Init);

        scheduler.run();
        assert_eq!(scheduler.pending(), 0);
        assert_eq!(fiber.state(), FiberState::Term);
    }

    #[test]
    fn test_finished_fiber_is_skipped() {
        let scheduler = LocalScheduler::new("test");
        let fiber = scheduler.spawn(|| {});
        scheduler.schedule(fiber.clone());

        scheduler.run();

        let stats = scheduler.stats();
        assert_eq!(stats.switches, 1);
        assert_eq!(stats.fibers_completed, 1);
    }

    #[test]
    fn test_empty_run_returns() {
        let scheduler = LocalScheduler::new("empty");
        scheduler.run();
        scheduler.run_in_fiber();
        assert_eq!(scheduler.stats(), SchedulerStats::default());
    }

    #[test]
    fn test_run_inside_fiber_rejected() {
        let outer = LocalScheduler::new("outer");
        let inner = LocalScheduler::new("inner");

        let fiber = outer.spawn(move || inner.run());
        outer.run();

        assert_eq!(fiber.state(), FiberState::Except);
        assert!(fiber.failure().unwrap().message.contains("root fiber"));
        assert_eq!(outer.stats().fibers_failed, 1);
    }
}
