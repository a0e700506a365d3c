//! Scheduler boundary
//!
//! The core never runs a queue itself. It needs three things from whatever
//! scheduler drives it: which scheduler is active on this thread, which fiber
//! `swap_in`/`swap_out` switch against, and a way to hand a fiber back for
//! later execution. A scheduler installs the first two with
//! [`SchedulerContext::enter`] and implements the third as [`Scheduler`].

use crate::fiber::{local, Fiber};
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

thread_local! {
    static CURRENT_SCHEDULER: RefCell<Option<Arc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// Something that can run fibers later
pub trait Scheduler: Send + Sync {
    /// Queue `fiber` for future execution.
    ///
    /// May be called from any thread, including from inside a running fiber.
    fn schedule(&self, fiber: Arc<Fiber>);
}

/// The scheduler active on the calling thread, if any
#[inline(never)]
pub fn current() -> Option<Arc<dyn Scheduler>> {
    CURRENT_SCHEDULER.with(|slot| slot.borrow().clone())
}

/// The fiber `swap_in`/`swap_out` switch against on the calling thread.
///
/// This is the fiber installed by the active [`SchedulerContext`], or the
/// thread's root fiber when none was installed.
pub fn scheduling_fiber() -> Arc<Fiber> {
    local::scheduling()
}

/// Installs a scheduler and its scheduling fiber on the current thread.
///
/// Dropping the guard restores whatever was installed before, so contexts
/// nest. The guard is tied to the thread that created it.
#[must_use = "the scheduler is uninstalled when the guard is dropped"]
pub struct SchedulerContext {
    previous_scheduler: Option<Arc<dyn Scheduler>>,
    previous_fiber: Option<Arc<Fiber>>,
    _not_send: PhantomData<*const ()>,
}

impl SchedulerContext {
    /// Make `scheduler` the ambient scheduler of this thread.
    ///
    /// `scheduling_fiber` becomes the switch target for `swap_in`/`swap_out`;
    /// `None` means the thread's root fiber.
    pub fn enter(scheduler: Arc<dyn Scheduler>, scheduling_fiber: Option<Arc<Fiber>>) -> Self {
        let previous_scheduler = CURRENT_SCHEDULER.with(|slot| slot.replace(Some(scheduler)));
        let previous_fiber = local::set_scheduling(scheduling_fiber);
        Self {
            previous_scheduler,
            previous_fiber,
            _not_send: PhantomData,
        }
    }
}

impl Drop for SchedulerContext {
    fn drop(&mut self) {
        let previous = self.previous_scheduler.take();
        let ours = CURRENT_SCHEDULER.with(|slot| slot.replace(previous));
        let fiber = local::set_scheduling(self.previous_fiber.take());
        drop(ours);
        drop(fiber);
    }
}
