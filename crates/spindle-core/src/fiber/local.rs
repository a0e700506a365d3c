//! Per-thread fiber slots
//!
//! Every accessor here is `#[inline(never)]`: a suspended fiber may be resumed
//! on a different OS thread, so the thread-local address has to be computed
//! fresh on each call rather than reused across a switch.

use super::Fiber;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    /// The fiber executing on this thread
    static CURRENT: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };

    /// The fiber standing for this thread's original stack
    static ROOT: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };

    /// Switch target for `swap_in`/`swap_out`, installed by a scheduler
    static SCHEDULING: RefCell<Option<Arc<Fiber>>> = const { RefCell::new(None) };
}

#[inline(never)]
pub(crate) fn current() -> Option<Arc<Fiber>> {
    CURRENT.with(|slot| slot.borrow().clone())
}

#[inline(never)]
pub(crate) fn is_current(fiber: &Fiber) -> bool {
    CURRENT.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(false, |cur| std::ptr::eq(Arc::as_ptr(cur), fiber))
    })
}

#[inline(never)]
pub(crate) fn set_current(fiber: Arc<Fiber>) {
    let previous = CURRENT.with(|slot| slot.replace(Some(fiber)));
    drop(previous);
}

/// The thread's root fiber, created on first use.
///
/// A freshly created root also becomes the current fiber when none is set.
#[inline(never)]
pub(crate) fn root() -> Arc<Fiber> {
    if let Some(root) = ROOT.with(|slot| slot.borrow().clone()) {
        return root;
    }

    let root = Arc::new(Fiber::new_root());
    ROOT.with(|slot| *slot.borrow_mut() = Some(Arc::clone(&root)));
    CURRENT.with(|slot| {
        let mut current = slot.borrow_mut();
        if current.is_none() {
            *current = Some(Arc::clone(&root));
        }
    });
    tracing::debug!(fiber_id = %root.id(), "root fiber created");
    root
}

/// The scheduling fiber, falling back to the root fiber
#[inline(never)]
pub(crate) fn scheduling() -> Arc<Fiber> {
    match SCHEDULING.with(|slot| slot.borrow().clone()) {
        Some(fiber) => fiber,
        None => root(),
    }
}

/// Install a scheduling fiber, returning the previous one
#[inline(never)]
pub(crate) fn set_scheduling(fiber: Option<Arc<Fiber>>) -> Option<Arc<Fiber>> {
    SCHEDULING.with(|slot| slot.replace(fiber))
}
