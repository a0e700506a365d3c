//! Fiber entry points
//!
//! A fresh fiber context starts in one of these functions. They run the
//! callback, record how it ended, and hand control back for good.

use super::Fiber;
use std::sync::Arc;

/// Entry for fibers driven through `swap_in`/`swap_out`
pub(super) extern "C" fn scheduled_main() {
    run_and_hand_off(Fiber::swap_out)
}

/// Entry for fibers driven through `call`/`back`
pub(super) extern "C" fn caller_main() {
    run_and_hand_off(Fiber::back)
}

fn run_and_hand_off(hand_off: fn(&Fiber)) -> ! {
    let current = Fiber::current();
    current.run_callback();

    let raw = Arc::as_ptr(&current);
    let id = current.id();
    drop(current);

    // SAFETY: whoever switched into this fiber keeps a handle to it until
    // control is back on their side of the switch.
    hand_off(unsafe { &*raw });

    fatal!("fiber {} resumed after its callback finished", id)
}
