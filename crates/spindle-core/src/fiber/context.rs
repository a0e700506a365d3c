//! Saved machine context backed by glibc `ucontext`

use crate::stack::Stack;
use std::cell::UnsafeCell;
use std::io;
use std::{mem, ptr};

/// Entry point a fresh context starts executing
pub(crate) type Entry = extern "C" fn();

/// Registers, stack pointer and resume point of a suspended execution.
///
/// glibc stores a pointer into the structure itself (the FP register save
/// area), so a context must stay at a fixed address once `prepare` or a
/// switch has written it.
pub(crate) struct MachineContext {
    raw: UnsafeCell<libc::ucontext_t>,
}

impl MachineContext {
    /// A context that has never been saved
    pub(crate) fn empty() -> Self {
        Self {
            // SAFETY: ucontext_t is a plain C struct; all-zero is a valid value
            // and is overwritten before it is ever resumed.
            raw: UnsafeCell::new(unsafe { mem::zeroed() }),
        }
    }

    /// Make the context start at `entry` on `stack` the next time it is resumed.
    ///
    /// # Safety
    ///
    /// Nothing may be executing on this context or on `stack`.
    pub(crate) unsafe fn prepare(&self, stack: &Stack, entry: Entry) {
        let ctx = self.raw.get();
        if libc::getcontext(ctx) != 0 {
            fatal!("getcontext failed: {}", io::Error::last_os_error());
        }
        (*ctx).uc_link = ptr::null_mut();
        (*ctx).uc_stack.ss_sp = stack.base().as_ptr().cast();
        (*ctx).uc_stack.ss_size = stack.size();
        (*ctx).uc_stack.ss_flags = 0;
        libc::makecontext(ctx, entry, 0);
    }

    pub(crate) fn as_ptr(&self) -> *mut libc::ucontext_t {
        self.raw.get()
    }
}

/// Save the running execution into `from` and resume `to`.
///
/// Returns once some other execution switches back into `from`.
///
/// # Safety
///
/// `from` must describe the execution calling this function, and `to` must be
/// a prepared or previously saved context that nothing else is running.
pub(crate) unsafe fn switch(from: *mut libc::ucontext_t, to: *const libc::ucontext_t) {
    if libc::swapcontext(from, to) != 0 {
        fatal!("swapcontext failed: {}", io::Error::last_os_error());
    }
}
