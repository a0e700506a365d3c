//! Fiber stack allocation
//!
//! A fiber's stack is raw memory handed out by a [`StackAllocator`]. The
//! allocator is injected per fiber, so pooled or guard-paged stacks can be
//! swapped in without touching the fiber itself.

mod guarded;
mod heap;
mod pool;

pub use guarded::GuardedStackAllocator;
pub use heap::HeapStackAllocator;
pub use pool::PooledStackAllocator;

use once_cell::sync::Lazy;
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

/// Alignment every allocator guarantees for a stack's base and size
pub const STACK_ALIGN: usize = 16;

static DEFAULT_ALLOCATOR: Lazy<Arc<dyn StackAllocator>> =
    Lazy::new(|| Arc::new(HeapStackAllocator::new()));

/// A block of memory a fiber runs on
///
/// A `Stack` is a unique token for its memory: it is neither `Clone` nor
/// `Copy`, so handing it back to [`StackAllocator::deallocate`] frees it once.
pub struct Stack {
    base: NonNull<u8>,
    size: usize,
}

// SAFETY: a Stack is plain memory exclusively owned by the holder of the token.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Wrap raw stack memory
    ///
    /// # Safety
    ///
    /// `base` must point to `size` writable bytes, aligned to
    /// [`STACK_ALIGN`], owned by the allocator that will receive this token.
    pub unsafe fn from_raw_parts(base: NonNull<u8>, size: usize) -> Self {
        Self { base, size }
    }

    /// Lowest address of the usable region
    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// Usable size in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// One past the highest usable address
    pub fn top(&self) -> *mut u8 {
        // SAFETY: base..base+size is one allocation.
        unsafe { self.base.as_ptr().add(self.size) }
    }
}

impl fmt::Debug for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.base)
            .field("size", &self.size)
            .finish()
    }
}

/// Policy producing and reclaiming fiber stacks
pub trait StackAllocator: Send + Sync {
    /// Allocate a stack of at least `size` bytes
    ///
    /// Allocation failure is fatal.
    fn allocate(&self, size: usize) -> Stack;

    /// Release a stack
    ///
    /// # Safety
    ///
    /// `stack` must have been returned by `allocate` on this allocator and
    /// nothing may still be executing on it.
    unsafe fn deallocate(&self, stack: Stack);
}

/// The allocator fibers use when none is injected
pub fn default_allocator() -> Arc<dyn StackAllocator> {
    Arc::clone(&DEFAULT_ALLOCATOR)
}

/// Round `size` up to a multiple of `align` (a power of two)
pub(crate) fn round_up(size: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    (size + align - 1) & !(align - 1)
}
