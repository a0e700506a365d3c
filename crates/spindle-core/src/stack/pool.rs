//! Stack pool for reusing fiber stacks across fiber lifetimes.
//!
//! When a fiber is destroyed its stack is returned to the pool instead of
//! the system. The next fiber asking for a stack of the same size gets the
//! recycled block, avoiding a fresh allocation.

use super::{Stack, StackAllocator};
use parking_lot::Mutex;
use std::sync::Arc;

/// Pool of reusable fiber stacks.
///
/// Holds up to `max_size` released stacks; misses and overflow go to the
/// inner allocator.
pub struct PooledStackAllocator {
    stacks: Mutex<Vec<Stack>>,
    max_size: usize,
    inner: Arc<dyn StackAllocator>,
}

impl PooledStackAllocator {
    /// Create a pool that holds up to `max_size` heap stacks.
    pub fn new(max_size: usize) -> Self {
        Self::with_inner(max_size, super::default_allocator())
    }

    /// Create a pool in front of another allocator.
    pub fn with_inner(max_size: usize, inner: Arc<dyn StackAllocator>) -> Self {
        Self {
            stacks: Mutex::new(Vec::with_capacity(max_size)),
            max_size,
            inner,
        }
    }

    /// Number of stacks currently parked in the pool.
    pub fn pooled(&self) -> usize {
        self.stacks.lock().len()
    }
}

impl StackAllocator for PooledStackAllocator {
    fn allocate(&self, size: usize) -> Stack {
        let recycled = {
            let mut pool = self.stacks.lock();
            pool.iter()
                .position(|s| s.size() >= size && s.size() - size < super::STACK_ALIGN)
                .map(|i| pool.swap_remove(i))
        };
        recycled.unwrap_or_else(|| self.inner.allocate(size))
    }

    unsafe fn deallocate(&self, stack: Stack) {
        let mut pool = self.stacks.lock();
        if pool.len() < self.max_size {
            pool.push(stack);
            return;
        }
        drop(pool);
        // pool is full
        self.inner.deallocate(stack);
    }
}

impl Drop for PooledStackAllocator {
    fn drop(&mut self) {
        for stack in self.stacks.get_mut().drain(..) {
            // SAFETY: every pooled stack came from `inner` and is idle.
            unsafe { self.inner.deallocate(stack) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_acquire_release() {
        let pool = PooledStackAllocator::new(4);

        // Allocate returns a fresh stack
        let stack = pool.allocate(32 * 1024);
        let base = stack.base();
        assert_eq!(pool.pooled(), 0);

        // Return it
        unsafe { pool.deallocate(stack) };
        assert_eq!(pool.pooled(), 1);

        // Same size again gets the recycled block
        let recycled = pool.allocate(32 * 1024);
        assert_eq!(recycled.base(), base);
        assert_eq!(pool.pooled(), 0);
        unsafe { pool.deallocate(recycled) };
    }

    #[test]
    fn test_pool_skips_mismatched_sizes() {
        let pool = PooledStackAllocator::new(4);

        let small = pool.allocate(16 * 1024);
        unsafe { pool.deallocate(small) };

        let large = pool.allocate(64 * 1024);
        assert_eq!(large.size(), 64 * 1024);
        assert_eq!(pool.pooled(), 1);
        unsafe { pool.deallocate(large) };
        assert_eq!(pool.pooled(), 2);
    }

    #[test]
    fn test_pool_max_size() {
        let pool = PooledStackAllocator::new(2);

        let s1 = pool.allocate(16 * 1024);
        let s2 = pool.allocate(16 * 1024);
        let s3 = pool.allocate(16 * 1024);

        unsafe {
            pool.deallocate(s1);
            pool.deallocate(s2);
            pool.deallocate(s3); // pool full, goes back to the heap
        }

        assert_eq!(pool.pooled(), 2);
    }
}
