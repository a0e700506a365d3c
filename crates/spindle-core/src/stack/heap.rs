//! General-purpose heap stacks

use super::{round_up, Stack, StackAllocator, STACK_ALIGN};
use std::alloc::{self, Layout};
use std::ptr::NonNull;

/// Allocates stacks from the global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct HeapStackAllocator;

impl HeapStackAllocator {
    /// Create the heap allocator
    pub fn new() -> Self {
        Self
    }

    fn layout(size: usize) -> Layout {
        match Layout::from_size_align(size, STACK_ALIGN) {
            Ok(layout) => layout,
            Err(_) => panic!("invalid fiber stack size: {}", size),
        }
    }
}

impl StackAllocator for HeapStackAllocator {
    fn allocate(&self, size: usize) -> Stack {
        assert!(size > 0, "fiber stack size must be non-zero");
        let layout = Self::layout(round_up(size, STACK_ALIGN));
        // SAFETY: layout has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        match NonNull::new(raw) {
            // SAFETY: fresh allocation of layout.size() bytes at STACK_ALIGN.
            Some(base) => unsafe { Stack::from_raw_parts(base, layout.size()) },
            None => alloc::handle_alloc_error(layout),
        }
    }

    unsafe fn deallocate(&self, stack: Stack) {
        let layout = Self::layout(stack.size());
        alloc::dealloc(stack.base().as_ptr(), layout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_rounds_and_aligns() {
        let allocator = HeapStackAllocator::new();
        let stack = allocator.allocate(20_001);

        assert_eq!(stack.size(), 20_016);
        assert_eq!(stack.base().as_ptr() as usize % STACK_ALIGN, 0);

        unsafe { allocator.deallocate(stack) };
    }

    #[test]
    fn test_stack_is_writable() {
        let allocator = HeapStackAllocator::new();
        let stack = allocator.allocate(4096);

        unsafe {
            std::ptr::write_bytes(stack.base().as_ptr(), 0xAB, stack.size());
            assert_eq!(*stack.top().sub(1), 0xAB);
            allocator.deallocate(stack);
        }
    }

    #[test]
    #[should_panic(expected = "non-zero")]
    fn test_zero_size_rejected() {
        HeapStackAllocator::new().allocate(0);
    }
}
