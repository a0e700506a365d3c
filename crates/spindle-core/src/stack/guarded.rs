//! Guard-paged stacks backed by anonymous mappings
//!
//! Layout of one mapping (stacks grow down):
//!
//! ```text
//! low                                             high
//! | guard page (PROT_NONE) | usable stack ........ |
//! ```

use super::{round_up, Stack, StackAllocator};
use std::alloc::Layout;
use std::ptr::{self, NonNull};

/// Allocates each stack in its own mapping with an inaccessible guard page
/// below it, so running off the end faults instead of corrupting the heap.
#[derive(Debug, Clone, Copy)]
pub struct GuardedStackAllocator {
    page_size: usize,
}

impl GuardedStackAllocator {
    /// Create an allocator using the system page size
    pub fn new() -> Self {
        // SAFETY: sysconf has no memory-safety preconditions.
        let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        Self {
            page_size: if page > 0 { page as usize } else { 4096 },
        }
    }

    /// Page size used for rounding and for the guard
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn fail(&self, size: usize) -> ! {
        tracing::error!(
            size,
            "guarded stack mapping failed: {}",
            std::io::Error::last_os_error()
        );
        let layout = Layout::from_size_align(size.max(1), self.page_size)
            .unwrap_or_else(|_| Layout::new::<u8>());
        std::alloc::handle_alloc_error(layout)
    }
}

impl Default for GuardedStackAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl StackAllocator for GuardedStackAllocator {
    fn allocate(&self, size: usize) -> Stack {
        assert!(size > 0, "fiber stack size must be non-zero");
        let usable = round_up(size, self.page_size);
        let total = usable + self.page_size;

        // SAFETY: anonymous private mapping, no file descriptor involved.
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK,
                -1,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            self.fail(total);
        }

        // SAFETY: the first page belongs to the mapping created above.
        if unsafe { libc::mprotect(raw, self.page_size, libc::PROT_NONE) } != 0 {
            // SAFETY: unmapping what we just mapped.
            unsafe { libc::munmap(raw, total) };
            self.fail(total);
        }

        // SAFETY: raw is non-null (not MAP_FAILED) and page aligned; the
        // usable region starts one page above it.
        unsafe {
            let base = NonNull::new_unchecked((raw as *mut u8).add(self.page_size));
            Stack::from_raw_parts(base, usable)
        }
    }

    unsafe fn deallocate(&self, stack: Stack) {
        let mapping = stack.base().as_ptr().sub(self.page_size);
        let total = stack.size() + self.page_size;
        if libc::munmap(mapping.cast(), total) != 0 {
            tracing::error!(
                "munmap of fiber stack failed: {}",
                std::io::Error::last_os_error()
            );
        }
    }
}
