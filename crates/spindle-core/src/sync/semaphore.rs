//! OS-thread counting semaphore

use crate::error::SemaphoreError;
use std::cell::UnsafeCell;
use std::{fmt, io, mem};

/// Counting semaphore backed by a POSIX `sem_t`
///
/// The primitive lives in its own heap allocation because `sem_t` must not
/// move once initialised.
pub struct Semaphore {
    raw: Box<UnsafeCell<libc::sem_t>>,
}

// SAFETY: sem_t is designed to be shared between threads.
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Create a semaphore holding `count` permits.
    ///
    /// Panics if the OS refuses to create it.
    pub fn new(count: u32) -> Self {
        match Self::try_new(count) {
            Ok(semaphore) => semaphore,
            Err(e) => panic!("{}", e),
        }
    }

    /// Create a semaphore, reporting OS failures
    pub fn try_new(count: u32) -> Result<Self, SemaphoreError> {
        // SAFETY: sem_t is plain data; sem_init fully initialises it.
        let raw = Box::new(UnsafeCell::new(unsafe { mem::zeroed::<libc::sem_t>() }));
        if unsafe { libc::sem_init(raw.get(), 0, count) } != 0 {
            return Err(SemaphoreError::Init(io::Error::last_os_error()));
        }
        Ok(Self { raw })
    }

    /// Block the calling thread until a permit is available, then take it
    pub fn wait(&self) {
        loop {
            // SAFETY: initialised in try_new, destroyed only in drop.
            if unsafe { libc::sem_wait(self.raw.get()) } == 0 {
                return;
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                panic!("sem_wait failed: {}", err);
            }
        }
    }

    /// Take a permit if one is available right now
    pub fn try_wait(&self) -> bool {
        loop {
            // SAFETY: as in `wait`.
            if unsafe { libc::sem_trywait(self.raw.get()) } == 0 {
                return true;
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return false,
                Some(libc::EINTR) => continue,
                _ => panic!("sem_trywait failed: {}", err),
            }
        }
    }

    /// Release a permit, waking one blocked thread if there is one
    pub fn notify(&self) {
        // SAFETY: as in `wait`.
        if unsafe { libc::sem_post(self.raw.get()) } != 0 {
            panic!("sem_post failed: {}", io::Error::last_os_error());
        }
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        // SAFETY: no thread can be waiting: they would hold a borrow of self.
        unsafe { libc::sem_destroy(self.raw.get()) };
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore").finish_non_exhaustive()
    }
}
