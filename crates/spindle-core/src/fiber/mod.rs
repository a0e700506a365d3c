//! Stackful fibers
//!
//! A [`Fiber`] owns a private stack and a saved machine context. It runs its
//! callback until the callback returns, panics, or the fiber yields; yielding
//! switches back to the thread's scheduling fiber (`swap_in`/`swap_out`) or
//! root fiber (`call`/`back`).
//!
//! ```text
//! Init --swap_in/call--> Exec --yield--> Ready | Hold --swap_in--> Exec
//!                          |
//!                          +--returns--> Term
//!                          +--panics---> Except
//! ```
//!
//! `Exec` always means "on a CPU right now": a fiber that switches away
//! without declaring itself `Ready` is recorded as `Hold`.

mod context;
mod entry;
pub(crate) mod local;

use crate::config::{self, MIN_STACK_SIZE};
use crate::error::FiberPanic;
use crate::stack::{self, Stack, StackAllocator};
use context::MachineContext;
use crossbeam::atomic::AtomicCell;
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_FIBER_ID: AtomicU64 = AtomicU64::new(1);
static LIVE_FIBERS: AtomicU64 = AtomicU64::new(0);

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Unique identifier for a Fiber
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FiberId(u64);

impl FiberId {
    fn next() -> Self {
        FiberId(NEXT_FIBER_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a FiberId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        FiberId(id)
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a Fiber
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FiberState {
    /// Created or reset, never run
    Init,
    /// Currently executing on some thread
    Exec,
    /// Yielded and wants to run again
    Ready,
    /// Switched away; someone else decides when it runs again
    Hold,
    /// Callback returned
    Term,
    /// Callback panicked
    Except,
}

impl FiberState {
    /// Whether the callback has finished, one way or the other
    pub fn is_terminal(self) -> bool {
        matches!(self, FiberState::Term | FiberState::Except)
    }

    /// States in which the fiber may be reset or destroyed
    pub fn is_idle(self) -> bool {
        matches!(self, FiberState::Init | FiberState::Term | FiberState::Except)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum EntryKind {
    Scheduled,
    Caller,
}

impl EntryKind {
    fn function(self) -> context::Entry {
        match self {
            EntryKind::Scheduled => entry::scheduled_main,
            EntryKind::Caller => entry::caller_main,
        }
    }
}

/// Options for [`Fiber::with_options`]
#[derive(Clone, Default)]
pub struct FiberOptions {
    /// Stack size in bytes; 0 means `fiber.stack_size` from the configuration
    pub stack_size: usize,

    /// Enter through `call`/`back` against the root fiber instead of the
    /// scheduling fiber
    pub use_caller: bool,

    /// Stack allocator; `None` uses the process default heap allocator
    pub allocator: Option<Arc<dyn StackAllocator>>,
}

impl fmt::Debug for FiberOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FiberOptions")
            .field("stack_size", &self.stack_size)
            .field("use_caller", &self.use_caller)
            .field("custom_allocator", &self.allocator.is_some())
            .finish()
    }
}

struct FiberStack {
    stack: Stack,
    allocator: Arc<dyn StackAllocator>,
}

/// A stackful, cooperatively scheduled unit of execution
pub struct Fiber {
    /// Unique identifier, kept across `reset`
    id: FiberId,

    /// Current state
    state: AtomicCell<FiberState>,

    /// Saved registers while not executing
    context: MachineContext,

    /// Private stack (None for root fibers)
    stack: Option<FiberStack>,

    /// Work to run; taken when the fiber first starts
    callback: Mutex<Option<Callback>>,

    /// Panic captured from the callback
    failure: Mutex<Option<FiberPanic>>,

    /// Which entry point the context was prepared with
    entry: AtomicCell<EntryKind>,
}

// SAFETY: the machine context is only read or written by the thread switching
// into or out of the fiber, and the state checks in swap_in/call/reset ensure a
// fiber has at most one executor at a time. Everything else is synchronized.
unsafe impl Send for Fiber {}
unsafe impl Sync for Fiber {}

impl Fiber {
    /// Create a fiber with the default stack size and allocator
    pub fn new<F>(callback: F) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        Self::with_options(callback, FiberOptions::default())
    }

    /// Create a fiber with explicit options
    pub fn with_options<F>(callback: F, options: FiberOptions) -> Arc<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = if options.stack_size == 0 {
            config::default_stack_size()
        } else {
            options.stack_size
        };
        assert!(
            stack_size >= MIN_STACK_SIZE,
            "fiber stack size {} is below the minimum of {}",
            stack_size,
            MIN_STACK_SIZE
        );

        let allocator = options.allocator.unwrap_or_else(stack::default_allocator);
        let stack = allocator.allocate(stack_size);
        let entry = if options.use_caller {
            EntryKind::Caller
        } else {
            EntryKind::Scheduled
        };

        let fiber = Arc::new(Self::assemble(
            Some(FiberStack { stack, allocator }),
            Some(Box::new(callback)),
            FiberState::Init,
            entry,
        ));
        // SAFETY: the fiber has never run and now sits at its final address.
        unsafe { fiber.prepare_context(entry) };

        tracing::debug!(fiber_id = %fiber.id, stack_size, "fiber created");
        fiber
    }

    /// The root fiber of the calling thread: no stack, always executing
    pub(crate) fn new_root() -> Self {
        Self::assemble(None, None, FiberState::Exec, EntryKind::Scheduled)
    }

    fn assemble(
        stack: Option<FiberStack>,
        callback: Option<Callback>,
        state: FiberState,
        entry: EntryKind,
    ) -> Self {
        LIVE_FIBERS.fetch_add(1, Ordering::SeqCst);
        Self {
            id: FiberId::next(),
            state: AtomicCell::new(state),
            context: MachineContext::empty(),
            stack,
            callback: Mutex::new(callback),
            failure: Mutex::new(None),
            entry: AtomicCell::new(entry),
        }
    }

    unsafe fn prepare_context(&self, entry: EntryKind) {
        match &self.stack {
            Some(owned) => self.context.prepare(&owned.stack, entry.function()),
            None => unreachable!("root fibers have no context to prepare"),
        }
        self.entry.store(entry);
    }

    /// Reinstall a callback on an idle fiber, keeping its id and stack.
    ///
    /// The fiber goes back to `Init` and will enter through the scheduled
    /// entry point. Panics on a root fiber or a fiber that is not idle.
    pub fn reset<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        assert!(!self.is_root(), "cannot reset root fiber {}", self.id);
        let state = self.state();
        assert!(
            state.is_idle(),
            "cannot reset fiber {} in state {:?}",
            self.id,
            state
        );

        *self.callback.lock() = Some(Box::new(callback));
        *self.failure.lock() = None;
        // SAFETY: an idle fiber has nothing executing on its stack.
        unsafe { self.prepare_context(EntryKind::Scheduled) };
        self.state.store(FiberState::Init);
    }

    /// Switch from the thread's scheduling fiber into this fiber.
    ///
    /// Must be called while the scheduling fiber is the one executing.
    /// Returns when this fiber switches back out.
    pub fn swap_in(self: &Arc<Self>) {
        self.resume_from(local::scheduling(), "swap_in");
    }

    /// Switch from this fiber back to the thread's scheduling fiber
    pub fn swap_out(&self) {
        self.suspend_to(local::scheduling(), "swap_out");
    }

    /// Switch from the thread's root fiber into this fiber
    pub fn call(self: &Arc<Self>) {
        self.resume_from(local::root(), "call");
    }

    /// Switch from this fiber back to the thread's root fiber
    pub fn back(&self) {
        self.suspend_to(local::root(), "back");
    }

    fn resume_from(self: &Arc<Self>, from: Arc<Fiber>, op: &str) {
        let state = self.state();
        assert!(
            state != FiberState::Exec,
            "{} on fiber {} which is already executing",
            op,
            self.id
        );
        assert!(
            !state.is_terminal(),
            "{} on fiber {} which has already finished ({:?})",
            op,
            self.id,
            state
        );
        assert!(
            local::is_current(&from),
            "{} on fiber {} must be issued from fiber {}",
            op,
            self.id,
            from.id
        );

        let from_ctx = from.context.as_ptr();
        // The thread-local slot keeps `from` alive across the switch.
        drop(from);

        local::set_current(Arc::clone(self));
        self.state.store(FiberState::Exec);
        tracing::trace!(fiber_id = %self.id, "{}", op);

        // SAFETY: `from` is the running execution and this fiber is idle.
        unsafe { context::switch(from_ctx, self.context.as_ptr()) };
    }

    fn suspend_to(&self, to: Arc<Fiber>, op: &str) {
        assert!(
            local::is_current(self),
            "{} on fiber {} which is not the running fiber",
            op,
            self.id
        );
        // Ready, Hold, Term and Except were already recorded by the caller.
        if self.state.load() == FiberState::Exec {
            self.state.store(FiberState::Hold);
        }

        let to_ctx = to.context.as_ptr();
        tracing::trace!(fiber_id = %self.id, to = %to.id, "{}", op);
        local::set_current(to);

        // SAFETY: this fiber is the running execution; `to` was saved when it
        // switched into us and is kept alive by its thread-local slot.
        unsafe { context::switch(self.context.as_ptr(), to_ctx) };
    }

    pub(crate) fn run_callback(&self) {
        let callback = match self.callback.lock().take() {
            Some(callback) => callback,
            None => fatal!("fiber {} started without a callback", self.id),
        };

        match panic::catch_unwind(AssertUnwindSafe(callback)) {
            Ok(()) => self.state.store(FiberState::Term),
            Err(payload) => {
                let failure = FiberPanic::from_payload(self.id, payload.as_ref());
                tracing::error!(fiber_id = %self.id, "fiber panicked: {}", failure.message);
                *self.failure.lock() = Some(failure);
                self.state.store(FiberState::Except);
            }
        }
    }

    /// The fiber executing on the calling thread.
    ///
    /// Creates the thread's root fiber on first use.
    pub fn current() -> Arc<Fiber> {
        match local::current() {
            Some(fiber) => fiber,
            None => local::root(),
        }
    }

    /// Id of the fiber executing on the calling thread, if one exists yet
    pub fn current_id() -> Option<FiberId> {
        local::current().map(|fiber| fiber.id)
    }

    /// Mark the current fiber `Ready` and switch to the scheduling fiber
    pub fn yield_to_ready() {
        Self::yield_as(FiberState::Ready);
    }

    /// Mark the current fiber `Hold` and switch to the scheduling fiber.
    ///
    /// The caller is responsible for arranging for the fiber to be scheduled
    /// again.
    pub fn yield_to_hold() {
        Self::yield_as(FiberState::Hold);
    }

    fn yield_as(next: FiberState) {
        let current = Fiber::current();
        assert!(!current.is_root(), "the root fiber cannot yield");
        let state = current.state();
        assert_eq!(
            state,
            FiberState::Exec,
            "fiber {} yielding from state {:?}",
            current.id,
            state
        );
        current.state.store(next);
        // `current` stays on this stack while suspended, keeping the fiber alive.
        current.swap_out();
    }

    /// Number of fibers currently alive in the process
    pub fn total_fibers() -> u64 {
        LIVE_FIBERS.load(Ordering::SeqCst)
    }

    /// Get the fiber ID
    pub fn id(&self) -> FiberId {
        self.id
    }

    /// Get the current state
    pub fn state(&self) -> FiberState {
        self.state.load()
    }

    /// Whether this fiber stands for a thread's original stack
    pub fn is_root(&self) -> bool {
        self.stack.is_none()
    }

    /// Stack size in bytes (0 for root fibers)
    pub fn stack_size(&self) -> usize {
        self.stack.as_ref().map_or(0, |owned| owned.stack.size())
    }

    /// Whether the context enters through `call`/`back`
    pub fn uses_caller_entry(&self) -> bool {
        self.entry.load() == EntryKind::Caller
    }

    /// The panic captured from the callback, if it failed
    pub fn failure(&self) -> Option<FiberPanic> {
        self.failure.lock().clone()
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("root", &self.is_root())
            .field("stack_size", &self.stack_size())
            .finish()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        let live = LIVE_FIBERS.fetch_sub(1, Ordering::SeqCst) - 1;
        let state = self.state.load();

        match self.stack.take() {
            Some(FiberStack { stack, allocator }) => {
                if !state.is_idle() {
                    fatal!("fiber {} destroyed in state {:?}", self.id, state);
                }
                // SAFETY: the stack came from this allocator and nothing runs on it.
                unsafe { allocator.deallocate(stack) };
            }
            None => {
                if state != FiberState::Exec || self.callback.get_mut().is_some() {
                    fatal!("root fiber {} destroyed in state {:?}", self.id, state);
                }
            }
        }

        tracing::debug!(fiber_id = %self.id, total = live, "fiber destroyed");
    }
}
