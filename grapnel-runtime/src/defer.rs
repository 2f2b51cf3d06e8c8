//! # Deferred Execution Runtime
//!
//! Scope-based deferred actions and multi-level early exit for code that
//! manages resources by hand.
//!
//! ## Design
//!
//! Each thread lazily owns a continuation stack: a fixed-capacity slab of
//! records hosted in a private [`VirtualArena`]. Reserving the slab as
//! address space keeps record addresses stable as the stack grows (growth is
//! paging, never relocation) while physical memory is only paid for touched
//! pages. The reservation happens once per thread; the syscall is serialized
//! through a shared [`Monitor`](crate::monitor::Monitor).
//!
//! [`scope`] establishes an unwind boundary. Entering a scope records the
//! stack depth as the frame base and pushes a frame marker; every action
//! registered through [`Scope::defer`] pushes one record. When the scope
//! finishes (by completing, by a propagated break, or by a panic) every
//! record pushed since the frame base is popped and resumed in strict LIFO
//! order before control proceeds past the scope.
//!
//! Multi-level early exit is data, not a jump: [`Scope::break_to`] yields a
//! [`Flow::Break`] carrying the target [`FrameId`], each enclosing scope
//! unwinds its own records and threads the value upward, and the scope whose
//! frame matches consumes it and returns [`Flow::Done`]`(None)`.
//!
//! ## Ordering
//!
//! Actions registered in one scope run in reverse registration order. An
//! inner scope always unwinds completely before any of the enclosing scope's
//! records run, so ordering composes across arbitrary nesting.
//!
//! ## Forbidden usage
//!
//! The following are usage errors with no defined outcome; they are not
//! guarded at runtime:
//!
//! - breaking while a previous break is still in flight (one break per
//!   thread at a time),
//! - breaking to a frame that is not an active enclosing frame of the break
//!   site,
//! - dropping a [`Flow::Break`] instead of returning it from the scope body.
//!
//! Breaking from inside a deferred action is not expressible: actions return
//! `()` and receive no scope handle.
//!
//! Exceeding the reserved stack capacity is a fatal panic, not a recoverable
//! condition. Deferred actions, frames, and breaks never cross threads.
//!
//! # Example
//!
//! ```rust,ignore
//! use grapnel_runtime::defer::{scope, Flow};
//!
//! let out = scope(|outer| {
//!     let target = outer.frame();
//!     outer.defer(|| println!("outer cleanup"));
//!     let inner = scope(|inner| {
//!         inner.defer(|| println!("inner cleanup"));
//!         if true {
//!             return inner.break_to(target);
//!         }
//!         Flow::Done(1)
//!     });
//!     // Thread an in-flight break upward.
//!     if let Flow::Break(t) = inner {
//!         return Flow::Break(t);
//!     }
//!     Flow::Done(2)
//! });
//! // Prints "inner cleanup" then "outer cleanup"; `out` is Done(None).
//! ```

use std::cell::{Cell, OnceCell};
use std::marker::PhantomData;
use std::mem;
use std::sync::OnceLock;

use crate::alloc::Allocator;
use crate::arena::VirtualArena;
use crate::config::RuntimeConfig;
use crate::log::{LogBuilder, LogLevel};
use crate::monitor::Monitor;

/// Identifies a scope frame by the record-stack depth captured at entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(usize);

impl FrameId {
    /// Record-stack depth at which the frame was entered.
    pub fn depth(&self) -> usize {
        self.0
    }
}

/// Control-flow result of a scope body.
#[must_use]
#[derive(Debug)]
pub enum Flow<T> {
    /// The body ran to completion.
    Done(T),
    /// An in-flight multi-level break, still unwinding toward its target.
    ///
    /// A body receiving this from a nested [`scope`] call must return it
    /// unchanged so the break keeps travelling outward.
    Break(FrameId),
}

impl<T> Flow<T> {
    /// Whether this is a completed flow.
    pub fn is_done(&self) -> bool {
        matches!(self, Flow::Done(_))
    }

    /// Whether this is an in-flight break.
    pub fn is_break(&self) -> bool {
        matches!(self, Flow::Break(_))
    }
}

/// One continuation record on the per-thread stack.
enum Record {
    /// Slot pushed at scope entry; popping it is the scope's exit point.
    Marker,
    /// A deferred action awaiting resumption.
    Action(Box<dyn FnOnce()>),
}

// ============================================================================
// Continuation stack
// ============================================================================

const RECORD_SIZE: usize = mem::size_of::<Record>();

/// Fixed-capacity stack of continuation records hosted in reserved virtual
/// memory.
///
/// Slots are allocated from the arena strictly in order, so slot `i` always
/// sits at `base + i * RECORD_SIZE` and never moves. Popping only lowers the
/// logical length; committed pages stay committed until the stack is
/// dropped.
struct ContinuationStack {
    arena: VirtualArena,
    /// Current stack pointer. Slots below it hold initialized records.
    len: Cell<usize>,
    /// High-water mark of slots ever allocated from the arena.
    slots: Cell<usize>,
    /// Total record capacity of the reservation.
    capacity: usize,
}

impl ContinuationStack {
    fn new(reserve_bytes: usize) -> Self {
        let arena = match VirtualArena::reserve(reserve_bytes) {
            Ok(arena) => arena,
            Err(err) => panic!("failed to reserve the deferral stack: {err}"),
        };
        Self {
            capacity: reserve_bytes / RECORD_SIZE,
            arena,
            len: Cell::new(0),
            slots: Cell::new(0),
        }
    }

    fn slot(&self, index: usize) -> *mut Record {
        (self.arena.base().as_ptr() as usize + index * RECORD_SIZE) as *mut Record
    }

    fn depth(&self) -> usize {
        self.len.get()
    }

    fn push(&self, record: Record) {
        let index = self.len.get();
        if index == self.slots.get() {
            assert!(
                index < self.capacity,
                "deferral stack exhausted ({} records)",
                self.capacity
            );
            let ptr = match self.arena.alloc(RECORD_SIZE) {
                Ok(ptr) => ptr,
                Err(err) => panic!("failed to grow the deferral stack: {err}"),
            };
            debug_assert_eq!(ptr.as_ptr(), self.slot(index).cast());
            self.slots.set(index + 1);
        }
        // Safety: the slot is allocated, in bounds, and currently vacant.
        unsafe { self.slot(index).write(record) };
        self.len.set(index + 1);
    }

    fn pop(&self) -> Record {
        let index = self.len.get() - 1;
        self.len.set(index);
        // Safety: every slot below `len` holds an initialized record, and
        // lowering `len` first makes this read the unique owner.
        unsafe { self.slot(index).read() }
    }
}

impl Drop for ContinuationStack {
    fn drop(&mut self) {
        // Release records that were never unwound (scopes alive at thread
        // exit); the arena reservation is released by its own drop.
        while self.len.get() > 0 {
            drop(self.pop());
        }
    }
}

// ============================================================================
// Per-thread context
// ============================================================================

/// Per-thread state of the defer runtime.
struct DeferContext {
    stack: ContinuationStack,
    /// The one break slot: holds the target frame while a break is in
    /// flight, cleared exactly once when the target frame consumes it.
    pending_break: Cell<Option<FrameId>>,
}

thread_local! {
    static CONTEXT: OnceCell<DeferContext> = const { OnceCell::new() };
}

/// Serializes each thread's one-time reservation syscall. The resulting
/// stack itself stays thread-local; this lock is never taken again.
fn init_monitor() -> &'static Monitor<()> {
    static INIT: OnceLock<Monitor<()>> = OnceLock::new();
    INIT.get_or_init(|| Monitor::new(()))
}

impl DeferContext {
    fn new() -> Self {
        let reserve_bytes = crate::runtime_config()
            .map(|config| config.defer.stack_reserve_bytes)
            .unwrap_or_else(|| RuntimeConfig::default().defer.stack_reserve_bytes);
        let stack = {
            let _guard = init_monitor().lock();
            ContinuationStack::new(reserve_bytes)
        };
        LogBuilder::new(LogLevel::Debug)
            .target("defer")
            .message("defer runtime initialized")
            .field_int("reserved_bytes", reserve_bytes as i64)
            .field_int("record_capacity", stack.capacity as i64)
            .emit();
        Self {
            stack,
            pending_break: Cell::new(None),
        }
    }

    /// Run `f` against this thread's context, constructing it on first use.
    fn with<R>(f: impl FnOnce(&DeferContext) -> R) -> R {
        CONTEXT.with(|cell| f(cell.get_or_init(DeferContext::new)))
    }

    /// The single unwind primitive: resume and discard records from the top
    /// of the stack until its depth equals `base`. Never skips a record.
    fn unwind_to(&self, base: usize) {
        while self.stack.depth() > base {
            match self.stack.pop() {
                Record::Marker => {}
                Record::Action(action) => action(),
            }
        }
    }
}

// ============================================================================
// Public surface
// ============================================================================

/// Handle to the active scope, passed to the body closure.
///
/// The handle is thread-bound; deferred actions and breaks never leave the
/// thread that registered them.
pub struct Scope {
    frame: FrameId,
    _not_send: PhantomData<*const ()>,
}

impl Scope {
    /// The frame base of this scope, usable as a break target from nested
    /// scopes.
    pub fn frame(&self) -> FrameId {
        self.frame
    }

    /// Register a deferred action.
    ///
    /// Actions run in reverse registration order when the innermost scope
    /// active at registration time unwinds.
    pub fn defer<F>(&self, action: F)
    where
        F: FnOnce() + 'static,
    {
        DeferContext::with(|cx| cx.stack.push(Record::Action(Box::new(action))));
    }

    /// Begin a multi-level break toward `target`.
    ///
    /// Arms the thread's break slot and yields the [`Flow::Break`] value the
    /// body must return. Every deferred action between the break site and
    /// the target frame runs while the value travels outward; execution
    /// resumes after the scope whose frame is `target`.
    pub fn break_to<T>(&self, target: FrameId) -> Flow<T> {
        DeferContext::with(|cx| cx.pending_break.set(Some(target)));
        Flow::Break(target)
    }
}

/// Guard that performs the scope's unwind on every exit path, the panic
/// path included.
struct UnwindGuard {
    base: usize,
}

impl Drop for UnwindGuard {
    fn drop(&mut self) {
        DeferContext::with(|cx| cx.unwind_to(self.base));
    }
}

/// Run `body` inside a new scope.
///
/// The scope establishes an unwind boundary: every action registered since
/// entry is resumed in LIFO order before `scope` returns, regardless of how
/// the body finished.
///
/// Returns:
///
/// - `Flow::Done(Some(value))` when the body completed with
///   [`Flow::Done`]`(value)`,
/// - `Flow::Done(None)` when a break targeting this scope's frame was
///   consumed here,
/// - `Flow::Break(target)` when a break is still travelling to an outer
///   frame; the caller's body must return it onward.
pub fn scope<T, F>(body: F) -> Flow<Option<T>>
where
    F: FnOnce(&Scope) -> Flow<T>,
{
    let base = DeferContext::with(|cx| {
        let base = cx.stack.depth();
        cx.stack.push(Record::Marker);
        base
    });
    let frame = FrameId(base);
    let outcome = {
        let _unwind = UnwindGuard { base };
        body(&Scope {
            frame,
            _not_send: PhantomData,
        })
        // The guard drops here: LIFO unwind down to the frame base.
    };
    match outcome {
        Flow::Done(value) => Flow::Done(Some(value)),
        Flow::Break(target) if target == frame => {
            DeferContext::with(|cx| cx.pending_break.set(None));
            Flow::Done(None)
        }
        Flow::Break(target) => {
            debug_assert!(
                target.0 < base,
                "break target {:?} is not an enclosing frame",
                target
            );
            Flow::Break(target)
        }
    }
}

/// Acquire a resource, run `body` in a scope, and guarantee `release` runs
/// after the scope's deferred actions, on the panic path too.
///
/// The release step composes with LIFO unwinding exactly as if it had been
/// the first action registered in the scope.
pub fn using<R, T, C, B>(resource: R, release: C, body: B) -> Flow<Option<T>>
where
    C: FnOnce(&mut R),
    B: FnOnce(&mut R, &Scope) -> Flow<T>,
{
    struct Cleanup<R, C: FnOnce(&mut R)> {
        resource: R,
        release: Option<C>,
    }

    impl<R, C: FnOnce(&mut R)> Drop for Cleanup<R, C> {
        fn drop(&mut self) {
            if let Some(release) = self.release.take() {
                release(&mut self.resource);
            }
        }
    }

    let mut cleanup = Cleanup {
        resource,
        release: Some(release),
    };
    let out = scope(|s| body(&mut cleanup.resource, s));
    drop(cleanup);
    out
}

/// Current depth of this thread's record stack.
///
/// Zero whenever no scope is active. Touching this initializes the thread's
/// runtime.
pub fn depth() -> usize {
    DeferContext::with(|cx| cx.stack.depth())
}

/// Whether a break is currently in flight on this thread.
pub fn break_pending() -> bool {
    DeferContext::with(|cx| cx.pending_break.get().is_some())
}
