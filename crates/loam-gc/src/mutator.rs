//! Mutator-side protocol: thread registration, allocation, handshakes and
//! root bookkeeping.
//!
//! A thread calls [`enter`] before any allocation or barrier use and
//! [`leave`] when done; both are reentrant through a depth counter. Between
//! work quanta, and at least once inside any long-running loop, the mutator
//! calls [`handshake`] to service collector requests. A mutator that never
//! handshakes stalls the collector: the protocol is on-the-fly, not
//! stop-the-world, so the collector has no way to interrupt a thread.

use std::cell::{Cell, RefCell};
use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::channel::Channel;
use crate::collector::global;
use crate::infants::ChunkedDeque;
use crate::object::{GcObject, GcRef};

struct Local {
    /// enter/leave nesting depth.
    depth: Cell<usize>,
    /// Set when this thread is the collector: it may allocate (trie surgery
    /// during sweeps) without holding a channel.
    collector: Cell<bool>,
    /// At least one white→gray transition since last published.
    dirty: Cell<bool>,
    /// Objects allocated since the last handoff.
    allocations: RefCell<ChunkedDeque<GcRef>>,
    /// LIFO of explicitly registered roots, shaded at every handshake.
    roots: RefCell<Vec<GcRef>>,
    /// Rendezvous with the collector; present between enter and leave.
    channel: RefCell<Option<Arc<Channel>>>,
}

thread_local! {
    static LOCAL: Local = const {
        Local {
            depth: Cell::new(0),
            collector: Cell::new(false),
            dirty: Cell::new(false),
            allocations: RefCell::new(ChunkedDeque::new()),
            roots: RefCell::new(Vec::new()),
            channel: RefCell::new(None),
        }
    };
}

pub(crate) fn mark_dirty() {
    LOCAL.with(|local| local.dirty.set(true));
}

pub(crate) fn take_dirty() -> bool {
    LOCAL.with(|local| local.dirty.replace(false))
}

pub(crate) fn take_allocations() -> ChunkedDeque<GcRef> {
    LOCAL.with(|local| mem::take(&mut *local.allocations.borrow_mut()))
}

pub(crate) fn set_collector() {
    LOCAL.with(|local| local.collector.set(true));
}

/// Register the calling thread as a mutator.
///
/// Publishes a fresh channel to the collector's entrants list and wakes the
/// collector. Reentrant: only the outermost `enter` registers.
pub fn enter() {
    LOCAL.with(|local| {
        let depth = local.depth.get();
        local.depth.set(depth + 1);
        if depth > 0 {
            return;
        }
        let channel = Arc::new(Channel::new());
        *local.channel.borrow_mut() = Some(channel.clone());
        global().entering.lock().push(channel);
        global().wake.notify_all();
        tracing::debug!(target: "loam::gc", "mutator enters collectible state");
    });
}

/// Deregister the calling thread.
///
/// Marks the channel abandoned, hands over any remaining infants and the
/// dirty flag, and releases the channel. The collector adopts the leftovers
/// at its next handshake round. Reentrant: only the outermost `leave`
/// deregisters.
pub fn leave() {
    LOCAL.with(|local| {
        let depth = local.depth.get();
        if depth == 0 {
            crate::protocol_violation("leave without matching enter");
        }
        local.depth.set(depth - 1);
        if depth > 1 {
            return;
        }
        let Some(channel) = local.channel.borrow_mut().take() else {
            crate::protocol_violation("leave without a channel");
        };
        let pending;
        {
            let mut state = channel.state.lock();
            pending = mem::replace(&mut state.pending, false);
            state.abandoned = true;
            state.dirty |= local.dirty.replace(false);
            // A handshake answered moments ago may still be parked in the
            // channel; append rather than assume it was consumed.
            let mut allocations = local.allocations.borrow_mut();
            while let Some(infant) = allocations.pop_front() {
                state.infants.push_back(infant);
            }
            state.request_infants = false;
        }
        if pending {
            channel.cv.notify_all();
        }
        tracing::debug!(target: "loam::gc", "mutator leaves collectible state");
    });
}

/// Service a pending collector request, if any.
///
/// Under the channel lock: publish the dirty flag, hand over infants when
/// requested, clear `pending`, notify the collector. Afterwards, outside
/// the lock, shade every registered root so the trace sees them this round.
pub fn handshake() {
    LOCAL.with(|local| {
        let channel = match &*local.channel.borrow() {
            Some(channel) => channel.clone(),
            None => crate::protocol_violation("handshake outside enter/leave"),
        };
        let pending;
        {
            let mut state = channel.state.lock();
            pending = state.pending;
            if pending {
                state.dirty = local.dirty.replace(false);
                if state.request_infants {
                    debug_assert!(state.infants.is_empty());
                    mem::swap(&mut state.infants, &mut *local.allocations.borrow_mut());
                }
                state.request_infants = false;
                state.pending = false;
            }
        }
        if pending {
            channel.cv.notify_all();
            for root in local.roots.borrow().iter() {
                // SAFETY: registered roots are kept live by this very shade
                // and the owning thread's usage contract.
                crate::barrier::shade(unsafe { root.as_dyn() });
            }
        }
    });
}

/// Allocate a collectible object.
///
/// The object joins the calling mutator's infants list and is owned by the
/// collector from its next handoff onward. The caller gets a raw pointer;
/// keeping the object reachable (roots, in-heap strong fields) is the
/// caller's job once a handshake has passed.
///
/// Aborts if the thread is neither between `enter`/`leave` nor the
/// collector.
pub fn alloc<T: GcObject + 'static>(value: T) -> NonNull<T> {
    let ptr = NonNull::from(Box::leak(Box::new(value)));
    let erased: NonNull<dyn GcObject> = ptr;
    LOCAL.with(|local| {
        if local.channel.borrow().is_none() && !local.collector.get() {
            crate::protocol_violation("allocation outside enter/leave");
        }
        local.allocations.borrow_mut().push_back(GcRef::new(erased));
    });
    ptr
}

/// Register an object on the calling thread's root stack.
///
/// Roots are shaded at every handshake completion, which is what keeps them
/// (and everything they reach) alive across cycles.
pub fn push_root(object: NonNull<dyn GcObject>) {
    LOCAL.with(|local| local.roots.borrow_mut().push(GcRef::new(object)));
}

/// Pop the most recently registered root.
pub fn pop_root() {
    LOCAL.with(|local| {
        local.roots.borrow_mut().pop();
    });
}
