//! Write barrier and the strong pointer wrappers that apply it.
//!
//! The barrier is Dijkstra-style insertion-plus-deletion: every store that
//! installs a referent into an in-heap slot shades both the incoming and the
//! evicted referent (white→gray), and every successful compare-exchange
//! shades both the expected and the desired value. Shading records a
//! thread-local dirty flag which the mutator publishes at its next
//! handshake; the collector keeps tracing until a full handshake round
//! reports every mutator clean.
//!
//! Ordering discipline: in-heap pointer stores are release, loads intended
//! for dereference are acquire, and the color CAS itself is relaxed.
//! Cross-thread synchronization is established by the handshake rendezvous,
//! not by the color word.

use std::sync::atomic::{AtomicPtr, Ordering};

use crate::collector::global;
use crate::color::{GRAY, invert};
use crate::mutator;
use crate::object::GcObject;

/// Shade an object: attempt white→gray (white→black for a leaf).
///
/// The gray transition marks the calling thread dirty so the collector
/// knows new trace work may exist. Leaves go straight to black: they have
/// no children, so they cannot introduce reachability and need no rescan.
pub fn shade(object: &dyn GcObject) {
    let white = global().white.load(Ordering::Relaxed);
    let header = object.header();
    if object.is_leaf() {
        let _ = header
            .color
            .compare_exchange(white, invert(white), Ordering::Relaxed, Ordering::Relaxed);
    } else if header
        .color
        .compare_exchange(white, GRAY, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        mutator::mark_dirty();
    }
}

/// Shade through a possibly-null raw pointer.
///
/// # Safety
/// `ptr` must be null or point to a live collectible allocation.
pub(crate) unsafe fn shade_raw<T: GcObject>(ptr: *const T) {
    if let Some(object) = unsafe { ptr.as_ref() } {
        shade(object);
    }
}

/// A multi-writer atomic strong reference slot.
///
/// Every mutation goes through the write barrier. The stored pointer is raw:
/// the referent's lifetime is owned by the collector, and holding a pointer
/// here is exactly what keeps the referent alive across cycles.
pub struct AtomicStrong<T> {
    ptr: AtomicPtr<T>,
}

impl<T: GcObject> AtomicStrong<T> {
    /// An empty slot.
    pub const fn null() -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// A slot initialized to `ptr` without shading.
    ///
    /// Initialization is not a barrier event: the enclosing object has not
    /// been published yet, so no tracer can have scanned past this slot.
    pub fn new(ptr: *mut T) -> Self {
        Self {
            ptr: AtomicPtr::new(ptr),
        }
    }

    /// Load the slot. Use `Acquire` when the result will be dereferenced.
    pub fn load(&self, order: Ordering) -> *mut T {
        self.ptr.load(order)
    }

    /// Store through the barrier: shade the incoming referent, exchange it
    /// into the slot, shade the evicted referent.
    ///
    /// # Safety
    /// `desired` must be null or point to a live collectible allocation, and
    /// the slot must only ever have held such pointers.
    pub unsafe fn store(&self, desired: *mut T, order: Ordering) {
        let _ = unsafe { self.swap(desired, order) };
    }

    /// As [`store`](Self::store), returning the evicted pointer.
    ///
    /// # Safety
    /// As for [`store`](Self::store).
    pub unsafe fn swap(&self, desired: *mut T, order: Ordering) -> *mut T {
        unsafe { shade_raw(desired) };
        let old = self.ptr.swap(desired, order);
        unsafe { shade_raw(old) };
        old
    }

    /// Compare-exchange through the barrier: on success, shade both the
    /// expected and the desired value.
    ///
    /// # Safety
    /// As for [`store`](Self::store); `current` must also be null or live.
    pub unsafe fn compare_exchange(
        &self,
        current: *mut T,
        new: *mut T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<*mut T, *mut T> {
        let result = self.ptr.compare_exchange(current, new, success, failure);
        if result.is_ok() {
            unsafe {
                shade_raw(current);
                shade_raw(new);
            }
        }
        result
    }

    /// Weak variant of [`compare_exchange`](Self::compare_exchange).
    ///
    /// # Safety
    /// As for [`compare_exchange`](Self::compare_exchange).
    pub unsafe fn compare_exchange_weak(
        &self,
        current: *mut T,
        new: *mut T,
        success: Ordering,
        failure: Ordering,
    ) -> Result<*mut T, *mut T> {
        let result = self.ptr.compare_exchange_weak(current, new, success, failure);
        if result.is_ok() {
            unsafe {
                shade_raw(current);
                shade_raw(new);
            }
        }
        result
    }
}

/// A single-writer strong reference slot.
///
/// Wraps [`AtomicStrong`] in the simpler discipline for a field that only
/// its owning mutator writes: relaxed loads, release stores. The collector
/// reads the slot with an acquire load during scanning and never writes it.
pub struct Strong<T> {
    inner: AtomicStrong<T>,
}

impl<T: GcObject> Strong<T> {
    /// An empty slot.
    pub const fn null() -> Self {
        Self {
            inner: AtomicStrong::null(),
        }
    }

    /// A slot initialized to `ptr` without shading (see [`AtomicStrong::new`]).
    pub fn new(ptr: *mut T) -> Self {
        Self {
            inner: AtomicStrong::new(ptr),
        }
    }

    /// Owner-side load.
    pub fn get(&self) -> *mut T {
        self.inner.load(Ordering::Relaxed)
    }

    /// Collector-side load, ordered for dereference.
    pub fn load_acquire(&self) -> *mut T {
        self.inner.load(Ordering::Acquire)
    }

    /// Owner-side store through the barrier.
    ///
    /// # Safety
    /// As for [`AtomicStrong::store`].
    pub unsafe fn set(&self, desired: *mut T) {
        unsafe { self.inner.store(desired, Ordering::Release) }
    }

    /// True if the slot is empty.
    pub fn is_null(&self) -> bool {
        self.get().is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::RED;
    use crate::object::{GcHeader, ScanContext};

    struct Node {
        header: GcHeader,
        next: Strong<Node>,
    }

    impl Node {
        fn new() -> Self {
            Self {
                header: GcHeader::new(),
                next: Strong::null(),
            }
        }
    }

    impl GcObject for Node {
        fn header(&self) -> &GcHeader {
            &self.header
        }
        fn scan(&self, ctx: &mut ScanContext) {
            ctx.push_strong(&self.next);
        }
    }

    struct Leaf {
        header: GcHeader,
    }

    impl GcObject for Leaf {
        fn header(&self) -> &GcHeader {
            &self.header
        }
        fn scan(&self, _ctx: &mut ScanContext) {}
        fn is_leaf(&self) -> bool {
            true
        }
    }

    // In unit-test binaries no collector runs, so white stays at the initial
    // encoding 0 and new objects are allocated white.

    #[test]
    fn shade_grays_a_white_object() {
        let node = Node::new();
        assert_eq!(node.header.color(), 0);
        shade(&node);
        assert_eq!(node.header.color(), GRAY);
        // idempotent
        shade(&node);
        assert_eq!(node.header.color(), GRAY);
    }

    #[test]
    fn leaf_shade_skips_gray() {
        let leaf = Leaf {
            header: GcHeader::new(),
        };
        shade(&leaf);
        assert_eq!(leaf.header.color(), invert(0));
    }

    #[test]
    fn shade_leaves_red_alone() {
        let leaf = Leaf {
            header: GcHeader::new(),
        };
        leaf.header.color.store(RED, Ordering::Relaxed);
        shade(&leaf);
        assert_eq!(leaf.header.color(), RED);
    }

    #[test]
    fn store_shades_installed_and_evicted() {
        let slot: AtomicStrong<Node> = AtomicStrong::null();
        let a = Box::into_raw(Box::new(Node::new()));
        let b = Box::into_raw(Box::new(Node::new()));
        unsafe {
            slot.store(a, Ordering::Release);
            assert_eq!((*a).header.color(), GRAY);
            let old = slot.swap(b, Ordering::Release);
            assert_eq!(old, a);
            assert_eq!((*b).header.color(), GRAY);
            slot.store(std::ptr::null_mut(), Ordering::Release);
            drop(Box::from_raw(a));
            drop(Box::from_raw(b));
        }
    }

    #[test]
    fn compare_exchange_shades_both_on_success_only() {
        let slot: AtomicStrong<Node> = AtomicStrong::null();
        let a = Box::into_raw(Box::new(Node::new()));
        unsafe {
            // failure: expected non-null but slot is null; nothing shaded
            assert!(
                slot.compare_exchange(a, std::ptr::null_mut(), Ordering::Release, Ordering::Relaxed)
                    .is_err()
            );
            assert_eq!((*a).header.color(), 0);
            // success from null: desired shaded
            assert!(
                slot.compare_exchange(std::ptr::null_mut(), a, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            );
            assert_eq!((*a).header.color(), GRAY);
            drop(Box::from_raw(a));
        }
    }
}
