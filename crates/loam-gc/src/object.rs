//! The universal object header and the collector-facing object protocol.
//!
//! Every collectible type embeds a [`GcHeader`] and implements [`GcObject`].
//! The collector only ever touches objects through this interface: it reads
//! and CASes the color word, calls [`GcObject::scan`] to discover children,
//! and calls [`GcObject::sweep`] at the end of a cycle to decide retention.
//!
//! In-heap references are raw pointers; lifetime is delegated entirely to
//! the collector. `Rc`/`Arc` must not be used for in-heap edges: reclaiming
//! reference cycles is the whole point of this crate.

use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::barrier::{AtomicStrong, Strong};
use crate::collector::global;
use crate::color::{Color, invert};

/// Header embedded in every collectible object.
///
/// Holds the atomic color word. The color is written by both mutators (write
/// barrier, root shading) and the collector (trace, sweep); all color CAS is
/// relaxed, with synchronization established transitively by the handshake
/// rendezvous.
pub struct GcHeader {
    pub(crate) color: AtomicUsize,
}

impl GcHeader {
    /// A header colored with the current allocation color.
    ///
    /// The allocation color is owned by the collector: it flips it to black
    /// at the start of every cycle, so objects allocated after the flip are
    /// never swept in that cycle.
    pub fn new() -> Self {
        Self {
            color: AtomicUsize::new(global().alloc.load(Ordering::Relaxed)),
        }
    }

    /// Current color. Relaxed; advisory anywhere outside the collector.
    pub fn color(&self) -> Color {
        self.color.load(Ordering::Relaxed)
    }

    /// Attempt a color transition.
    ///
    /// Relaxed on both sides, like every color CAS in the protocol: races on
    /// the color word are resolved by whoever wins, and cross-thread
    /// visibility of everything else goes through the handshake rendezvous.
    /// This is the hook external weak indexes use for their upgrade and
    /// teardown transitions.
    pub fn compare_exchange_color(&self, current: Color, new: Color) -> Result<Color, Color> {
        self.color
            .compare_exchange(current, new, Ordering::Relaxed, Ordering::Relaxed)
    }
}

impl Default for GcHeader {
    fn default() -> Self {
        Self::new()
    }
}

/// A collectible object.
///
/// Implementors must uphold two contracts:
///
/// - `scan` pushes **every** strong in-heap reference the object owns onto
///   the scan context. A missed edge means a reachable object gets swept.
/// - Objects shared with other threads (which is every object once the
///   collector knows about it) must be immutable or thread-safe; the
///   collector reads fields via [`ScanContext`] acquire loads concurrently
///   with mutation.
pub trait GcObject: Send + Sync {
    /// The embedded header.
    fn header(&self) -> &GcHeader;

    /// Trace the object's strong references into `ctx`.
    fn scan(&self, ctx: &mut ScanContext);

    /// Whether this object declares it has no outgoing strong references.
    ///
    /// A leaf shades straight from white to black (never gray) and its scan
    /// is never invoked, which preserves trace termination when an index
    /// holds very many leaves.
    fn is_leaf(&self) -> bool {
        false
    }

    /// Decide retention at the end of a cycle.
    ///
    /// The default reclaims white and retains black. Types that cooperate
    /// with an external index (interned leaves) override this; see
    /// `loam-intern`.
    fn sweep(&self, ctx: &SweepContext) -> SweepDisposition {
        let color = self.header().color.load(Ordering::Relaxed);
        if color == ctx.white() {
            SweepDisposition::Reclaim
        } else if color == ctx.black() {
            SweepDisposition::Retain
        } else {
            crate::protocol_violation("unexpected color at sweep");
        }
    }
}

/// What the collector should do with an object after its sweep hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepDisposition {
    /// Keep the object in the known list.
    Retain,
    /// Unlink and free the object now.
    Reclaim,
}

/// Type-erased pointer to a live allocation.
///
/// Only the collector dereferences these outside the allocating thread, and
/// only under the handshake protocol's happens-before edges.
#[derive(Clone, Copy)]
pub(crate) struct GcRef(NonNull<dyn GcObject>);

// SAFETY: GcRef crosses threads only through the channel mutex (infants
// handoff) or the collector's own lists; all access is synchronized by the
// handshake protocol.
unsafe impl Send for GcRef {}
unsafe impl Sync for GcRef {}

impl GcRef {
    pub(crate) fn new(ptr: NonNull<dyn GcObject>) -> Self {
        Self(ptr)
    }

    /// # Safety
    /// The referent must still be live.
    pub(crate) unsafe fn as_dyn<'a>(self) -> &'a dyn GcObject {
        unsafe { self.0.as_ref() }
    }

    pub(crate) fn as_ptr(self) -> *mut dyn GcObject {
        self.0.as_ptr()
    }
}

/// Trace state for one mark pass: the current white encoding plus an
/// explicit LIFO of objects that were just turned black and still need
/// their children visited.
///
/// Owned by the collector; there is no reentrant traversal. Cyclic graphs
/// terminate because each object's white→black CAS can succeed at most once
/// per cycle.
pub struct ScanContext {
    white: Color,
    stack: Vec<GcRef>,
}

impl ScanContext {
    pub(crate) fn new(white: Color) -> Self {
        Self {
            white,
            stack: Vec::new(),
        }
    }

    pub(crate) fn set_white(&mut self, white: Color) {
        self.white = white;
    }

    /// The current white encoding.
    pub fn white(&self) -> Color {
        self.white
    }

    /// The current black encoding.
    pub fn black(&self) -> Color {
        invert(self.white)
    }

    /// Mark `object` reached and queue it for child tracing.
    ///
    /// Attempts the white→black CAS; on success non-leaves are enqueued for
    /// scanning. Null is ignored.
    ///
    /// # Safety
    /// `object` must be null or point to a live collectible allocation.
    pub unsafe fn push<T: GcObject + 'static>(&mut self, object: *const T) {
        let Some(ptr) = NonNull::new(object.cast_mut()) else {
            return;
        };
        let erased: NonNull<dyn GcObject> = ptr;
        // SAFETY: caller guarantees liveness.
        let obj = unsafe { erased.as_ref() };
        if obj
            .header()
            .color
            .compare_exchange(self.white, self.black(), Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
            && !obj.is_leaf()
        {
            self.stack.push(GcRef(erased));
        }
    }

    /// Push the referent of a single-writer strong field.
    pub fn push_strong<T: GcObject + 'static>(&mut self, field: &Strong<T>) {
        // SAFETY: a Strong field only ever holds null or a pointer installed
        // through its own (unsafe) setters, whose callers promised validity.
        unsafe { self.push(field.load_acquire()) }
    }

    /// Push the referent of a multi-writer strong field.
    pub fn push_atomic<T: GcObject + 'static>(&mut self, field: &AtomicStrong<T>) {
        // SAFETY: as for `push_strong`.
        unsafe { self.push(field.load(Ordering::Acquire)) }
    }

    /// Drain the stack, scanning every popped object.
    pub(crate) fn process(&mut self) {
        while let Some(gray) = self.stack.pop() {
            // SAFETY: the object was live when pushed and nothing is freed
            // during a trace pass.
            unsafe { gray.as_dyn() }.scan(self);
        }
    }
}

/// Sweep state: the white/black encodings of the ending cycle.
pub struct SweepContext {
    white: Color,
}

impl SweepContext {
    pub(crate) fn new(white: Color) -> Self {
        Self { white }
    }

    /// The white encoding of the cycle being swept.
    pub fn white(&self) -> Color {
        self.white
    }

    /// The black encoding of the cycle being swept.
    pub fn black(&self) -> Color {
        invert(self.white)
    }
}
