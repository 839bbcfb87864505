//! The collector loop and the process-wide shared state.
//!
//! One collector thread drives epochs over a single list of known objects.
//! Each cycle:
//!
//! 1. flip the allocation color to black and handshake every mutator,
//!    requesting its infants;
//! 2. shade the global roots (each mutator shades its own roots as part of
//!    completing a handshake);
//! 3. trace to a fixed point: scan gray objects, then handshake to learn
//!    whether any mutator shaded since the last round; repeat while dirty;
//! 4. sweep: every object decides retention via its sweep hook; white
//!    objects are reclaimed;
//! 5. remap: swap the meaning of white and black, publish, and handshake so
//!    every mutator observes the new encoding before the next cycle.
//!
//! The collector never stops mutators. The only waiting a mutator ever does
//! is inside its own channel mutex while an exchange is in progress.

use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::thread;

use parking_lot::{Condvar, Mutex};

use crate::barrier::shade;
use crate::channel::Channel;
use crate::color::{Color, GRAY, RED, invert};
use crate::infants::ChunkedDeque;
use crate::mutator;
use crate::object::{GcObject, GcRef, ScanContext, SweepContext, SweepDisposition};

/// Process-wide collector/mutator shared state.
///
/// Single-initialized before any `enter`; torn down only after all mutators
/// have left and the collector has stopped.
pub(crate) struct Global {
    /// Current encoding of white. Written by the collector at remap,
    /// read by every shade.
    pub white: AtomicUsize,
    /// Current color for new allocations. Written by the collector at the
    /// start of a cycle, read by every `GcHeader::new`.
    pub alloc: AtomicUsize,
    /// Mutators that entered and have not yet been adopted by the collector.
    pub entering: Mutex<Vec<Arc<Channel>>>,
    /// Wakes the collector when it is idle.
    pub wake: Condvar,
    /// Process-wide roots, shaded by the collector each cycle.
    pub roots: Mutex<Vec<GcRef>>,
    /// Completed collection cycles.
    pub cycles: AtomicU64,
    /// Objects on the collector's known list after the last sweep.
    pub live: AtomicUsize,
    /// Objects reclaimed over the collector's lifetime.
    pub freed: AtomicU64,
    /// Raised by `request_stop`.
    pub shutdown: AtomicBool,
}

static GLOBAL: Global = Global {
    white: AtomicUsize::new(0),
    alloc: AtomicUsize::new(0),
    entering: Mutex::new(Vec::new()),
    wake: Condvar::new(),
    roots: Mutex::new(Vec::new()),
    cycles: AtomicU64::new(0),
    live: AtomicUsize::new(0),
    freed: AtomicU64::new(0),
    shutdown: AtomicBool::new(false),
};

pub(crate) fn global() -> &'static Global {
    &GLOBAL
}

/// The current encoding of white.
///
/// Mutators that inspect colors directly (weak-index upgrades) read this.
/// A stale read is harmless: the next handshake resynchronizes and the
/// color CAS it feeds simply fails.
pub fn current_white() -> Color {
    GLOBAL.white.load(Ordering::Relaxed)
}

/// Number of completed collection cycles.
pub fn collections() -> u64 {
    GLOBAL.cycles.load(Ordering::Acquire)
}

/// Objects on the known list after the most recent sweep.
pub fn objects_live() -> usize {
    GLOBAL.live.load(Ordering::Relaxed)
}

/// Objects reclaimed since the collector started.
pub fn objects_freed() -> u64 {
    GLOBAL.freed.load(Ordering::Relaxed)
}

/// Register a process-wide root.
///
/// Global roots are shaded by the collector inside every cycle, independent
/// of any mutator's root stack. There is no unregister: a global root lives
/// until collector shutdown.
pub fn push_global_root(object: NonNull<dyn GcObject>) {
    GLOBAL.roots.lock().push(GcRef::new(object));
}

/// Ask the collector to stop.
///
/// The collector exits at the next cycle boundary once no mutators remain
/// registered, freeing every object it still owns. Entering or interning
/// after the collector has stopped is not supported.
pub fn request_stop() {
    GLOBAL.shutdown.store(true, Ordering::Release);
    // Taken so the store cannot slip between the collector's idle check and
    // its park; the collector waits under this same lock.
    let _entering = GLOBAL.entering.lock();
    GLOBAL.wake.notify_all();
}

/// How a handshake round treats the dirty flags it gathers.
#[derive(Clone, Copy, PartialEq, Eq)]
enum DirtyPolicy {
    /// Reset without reading: the trace that follows will rediscover any
    /// gray work from scratch (cycle start).
    Discard,
    /// Fold into the collector's own dirty flag (trace fixed point, remap).
    Collect,
}

struct Collector {
    white: Color,
    black: Color,
    /// Every object the collector owns. Objects are only destroyed from
    /// here, only after being observed white by a sweep.
    objects: Vec<GcRef>,
    /// Channels of the mutators adopted so far.
    mutators: Vec<Arc<Channel>>,
    /// Staging area for the two-phase handshake (request, then await).
    staged: Vec<Arc<Channel>>,
    scan: ScanContext,
}

impl Collector {
    fn new() -> Self {
        let white = GLOBAL.white.load(Ordering::Relaxed);
        Self {
            white,
            black: invert(white),
            objects: Vec::new(),
            mutators: Vec::new(),
            staged: Vec::new(),
            scan: ScanContext::new(white),
        }
    }

    /// Fold a batch of handed-over infants into the known list.
    fn adopt(&mut self, mut infants: ChunkedDeque<GcRef>) {
        while let Some(infant) = infants.pop_front() {
            self.objects.push(infant);
        }
    }

    /// Adopt entrants; block while there is nothing to collect.
    ///
    /// Returns `false` when a stop was requested and nothing remains.
    fn accept_entrants(&mut self) -> bool {
        let mut entering = GLOBAL.entering.lock();
        loop {
            self.mutators.append(&mut entering);
            if !self.mutators.is_empty() || !self.objects.is_empty() {
                return true;
            }
            if GLOBAL.shutdown.load(Ordering::Acquire) {
                return false;
            }
            tracing::debug!(target: "loam::gc", "collector idle; waiting for entrants");
            GLOBAL.wake.wait(&mut entering);
        }
    }

    /// Handshake every known mutator: raise `pending` on each channel, then
    /// await every acknowledgement. Abandoned channels are retired and their
    /// leftovers adopted.
    fn handshake_all(&mut self, request_infants: bool, policy: DirtyPolicy) {
        debug_assert!(self.staged.is_empty());

        // Phase 1: raise requests.
        while let Some(channel) = self.mutators.pop() {
            let mut leftovers = None;
            {
                let mut state = channel.state.lock();
                if state.pending {
                    crate::protocol_violation("handshake requested twice");
                }
                if !state.abandoned {
                    state.pending = true;
                    state.request_infants = request_infants;
                } else {
                    if policy == DirtyPolicy::Collect && state.dirty {
                        mutator::mark_dirty();
                    }
                    state.dirty = false;
                    leftovers = Some(mem::take(&mut state.infants));
                }
            }
            match leftovers {
                None => self.staged.push(channel),
                Some(infants) => {
                    tracing::debug!(target: "loam::gc", "adopting an abandoned channel");
                    self.adopt(infants);
                }
            }
        }

        // Phase 2: await acknowledgements and collect the handoffs.
        while let Some(channel) = self.staged.pop() {
            let abandoned;
            let mut infants = ChunkedDeque::new();
            {
                let mut state = channel.state.lock();
                while !state.abandoned && state.pending {
                    channel.cv.wait(&mut state);
                }
                abandoned = state.abandoned;
                match policy {
                    DirtyPolicy::Discard => state.dirty = false,
                    DirtyPolicy::Collect => {
                        if state.dirty {
                            mutator::mark_dirty();
                            state.dirty = false;
                        }
                    }
                }
                if request_infants || abandoned {
                    infants = mem::take(&mut state.infants);
                }
            }
            self.adopt(infants);
            if !abandoned {
                self.mutators.push(channel);
            }
        }
    }

    /// Step 3: trace to a fixed point.
    fn trace(&mut self) {
        loop {
            // Scan until the collector itself stops generating gray work.
            loop {
                mutator::take_dirty();
                let mut blacks = 0usize;
                let mut grays = 0usize;
                let mut whites = 0usize;
                let mut reds = 0usize;
                for index in 0..self.objects.len() {
                    let object = self.objects[index];
                    // SAFETY: objects on the known list are live until swept.
                    let obj = unsafe { object.as_dyn() };
                    match obj.header().color.compare_exchange(
                        GRAY,
                        self.black,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            grays += 1;
                            obj.scan(&mut self.scan);
                            self.scan.process();
                        }
                        Err(color) if color == self.black => blacks += 1,
                        Err(color) if color == self.white => whites += 1,
                        Err(RED) => reds += 1,
                        Err(_) => crate::protocol_violation("unexpected color while tracing"),
                    }
                }
                tracing::trace!(
                    target: "loam::gc",
                    blacks, grays, whites, reds,
                    "scan pass"
                );
                if !mutator::take_dirty() {
                    break;
                }
            }

            // The collector has traced everything it knows about. Handshake
            // to learn whether any mutator shaded since the last round.
            if !self.accept_entrants() {
                return;
            }
            self.handshake_all(false, DirtyPolicy::Collect);
            if !mutator::take_dirty() {
                return;
            }
        }
    }

    /// Step 4: sweep. Every object decides retention; white objects are
    /// destroyed and unlinked.
    fn sweep(&mut self) {
        let ctx = SweepContext::new(self.white);
        let mut freed = 0u64;
        let mut index = 0;
        while index < self.objects.len() {
            let object = self.objects[index];
            // SAFETY: nothing on the known list has been freed yet.
            let disposition = unsafe { object.as_dyn() }.sweep(&ctx);
            match disposition {
                SweepDisposition::Retain => index += 1,
                SweepDisposition::Reclaim => {
                    self.objects.swap_remove(index);
                    // SAFETY: the object was observed white after a clean
                    // trace (or red after a full grace cycle); no mutator
                    // can reach it.
                    unsafe { drop(Box::from_raw(object.as_ptr())) };
                    freed += 1;
                }
            }
        }
        // Sweep hooks may have allocated (weak-index surgery happens on this
        // thread); those allocations are ours to track.
        let own = mutator::take_allocations();
        self.adopt(own);

        GLOBAL.freed.fetch_add(freed, Ordering::Relaxed);
        GLOBAL.live.store(self.objects.len(), Ordering::Relaxed);
        tracing::debug!(
            target: "loam::gc",
            freed,
            live = self.objects.len(),
            "sweep complete"
        );
    }

    /// Step 5: swap the meaning of white and black, publish, and make every
    /// mutator observe the new encoding before the next cycle begins.
    fn remap(&mut self) -> bool {
        mem::swap(&mut self.white, &mut self.black);
        GLOBAL.white.store(self.white, Ordering::Relaxed);
        self.scan.set_white(self.white);
        if !self.accept_entrants() {
            return false;
        }
        self.handshake_all(false, DirtyPolicy::Collect);
        true
    }

    fn cycle(&mut self) -> bool {
        tracing::debug!(
            target: "loam::gc",
            cycle = GLOBAL.cycles.load(Ordering::Relaxed),
            objects = self.objects.len(),
            mutators = self.mutators.len(),
            "collection begins"
        );

        // Step 1: flip the allocation color, then make sure every mutator
        // has seen the flip and handed over everything allocated before it.
        debug_assert_eq!(GLOBAL.white.load(Ordering::Relaxed), self.white);
        debug_assert_eq!(GLOBAL.alloc.load(Ordering::Relaxed), self.white);
        GLOBAL.alloc.store(self.black, Ordering::Relaxed);
        if !self.accept_entrants() {
            return false;
        }
        self.handshake_all(true, DirtyPolicy::Discard);

        // Step 2: shade the global roots. Mutator roots are shaded by each
        // mutator as it completes a handshake.
        for root in GLOBAL.roots.lock().iter() {
            // SAFETY: global roots are never reclaimed while the collector
            // runs; shading them here is what keeps them black.
            shade(unsafe { root.as_dyn() });
        }

        // Step 3: trace to fixed point.
        self.trace();

        // Step 4: sweep.
        self.sweep();

        // Step 5: recolor and publish.
        if !self.remap() {
            return false;
        }

        GLOBAL.cycles.fetch_add(1, Ordering::Release);
        true
    }

    /// Free everything still owned at shutdown.
    fn teardown(&mut self) {
        GLOBAL.roots.lock().clear();
        let remaining = self.objects.len();
        for object in self.objects.drain(..) {
            // SAFETY: shutdown requires every mutator to have left; nothing
            // can reach these objects anymore.
            unsafe { drop(Box::from_raw(object.as_ptr())) };
        }
        GLOBAL.live.store(0, Ordering::Relaxed);
        GLOBAL.freed.fetch_add(remaining as u64, Ordering::Relaxed);
        tracing::debug!(target: "loam::gc", remaining, "collector stopped");
    }
}

/// Run the collector on the calling thread.
///
/// Loops until [`request_stop`] has been called and every mutator has left.
/// Blocks while there is neither work nor any registered mutator.
pub fn collect() {
    mutator::set_collector();
    let mut collector = Collector::new();
    loop {
        if GLOBAL.shutdown.load(Ordering::Acquire)
            && collector.mutators.is_empty()
            && GLOBAL.entering.lock().is_empty()
        {
            break;
        }
        if !collector.cycle() {
            break;
        }
    }
    collector.teardown();
}

/// Spawn the collector on a named thread.
pub fn spawn() -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("loam-gc".into())
        .spawn(collect)
        .expect("failed to spawn collector thread")
}
